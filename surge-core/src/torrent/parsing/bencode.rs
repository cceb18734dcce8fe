//! Bencode metadata extraction and info hash calculation

use std::collections::HashSet;
use std::ops::Range;

use sha1::{Digest, Sha1};

use super::types::{TorrentFile, TorrentMetadata};
use crate::torrent::{InfoHash, TorrentError};

type BencodeDict<'a> = std::collections::HashMap<&'a [u8], bencode_rs::Value<'a>>;
type ParseResult<T> = Result<T, TorrentError>;

/// Deepest list or dictionary nesting accepted in a `.torrent` file.
const MAX_NESTING_DEPTH: usize = 64;

fn invalid(reason: impl Into<String>) -> TorrentError {
    TorrentError::InvalidTorrentFile {
        reason: reason.into(),
    }
}

fn too_deep() -> TorrentError {
    invalid(format!("Bencode nested too deeply (limit {MAX_NESTING_DEPTH})"))
}

/// Bencode parsing utilities for torrent metadata extraction.
pub struct BencodeParser;

impl BencodeParser {
    /// Parse bencode data and extract torrent metadata
    ///
    /// # Errors
    /// - `TorrentError::InvalidTorrentFile` - If bencode parsing or metadata extraction failed
    pub fn parse_bencode_data(torrent_bytes: &[u8]) -> ParseResult<TorrentMetadata> {
        Self::check_nesting(torrent_bytes)?;
        let parsed = bencode_rs::Value::parse(torrent_bytes)
            .map_err(|e| invalid(format!("Bencode parsing failed: {e:?}")))?;

        match parsed.first() {
            Some(bencode_rs::Value::Dictionary(dict)) => {
                Self::extract_metadata_from_dict(dict, torrent_bytes)
            }
            Some(_) => Err(invalid("Root element must be dictionary")),
            None => Err(invalid("Empty bencode data")),
        }
    }

    fn extract_metadata_from_dict(
        dict: &BencodeDict<'_>,
        original_data: &[u8],
    ) -> ParseResult<TorrentMetadata> {
        let Some(info_value) = dict.get(b"info".as_slice()) else {
            return Err(invalid("Missing 'info' field"));
        };
        let bencode_rs::Value::Dictionary(info) = info_value else {
            return Err(invalid("Info field must be dictionary"));
        };

        let info_hash = Self::calculate_info_hash(original_data)?;

        let name = Self::extract_bytes_as_string(info, b"name")?;
        let piece_length = u32::try_from(Self::extract_integer(info, b"piece length")?)
            .ok()
            .filter(|&len| len > 0)
            .ok_or_else(|| invalid("Invalid piece length"))?;

        let pieces_bytes = Self::extract_bytes(info, b"pieces")?;
        if !pieces_bytes.len().is_multiple_of(20) {
            return Err(invalid("Invalid pieces length"));
        }
        let piece_hashes: Vec<[u8; 20]> = pieces_bytes
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let files = match (info.get(b"length".as_slice()), info.get(b"files".as_slice())) {
            (Some(_), _) => vec![TorrentFile {
                path: vec![name.clone()],
                length: Self::extract_length(info)?,
            }],
            (None, Some(bencode_rs::Value::List(files_list))) => {
                Self::extract_files_info(&name, files_list)?
            }
            (None, Some(_)) => return Err(invalid("Invalid files structure")),
            (None, None) => return Err(invalid("Missing 'files' or 'length' field")),
        };
        let total_length = files.iter().map(|file| file.length).sum();

        let announce_urls = Self::extract_announce_urls(dict)?;

        Ok(TorrentMetadata {
            info_hash,
            name,
            piece_length,
            piece_hashes,
            total_length,
            files,
            announce_urls,
        })
    }

    /// SHA-1 over the exact bytes of the top-level `info` value.
    fn calculate_info_hash(original_data: &[u8]) -> ParseResult<InfoHash> {
        let span = Self::find_info_span(original_data)?;
        let digest = Sha1::digest(&original_data[span]);
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&digest);
        Ok(InfoHash::new(hash))
    }

    /// Locates the raw `info` value by walking the root dictionary's keys.
    ///
    /// Walking key by key keeps an `info` string nested elsewhere (a comment,
    /// a file name) from being mistaken for the real one.
    fn find_info_span(data: &[u8]) -> ParseResult<Range<usize>> {
        if data.first() != Some(&b'd') {
            return Err(invalid("Expected dictionary start"));
        }

        let mut pos = 1;
        loop {
            match data.get(pos) {
                Some(b'e') => return Err(invalid("Missing 'info' field")),
                Some(_) => {
                    let (key, value_start) = Self::read_string(data, pos)?;
                    let value_end = Self::skip_value(data, value_start)?;
                    if key == b"info" {
                        return Ok(value_start..value_end);
                    }
                    pos = value_end;
                }
                None => return Err(invalid("Incomplete bencode dictionary")),
            }
        }
    }

    /// Rejects containers nested deeper than [`MAX_NESTING_DEPTH`] before the
    /// recursive decoder sees them. Other malformations are left to the decoder.
    fn check_nesting(data: &[u8]) -> ParseResult<()> {
        let mut depth = 0usize;
        let mut pos = 0;
        while let Some(&byte) = data.get(pos) {
            match byte {
                b'l' | b'd' => {
                    depth += 1;
                    if depth > MAX_NESTING_DEPTH {
                        return Err(too_deep());
                    }
                    pos += 1;
                }
                b'e' => {
                    depth = depth.saturating_sub(1);
                    pos += 1;
                }
                b'i' => match data[pos..].iter().position(|&b| b == b'e') {
                    Some(end) => pos += end + 1,
                    None => return Ok(()),
                },
                b'0'..=b'9' => match Self::read_string(data, pos) {
                    Ok((_, end)) => pos = end,
                    Err(_) => return Ok(()),
                },
                _ => return Ok(()),
            }
        }
        Ok(())
    }

    /// Returns the position just past the bencoded value starting at `pos`.
    fn skip_value(data: &[u8], pos: usize) -> ParseResult<usize> {
        Self::skip_nested(data, pos, 0)
    }

    fn skip_nested(data: &[u8], pos: usize, depth: usize) -> ParseResult<usize> {
        match data.get(pos) {
            Some(b'i') => {
                let end = data[pos..]
                    .iter()
                    .position(|&b| b == b'e')
                    .ok_or_else(|| invalid("Unterminated integer"))?;
                Ok(pos + end + 1)
            }
            Some(b'l' | b'd') => {
                if depth >= MAX_NESTING_DEPTH {
                    return Err(too_deep());
                }
                let mut cursor = pos + 1;
                while data.get(cursor) != Some(&b'e') {
                    if cursor >= data.len() {
                        return Err(invalid("Incomplete bencode container"));
                    }
                    cursor = Self::skip_nested(data, cursor, depth + 1)?;
                }
                Ok(cursor + 1)
            }
            Some(b'0'..=b'9') => Self::read_string(data, pos).map(|(_, end)| end),
            Some(_) => Err(invalid("Invalid bencode character")),
            None => Err(invalid("Unexpected end of bencode data")),
        }
    }

    /// Reads a `<len>:<bytes>` string at `pos`, returning it and the position after it.
    fn read_string(data: &[u8], pos: usize) -> ParseResult<(&[u8], usize)> {
        let colon = data[pos..]
            .iter()
            .position(|&b| b == b':')
            .map(|offset| pos + offset)
            .ok_or_else(|| invalid("Invalid string format"))?;
        let length: usize = std::str::from_utf8(&data[pos..colon])
            .ok()
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| invalid("Invalid string length"))?;

        let start = colon + 1;
        let end = start
            .checked_add(length)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| invalid("String runs past end of data"))?;
        Ok((&data[start..end], end))
    }

    fn extract_bytes_as_string(dict: &BencodeDict<'_>, key: &[u8]) -> ParseResult<String> {
        let bytes = Self::extract_bytes(dict, key)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| {
            invalid(format!(
                "Invalid UTF-8 in field: {:?}",
                String::from_utf8_lossy(key)
            ))
        })
    }

    fn extract_bytes<'a>(dict: &'a BencodeDict<'_>, key: &[u8]) -> ParseResult<&'a [u8]> {
        match dict.get(key) {
            Some(bencode_rs::Value::Bytes(bytes)) => Ok(bytes),
            _ => Err(invalid(format!(
                "Missing or invalid field: {:?}",
                String::from_utf8_lossy(key)
            ))),
        }
    }

    fn extract_integer(dict: &BencodeDict<'_>, key: &[u8]) -> ParseResult<i64> {
        match dict.get(key) {
            Some(bencode_rs::Value::Integer(value)) => Ok(*value),
            _ => Err(invalid(format!(
                "Missing or invalid integer field: {:?}",
                String::from_utf8_lossy(key)
            ))),
        }
    }

    fn extract_length(dict: &BencodeDict<'_>) -> ParseResult<u64> {
        u64::try_from(Self::extract_integer(dict, b"length")?)
            .map_err(|_| invalid("Negative file length"))
    }

    /// Multi-file entries, each path prefixed with the torrent name.
    fn extract_files_info(
        name: &str,
        files_list: &[bencode_rs::Value<'_>],
    ) -> ParseResult<Vec<TorrentFile>> {
        if files_list.is_empty() {
            return Err(invalid("Torrent lists no files"));
        }

        files_list
            .iter()
            .map(|file_value| {
                let bencode_rs::Value::Dictionary(file_dict) = file_value else {
                    return Err(invalid("Invalid file entry type"));
                };
                let length = Self::extract_length(file_dict)?;

                let Some(bencode_rs::Value::List(path_list)) = file_dict.get(b"path".as_slice())
                else {
                    return Err(invalid("Missing or invalid path in file"));
                };
                if path_list.is_empty() {
                    return Err(invalid("Empty path in file"));
                }

                let mut path = Vec::with_capacity(path_list.len() + 1);
                path.push(name.to_string());
                for component in path_list {
                    let bencode_rs::Value::Bytes(component) = component else {
                        return Err(invalid("Invalid path component type"));
                    };
                    let component = String::from_utf8(component.to_vec())
                        .map_err(|_| invalid("Invalid UTF-8 in file path"))?;
                    path.push(component);
                }

                Ok(TorrentFile { path, length })
            })
            .collect()
    }

    /// Announce URLs in tier order, first occurrence kept.
    fn extract_announce_urls(dict: &BencodeDict<'_>) -> ParseResult<Vec<String>> {
        let mut candidates = Vec::new();

        if let Ok(announce) = Self::extract_bytes_as_string(dict, b"announce") {
            candidates.push(announce);
        }

        if let Some(bencode_rs::Value::List(announce_list)) = dict.get(b"announce-list".as_slice())
        {
            for tier in announce_list {
                let bencode_rs::Value::List(tier_urls) = tier else {
                    continue;
                };
                for url_value in tier_urls {
                    if let bencode_rs::Value::Bytes(url_bytes) = url_value
                        && let Ok(url) = String::from_utf8(url_bytes.to_vec())
                    {
                        candidates.push(url);
                    }
                }
            }
        }

        let mut seen = HashSet::new();
        let announce_urls: Vec<String> = candidates
            .into_iter()
            .filter(|url| !url.is_empty() && seen.insert(url.clone()))
            .collect();

        if announce_urls.is_empty() {
            return Err(invalid("No announce URLs found"));
        }

        Ok(announce_urls)
    }
}
