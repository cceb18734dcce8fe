//! Core types and structures for torrent parsing

use std::path::Path;

use async_trait::async_trait;

use super::super::{InfoHash, TorrentError};

/// Complete metadata extracted from a torrent file.
///
/// Contains all information needed to download a torrent including
/// piece hashes, file structure, and tracker URLs.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentMetadata {
    pub info_hash: InfoHash,
    pub name: String,
    pub piece_length: u32,
    pub piece_hashes: Vec<[u8; 20]>,
    pub total_length: u64,
    /// Files in download order. Every path starts with the torrent name.
    pub files: Vec<TorrentFile>,
    /// `announce` first, then each `announce-list` tier, duplicates removed
    pub announce_urls: Vec<String>,
}

impl TorrentMetadata {
    /// Whether the torrent declares a `files` list rather than one `length`.
    pub fn is_multi_file(&self) -> bool {
        self.files.len() != 1 || self.files[0].path.len() != 1
    }
}

/// Individual file within a torrent.
///
/// Relative path components and byte length. Single-file torrents carry one
/// entry whose path is just the torrent name.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentFile {
    pub path: Vec<String>,
    pub length: u64,
}

/// Abstract torrent parsing interface for multiple implementations.
///
/// Provides unified interface for parsing torrent metadata from various sources.
/// Implementations handle format-specific details while maintaining consistent
/// error handling and metadata extraction.
#[async_trait]
pub trait TorrentParser: Send + Sync {
    /// Parses torrent metadata from raw bencode bytes.
    ///
    /// # Errors
    /// - `TorrentError::InvalidTorrentFile` - Malformed bencode or missing fields
    async fn parse_torrent_data(&self, data: &[u8]) -> Result<TorrentMetadata, TorrentError>;

    /// Reads a `.torrent` file from disk and parses it.
    ///
    /// # Errors
    /// - `TorrentError::Io` - File could not be read
    /// - `TorrentError::InvalidTorrentFile` - Parsing failure
    async fn parse_torrent_file(&self, path: &Path) -> Result<TorrentMetadata, TorrentError>;
}
