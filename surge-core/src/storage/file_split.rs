//! Final assembly: carving the flat region into the torrent's declared files.

use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Component, Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::StorageError;
use crate::torrent::TorrentFile;

/// Byte range of one declared file inside the flat region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRange {
    /// Path relative to the destination directory
    pub path: PathBuf,
    pub range: Range<u64>,
}

/// Cumulative flat-region ranges for `files`, in declaration order.
///
/// # Errors
///
/// - `StorageError::InvalidPath` - Empty path, absolute path or `..` component
pub fn file_ranges(files: &[TorrentFile]) -> Result<Vec<FileRange>, StorageError> {
    let mut start = 0u64;
    files
        .iter()
        .map(|file| {
            let path = relative_path(&file.path)?;
            let range = start..start + file.length;
            start = range.end;
            Ok(FileRange { path, range })
        })
        .collect()
}

fn relative_path(components: &[String]) -> Result<PathBuf, StorageError> {
    let path: PathBuf = components.iter().collect();
    let invalid = |reason: &str| StorageError::InvalidPath {
        path: path.clone(),
        reason: reason.to_string(),
    };

    if path.as_os_str().is_empty() {
        return Err(invalid("empty path"));
    }
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            Component::ParentDir => return Err(invalid("parent directory component")),
            Component::CurDir => return Err(invalid("current directory component")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("absolute path"));
            }
        }
    }
    Ok(path)
}

/// Copies each file's range out of `flat_path` into `dest_dir`, creating
/// parent directories as needed. Returns the written paths in order.
///
/// The flat file is left in place; removing it is the caller's call.
///
/// # Errors
///
/// - `StorageError::InvalidPath` - A declared path would escape `dest_dir`
/// - `StorageError::Io` - Flat region shorter than the file table, or any write failed
pub async fn split_into_files(
    flat_path: &Path,
    files: &[TorrentFile],
    dest_dir: &Path,
) -> Result<Vec<PathBuf>, StorageError> {
    let ranges = file_ranges(files)?;
    let mut flat = tokio::fs::File::open(flat_path).await?;
    let mut written = Vec::with_capacity(ranges.len());

    for FileRange { path, range } in ranges {
        let target = dest_dir.join(&path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        flat.seek(SeekFrom::Start(range.start)).await?;
        let expected = range.end - range.start;
        let mut output = tokio::fs::File::create(&target).await?;
        let copied = tokio::io::copy(&mut (&mut flat).take(expected), &mut output).await?;
        if copied != expected {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "flat region ended after {copied} of {expected} bytes for {}",
                    path.display()
                ),
            )));
        }
        output.sync_all().await?;

        tracing::debug!("Wrote {} ({} bytes)", target.display(), expected);
        written.push(target);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn file(path: &[&str], length: u64) -> TorrentFile {
        TorrentFile {
            path: path.iter().map(|s| s.to_string()).collect(),
            length,
        }
    }

    #[test]
    fn test_ranges_are_cumulative() {
        let ranges = file_ranges(&[
            file(&["t", "a"], 100),
            file(&["t", "empty"], 0),
            file(&["t", "b"], 200),
        ])
        .unwrap();

        assert_eq!(ranges[0].range, 0..100);
        assert_eq!(ranges[1].range, 100..100);
        assert_eq!(ranges[2].range, 100..300);
        assert_eq!(ranges[2].path, PathBuf::from("t").join("b"));
    }

    #[test]
    fn test_escaping_paths_rejected() {
        for bad in [
            vec!["t", "..", "etc"],
            vec!["/etc", "passwd"],
            vec![".", "x"],
            vec![],
        ] {
            let result = file_ranges(&[file(&bad, 1)]);
            assert!(
                matches!(result, Err(StorageError::InvalidPath { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_split_multi_file() {
        let dir = TempDir::new().unwrap();
        let flat_path = dir.path().join("blob.part");
        let blob: Vec<u8> = (0..300u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&flat_path, &blob).unwrap();

        let dest = dir.path().join("out");
        let written = split_into_files(
            &flat_path,
            &[file(&["t", "a"], 100), file(&["t", "sub", "b"], 200)],
            &dest,
        )
        .await
        .unwrap();

        assert_eq!(
            written,
            vec![dest.join("t").join("a"), dest.join("t").join("sub").join("b")]
        );
        assert_eq!(std::fs::read(&written[0]).unwrap(), &blob[..100]);
        assert_eq!(std::fs::read(&written[1]).unwrap(), &blob[100..]);
        assert!(flat_path.exists());
    }

    #[tokio::test]
    async fn test_split_short_flat_region() {
        let dir = TempDir::new().unwrap();
        let flat_path = dir.path().join("blob.part");
        std::fs::write(&flat_path, [1u8; 50]).unwrap();

        let result = split_into_files(&flat_path, &[file(&["a"], 100)], dir.path()).await;
        assert!(matches!(result, Err(StorageError::Io(_))));
    }
}
