//! Storage layer for torrent data.
//!
//! Blocks land in one flat file sized to the whole torrent while the download
//! runs. Once complete, the flat file is split into the declared files.

pub mod file_split;
pub mod flat_file;
#[cfg(test)]
pub mod test_fixtures;

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
pub use file_split::{FileRange, file_ranges, split_into_files};
pub use flat_file::FlatStorage;

/// Positional block writes into the in-progress download.
///
/// Callers guarantee that concurrent writes target disjoint ranges, so
/// implementations need no locking of their own.
#[async_trait]
pub trait BlockStorage: Send + Sync {
    /// Writes `data` starting at absolute byte `offset`.
    ///
    /// # Errors
    ///
    /// - `StorageError::OutOfBounds` - Write would extend past the torrent length
    /// - `StorageError::Io` - If file system operation failed
    async fn write_block(&self, offset: u64, data: Bytes) -> Result<(), StorageError>;

    /// Flushes written blocks to durable storage.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - If file system operation failed
    async fn sync(&self) -> Result<(), StorageError>;

    /// Total addressable length in bytes.
    fn total_length(&self) -> u64;
}

/// Rejects writes that do not fit inside `[0, total)`.
///
/// # Errors
///
/// - `StorageError::OutOfBounds` - Range end exceeds `total` or overflows
pub(crate) fn check_bounds(offset: u64, len: usize, total: u64) -> Result<(), StorageError> {
    let end = offset.checked_add(len as u64);
    match end {
        Some(end) if end <= total => Ok(()),
        _ => Err(StorageError::OutOfBounds { offset, len, total }),
    }
}

/// Errors that occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Write range falls outside the flat region
    #[error("Write of {len} bytes at offset {offset} exceeds storage length {total}")]
    OutOfBounds {
        offset: u64,
        len: usize,
        total: u64,
    },

    /// Declared file path would escape the destination directory
    #[error("Invalid file path {path:?}: {reason}")]
    InvalidPath {
        /// Path as declared by the torrent
        path: PathBuf,
        reason: String,
    },

    /// Standard I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_accepts_exact_fit() {
        assert!(check_bounds(0, 100, 100).is_ok());
        assert!(check_bounds(90, 10, 100).is_ok());
        assert!(check_bounds(100, 0, 100).is_ok());
    }

    #[test]
    fn test_bounds_rejects_overrun() {
        assert!(matches!(
            check_bounds(95, 10, 100),
            Err(StorageError::OutOfBounds {
                offset: 95,
                len: 10,
                total: 100
            })
        ));
        assert!(check_bounds(u64::MAX, 2, 100).is_err());
    }
}
