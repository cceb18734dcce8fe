//! Flat in-progress file addressed by absolute torrent offset.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::{BlockStorage, StorageError, check_bounds};

/// One pre-sized file holding the entire torrent payload.
///
/// Writes are positional and go through the blocking pool, so many sessions
/// can write their blocks at once without sharing a cursor.
#[derive(Debug)]
pub struct FlatStorage {
    file: Arc<std::fs::File>,
    total_length: u64,
}

impl FlatStorage {
    /// Creates or truncates `path` and sizes it to `total_length` bytes.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - Parent directory missing or file not writable
    pub async fn create(path: impl AsRef<Path>, total_length: u64) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?;
        file.set_len(total_length).await?;

        tracing::debug!(
            "Created flat storage {} ({} bytes)",
            path.display(),
            total_length
        );

        Ok(Self {
            file: Arc::new(file.into_std().await),
            total_length,
        })
    }
}

#[async_trait]
impl BlockStorage for FlatStorage {
    async fn write_block(&self, offset: u64, data: Bytes) -> Result<(), StorageError> {
        check_bounds(offset, data.len(), self.total_length)?;

        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || write_at(&file, offset, &data))
            .await
            .map_err(std::io::Error::other)??;
        Ok(())
    }

    async fn sync(&self) -> Result<(), StorageError> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || file.sync_all())
            .await
            .map_err(std::io::Error::other)??;
        Ok(())
    }

    fn total_length(&self) -> u64 {
        self.total_length
    }
}

#[cfg(unix)]
fn write_at(file: &std::fs::File, offset: u64, data: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

#[cfg(windows)]
fn write_at(file: &std::fs::File, mut offset: u64, mut data: &[u8]) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !data.is_empty() {
        let written = file.seek_write(data, offset)?;
        if written == 0 {
            return Err(std::io::ErrorKind::WriteZero.into());
        }
        data = &data[written..];
        offset += written as u64;
    }
    Ok(())
}
