//! In-memory storage for session tests.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::{BlockStorage, StorageError, check_bounds};

/// Byte buffer standing in for the flat file.
pub struct MemoryStorage {
    data: Mutex<Vec<u8>>,
    fail_writes: bool,
}

impl MemoryStorage {
    pub fn new(total_length: u64) -> Self {
        Self {
            data: Mutex::new(vec![0; total_length as usize]),
            fail_writes: false,
        }
    }

    /// Storage whose every write fails with an I/O error.
    pub fn failing(total_length: u64) -> Self {
        Self {
            fail_writes: true,
            ..Self::new(total_length)
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

#[async_trait]
impl BlockStorage for MemoryStorage {
    async fn write_block(&self, offset: u64, data: Bytes) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        let mut buffer = self.data.lock();
        check_bounds(offset, data.len(), buffer.len() as u64)?;
        let start = offset as usize;
        buffer[start..start + data.len()].copy_from_slice(&data);
        Ok(())
    }

    async fn sync(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn total_length(&self) -> u64 {
        self.data.lock().len() as u64
    }
}
