//! Surge Core - BitTorrent download engine
//!
//! This crate provides the building blocks for downloading a torrent from
//! its swarm: metadata parsing, HTTP and UDP tracker clients, peer wire
//! sessions, shared block bookkeeping, flat storage and final file assembly.

pub mod config;
pub mod storage;
pub mod torrent;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::SurgeConfig;
pub use storage::{FlatStorage, StorageError};
pub use torrent::{DownloadReport, Downloader, TorrentError};

/// Core errors that can bubble up from any Surge subsystem.
#[derive(Debug, thiserror::Error)]
pub enum SurgeError {
    #[error("Torrent error: {0}")]
    Torrent(#[from] TorrentError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SurgeError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            SurgeError::Torrent(e) => match e {
                TorrentError::InvalidTorrentFile { reason } => {
                    format!("Invalid torrent file: {reason}")
                }
                TorrentError::NoPeersFound => {
                    "No tracker returned any peers for this torrent".to_string()
                }
                TorrentError::DownloadIncomplete { received, total } => format!(
                    "Ran out of peers after {received} of {total} blocks; partial data was kept"
                ),
                TorrentError::Storage(_) => "Could not write downloaded data".to_string(),
                TorrentError::Io(_) => "Could not read torrent file".to_string(),
                _ => "Download error occurred".to_string(),
            },
            SurgeError::Storage(_) => "Storage error occurred".to_string(),
            SurgeError::Configuration { reason } => format!("Configuration error: {reason}"),
            SurgeError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            SurgeError::Configuration { .. }
                | SurgeError::Torrent(TorrentError::InvalidTorrentFile { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, SurgeError>;
