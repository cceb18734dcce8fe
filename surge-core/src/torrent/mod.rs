//! BitTorrent download engine: trackers, peer wire sessions and block bookkeeping

pub mod downloader;
pub mod fields;
pub mod layout;
pub mod parsing;
pub mod peer_session;
pub mod piece_manager;
pub mod protocol;
pub mod request_queue;
pub mod tracker;

use std::fmt;
use std::net::SocketAddr;

pub use downloader::{DownloadReport, Downloader};
pub use layout::{BLOCK_LEN, BlockId, TorrentLayout};
pub use parsing::{BencodeTorrentParser, TorrentFile, TorrentMetadata, TorrentParser};
pub use peer_session::{PeerSession, SessionContext, SessionOutcome, SessionReport};
pub use piece_manager::{PieceManager, Progress};
pub use protocol::{PeerHandshake, PeerId, PeerMessage, SessionState};
pub use request_queue::RequestQueue;
pub use tracker::{
    AnnounceRequest, AnnounceResponse, HttpTrackerClient, PeerDiscovery, TrackerClient,
    UdpTrackerClient,
};

use crate::storage::StorageError;

/// SHA-1 hash identifying a unique torrent.
///
/// 20-byte SHA-1 hash of the bencoded info dictionary from a torrent file.
/// Sent in every tracker announce and peer handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Zero-based index of a piece within a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying piece index as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur during torrent operations.
///
/// Tracker and peer variants are contained by the downloader: the failing
/// endpoint or session is dropped and the rest carry on. Storage failures and
/// an empty peer set abort the whole download.
#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
    #[error("Failed to parse torrent file: {reason}")]
    InvalidTorrentFile { reason: String },

    #[error("Tracker {url} unavailable: {reason}")]
    TrackerUnavailable { url: String, reason: String },

    #[error("Tracker {url} answered with action {action}: {message}")]
    TrackerProtocol {
        url: String,
        action: u32,
        message: String,
    },

    #[error("Protocol error: {message}")]
    ProtocolError { message: String },

    #[error("Peer {address} violated the wire protocol: {reason}")]
    PeerProtocolViolation { address: SocketAddr, reason: String },

    #[error("Peer {address} disconnected")]
    PeerDisconnected { address: SocketAddr },

    #[error("Buffer truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("No peers found on any tracker")]
    NoPeersFound,

    #[error("Download incomplete: {received} of {total} blocks received")]
    DownloadIncomplete { received: usize, total: usize },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error: {0}")]
    UrlParsing(#[from] url::ParseError),
}

impl TorrentError {
    /// Returns true when the error must abort the whole download rather than
    /// only the tracker query or peer session that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TorrentError::Storage(_)
                | TorrentError::NoPeersFound
                | TorrentError::DownloadIncomplete { .. }
        )
    }
}
