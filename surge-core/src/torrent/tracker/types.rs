//! Core types for BitTorrent tracker communication

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::torrent::protocol::PeerId;
use crate::torrent::{InfoHash, TorrentError};

/// Tracker announce request.
///
/// Identifies the torrent and this client, and reports transfer totals. We
/// never upload, so `uploaded` stays zero.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    /// Unique identifier for the torrent being announced
    pub info_hash: InfoHash,
    /// Client's unique 20-byte identifier
    pub peer_id: PeerId,
    /// TCP port reported as our listening port
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    /// Bytes remaining to download
    pub left: u64,
}

impl AnnounceRequest {
    /// Request for a download that has not started yet.
    pub fn starting(info_hash: InfoHash, peer_id: PeerId, port: u16, total_length: u64) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            uploaded: 0,
            downloaded: 0,
            left: total_length,
        }
    }
}

/// Tracker announce response.
///
/// HTTP trackers may omit the swarm statistics; UDP trackers always send them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnounceResponse {
    /// Seconds until the next announce should be sent
    pub interval: Option<u32>,
    /// Number of seeders in the swarm
    pub seeders: Option<u32>,
    /// Number of leechers in the swarm
    pub leechers: Option<u32>,
    /// Candidate peers, in tracker order
    pub peers: Vec<SocketAddr>,
}

/// Abstract tracker communication interface.
///
/// One capability regardless of wire protocol: announce and receive
/// candidate peers. Implementations own their transport and retry nothing.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Announces to the tracker and returns its peer list.
    ///
    /// Callers add no deadline of their own, so implementations must give up
    /// after `NetworkConfig::tracker_timeout`.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TrackerUnavailable` - Network failure, timeout, bad status or undecodable reply
    /// - `TorrentError::TrackerProtocol` - UDP tracker answered with an error or unexpected action
    async fn announce(&self, request: &AnnounceRequest) -> Result<AnnounceResponse, TorrentError>;

    /// Returns tracker URL for debugging and logging purposes.
    fn tracker_url(&self) -> &str;
}
