//! Core types and enumerations for BitTorrent wire protocol

use bytes::Bytes;

use crate::torrent::{InfoHash, PieceIndex};

/// Azureus-style prefix identifying this client in peer ids.
pub const DEFAULT_CLIENT_PREFIX: &str = "-SG0001-";

/// BitTorrent peer identifier.
///
/// 20-byte identifier for peers in the BitTorrent network.
/// Used in handshakes and tracker communication to identify clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; 20]);

impl PeerId {
    /// Creates peer ID from 20-byte array.
    pub fn new(id: [u8; 20]) -> Self {
        Self(id)
    }

    /// Returns peer ID as byte array reference.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Generate random peer ID starting with `prefix`.
    ///
    /// Prefixes longer than 20 bytes are cut; the remainder is random.
    pub fn with_prefix(prefix: &str) -> Self {
        let mut id = [0u8; 20];
        let prefix_len = prefix.len().min(id.len());
        id[..prefix_len].copy_from_slice(&prefix.as_bytes()[..prefix_len]);
        for byte in &mut id[prefix_len..] {
            *byte = rand::random();
        }
        Self(id)
    }
}

/// BitTorrent wire protocol messages.
///
/// Closed set of message kinds from BEP 3. Frames are decoded into this enum
/// once, at the framing boundary; nothing downstream inspects raw ids.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    /// Keep-alive message to maintain connection
    KeepAlive,
    /// Peer will not serve our requests
    Choke,
    /// Peer will serve our requests
    Unchoke,
    Interested,
    NotInterested,
    /// Peer acquired a piece
    Have {
        piece_index: PieceIndex,
    },
    /// Peer's piece availability, one bit per piece, MSB first
    Bitfield {
        bitfield: Bytes,
    },
    /// Request a block of data from a piece
    Request {
        piece_index: PieceIndex,
        /// Byte offset within the piece
        offset: u32,
        length: u32,
    },
    /// A block of piece data
    Piece {
        piece_index: PieceIndex,
        /// Byte offset within the piece
        offset: u32,
        data: Bytes,
    },
    /// Cancel a previously sent request
    Cancel {
        piece_index: PieceIndex,
        offset: u32,
        length: u32,
    },
    /// Peer's DHT port
    Port {
        port: u16,
    },
}

impl PeerMessage {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::KeepAlive => "keep-alive",
            PeerMessage::Choke => "choke",
            PeerMessage::Unchoke => "unchoke",
            PeerMessage::Interested => "interested",
            PeerMessage::NotInterested => "not-interested",
            PeerMessage::Have { .. } => "have",
            PeerMessage::Bitfield { .. } => "bitfield",
            PeerMessage::Request { .. } => "request",
            PeerMessage::Piece { .. } => "piece",
            PeerMessage::Cancel { .. } => "cancel",
            PeerMessage::Port { .. } => "port",
        }
    }
}

/// Peer handshake information.
///
/// Initial exchange between peers to establish protocol compatibility
/// and verify info hash matching for torrent verification.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerHandshake {
    /// Protocol identifier string ("BitTorrent protocol")
    pub protocol: String,
    /// Reserved bytes for protocol extensions
    pub reserved: [u8; 8],
    /// Info hash of the torrent being shared
    pub info_hash: InfoHash,
    /// Unique identifier for the peer
    pub peer_id: PeerId,
}

impl PeerHandshake {
    /// Create handshake for BitTorrent protocol.
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            protocol: super::handshake::PROTOCOL_ID.to_string(),
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }
}

/// Lifecycle of one peer wire session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// TCP connection in progress
    #[default]
    Connecting,
    /// Our handshake is sent, waiting for the peer's
    Handshaking,
    /// Interested sent, waiting for the first unchoke
    Interested,
    /// Unchoked at least once; requests flow
    Active,
    Closed,
}
