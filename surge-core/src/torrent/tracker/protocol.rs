//! BitTorrent tracker protocol utilities and constants

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::torrent::TorrentError;
use crate::torrent::fields::FieldReader;

/// BitTorrent tracker protocol constants
pub mod constants {
    /// Compact peer response format (6 bytes per peer)
    pub const COMPACT_PEER_SIZE: usize = 6;

    /// Magic connection id sent in every UDP connect request (BEP 15)
    pub const UDP_PROTOCOL_ID: u64 = 0x41727101980;

    pub const UDP_ACTION_CONNECT: u32 = 0;
    pub const UDP_ACTION_ANNOUNCE: u32 = 1;
    pub const UDP_ACTION_ERROR: u32 = 3;

    pub const UDP_CONNECT_REQUEST_LEN: usize = 16;
    pub const UDP_CONNECT_RESPONSE_LEN: usize = 16;
    pub const UDP_ANNOUNCE_REQUEST_LEN: usize = 98;
    pub const UDP_ANNOUNCE_HEADER_LEN: usize = 20;

    /// Largest datagram we expect back from a tracker
    pub const UDP_MAX_DATAGRAM: usize = 2048;
}

/// Decodes a compact peer list: 4 bytes IPv4 then 2 bytes port, big-endian.
///
/// # Errors
/// - `TorrentError::ProtocolError` - Data length not a multiple of 6 bytes
pub fn parse_compact_peers(peer_bytes: &[u8]) -> Result<Vec<SocketAddr>, TorrentError> {
    if !peer_bytes.len().is_multiple_of(constants::COMPACT_PEER_SIZE) {
        return Err(TorrentError::ProtocolError {
            message: format!("Invalid compact peer data length: {}", peer_bytes.len()),
        });
    }

    let mut reader = FieldReader::new(peer_bytes);
    let mut peers = Vec::with_capacity(peer_bytes.len() / constants::COMPACT_PEER_SIZE);
    while reader.remaining() > 0 {
        let ip = Ipv4Addr::from(reader.read_u32()?);
        let port = reader.read_u16()?;
        peers.push(SocketAddr::V4(SocketAddrV4::new(ip, port)));
    }

    Ok(peers)
}
