//! BitTorrent handshake serialization, recognition and deserialization

use bytes::{BufMut, BytesMut};

use super::types::{PeerHandshake, PeerId};
use crate::torrent::fields::FieldReader;
use crate::torrent::{InfoHash, TorrentError};

/// Protocol identifier carried in every handshake.
pub const PROTOCOL_ID: &str = "BitTorrent protocol";

/// Handshake bytes beyond the protocol string: length byte, reserved, info hash, peer id.
pub const HANDSHAKE_OVERHEAD: usize = 1 + 8 + 20 + 20;

/// Size of a handshake carrying the standard protocol string.
pub const HANDSHAKE_LEN: usize = HANDSHAKE_OVERHEAD + PROTOCOL_ID.len();

/// Shape of one complete frame pulled off a peer stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Handshake,
    Message,
}

/// Handshake serialization utilities for BitTorrent wire protocol.
pub struct HandshakeCodec;

impl HandshakeCodec {
    /// Serializes handshake message following BEP 3
    pub fn serialize_handshake(handshake: &PeerHandshake) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_OVERHEAD + handshake.protocol.len());
        buf.put_u8(handshake.protocol.len() as u8);
        buf.put_slice(handshake.protocol.as_bytes());
        buf.put_slice(&handshake.reserved);
        buf.put_slice(handshake.info_hash.as_bytes());
        buf.put_slice(handshake.peer_id.as_bytes());
        buf
    }

    /// Classifies a complete frame by its structure.
    ///
    /// A frame is a handshake when its length equals the first byte plus the
    /// fixed overhead and the protocol string is the BitTorrent identifier.
    /// Anything else is a length-prefixed message.
    pub fn classify(frame: &[u8]) -> FrameKind {
        match frame.first() {
            Some(&pstrlen)
                if frame.len() == pstrlen as usize + HANDSHAKE_OVERHEAD
                    && &frame[1..1 + pstrlen as usize] == PROTOCOL_ID.as_bytes() =>
            {
                FrameKind::Handshake
            }
            _ => FrameKind::Message,
        }
    }

    /// Deserializes handshake message following BEP 3
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Unknown protocol string
    /// - `TorrentError::Truncated` - Frame shorter than its declared layout
    pub fn deserialize_handshake(data: &[u8]) -> Result<PeerHandshake, TorrentError> {
        if Self::classify(data) != FrameKind::Handshake {
            return Err(TorrentError::ProtocolError {
                message: "Frame is not a BitTorrent handshake".to_string(),
            });
        }

        let mut reader = FieldReader::new(data);
        let pstrlen = reader.read_u8()? as usize;
        let protocol = String::from_utf8_lossy(reader.read_bytes(pstrlen)?).to_string();
        let reserved = reader.read_array::<8>()?;
        let info_hash = InfoHash::new(reader.read_array::<20>()?);
        let peer_id = PeerId::new(reader.read_array::<20>()?);

        Ok(PeerHandshake {
            protocol,
            reserved,
            info_hash,
            peer_id,
        })
    }
}
