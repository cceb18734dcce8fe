//! BitTorrent wire protocol message serialization and deserialization

use bytes::{BufMut, Bytes, BytesMut};

use super::types::PeerMessage;
use crate::torrent::fields::FieldReader;
use crate::torrent::{PieceIndex, TorrentError};

/// Message serialization utilities for BitTorrent wire protocol.
pub struct MessageCodec;

impl MessageCodec {
    /// Serializes peer message following BEP 3
    pub fn serialize_message(message: &PeerMessage) -> BytesMut {
        let mut buf = BytesMut::new();

        match message {
            PeerMessage::KeepAlive => {
                buf.put_u32(0);
            }
            PeerMessage::Choke => {
                buf.put_u32(1);
                buf.put_u8(0);
            }
            PeerMessage::Unchoke => {
                buf.put_u32(1);
                buf.put_u8(1);
            }
            PeerMessage::Interested => {
                buf.put_u32(1);
                buf.put_u8(2);
            }
            PeerMessage::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(3);
            }
            PeerMessage::Have { piece_index } => {
                buf.put_u32(5);
                buf.put_u8(4);
                buf.put_u32(piece_index.as_u32());
            }
            PeerMessage::Bitfield { bitfield } => {
                buf.put_u32(1 + bitfield.len() as u32);
                buf.put_u8(5);
                buf.put_slice(bitfield);
            }
            PeerMessage::Request {
                piece_index,
                offset,
                length,
            } => {
                buf.put_u32(13);
                buf.put_u8(6);
                buf.put_u32(piece_index.as_u32());
                buf.put_u32(*offset);
                buf.put_u32(*length);
            }
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => {
                buf.put_u32(9 + data.len() as u32);
                buf.put_u8(7);
                buf.put_u32(piece_index.as_u32());
                buf.put_u32(*offset);
                buf.put_slice(data);
            }
            PeerMessage::Cancel {
                piece_index,
                offset,
                length,
            } => {
                buf.put_u32(13);
                buf.put_u8(8);
                buf.put_u32(piece_index.as_u32());
                buf.put_u32(*offset);
                buf.put_u32(*length);
            }
            PeerMessage::Port { port } => {
                buf.put_u32(3);
                buf.put_u8(9);
                buf.put_u16(*port);
            }
        }

        buf
    }

    /// Deserializes one complete length-prefixed frame following BEP 3
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Unknown id or payload size wrong for the id
    /// - `TorrentError::Truncated` - Frame shorter than its length prefix
    pub fn deserialize_message(data: &[u8]) -> Result<PeerMessage, TorrentError> {
        let mut frame = FieldReader::new(data);
        let length = frame.read_u32()? as usize;
        if length == 0 {
            return Ok(PeerMessage::KeepAlive);
        }

        let mut body = FieldReader::new(frame.read_bytes(length)?);
        let message_id = body.read_u8()?;
        let payload_len = length - 1;

        let expect_len = |expected: usize, name: &str| {
            if payload_len == expected {
                Ok(())
            } else {
                Err(TorrentError::ProtocolError {
                    message: format!("Invalid {name} message length: {length}"),
                })
            }
        };

        match message_id {
            0 => expect_len(0, "Choke").map(|_| PeerMessage::Choke),
            1 => expect_len(0, "Unchoke").map(|_| PeerMessage::Unchoke),
            2 => expect_len(0, "Interested").map(|_| PeerMessage::Interested),
            3 => expect_len(0, "NotInterested").map(|_| PeerMessage::NotInterested),
            4 => {
                expect_len(4, "Have")?;
                let piece_index = PieceIndex::new(body.read_u32()?);
                Ok(PeerMessage::Have { piece_index })
            }
            5 => Ok(PeerMessage::Bitfield {
                bitfield: Bytes::copy_from_slice(body.rest()),
            }),
            6 | 8 => {
                expect_len(12, if message_id == 6 { "Request" } else { "Cancel" })?;
                let piece_index = PieceIndex::new(body.read_u32()?);
                let offset = body.read_u32()?;
                let length = body.read_u32()?;
                Ok(if message_id == 6 {
                    PeerMessage::Request {
                        piece_index,
                        offset,
                        length,
                    }
                } else {
                    PeerMessage::Cancel {
                        piece_index,
                        offset,
                        length,
                    }
                })
            }
            7 => {
                if payload_len < 8 {
                    return Err(TorrentError::ProtocolError {
                        message: "Invalid Piece message length".to_string(),
                    });
                }
                let piece_index = PieceIndex::new(body.read_u32()?);
                let offset = body.read_u32()?;
                Ok(PeerMessage::Piece {
                    piece_index,
                    offset,
                    data: Bytes::copy_from_slice(body.rest()),
                })
            }
            9 => {
                expect_len(2, "Port")?;
                Ok(PeerMessage::Port {
                    port: body.read_u16()?,
                })
            }
            _ => Err(TorrentError::ProtocolError {
                message: format!("Unknown message ID: {message_id}"),
            }),
        }
    }
}

/// Pieces marked present in a bitfield, in ascending order.
///
/// Bit 7 of byte 0 is piece 0. Spare bits past `piece_count` are ignored.
pub fn pieces_in_bitfield(bitfield: &[u8], piece_count: u32) -> Vec<PieceIndex> {
    bitfield
        .iter()
        .enumerate()
        .flat_map(|(byte_index, &byte)| {
            (0..8u32).filter_map(move |bit| {
                let index = byte_index as u64 * 8 + u64::from(bit);
                let set = byte & (0x80 >> bit) != 0;
                (set && index < u64::from(piece_count)).then(|| PieceIndex::new(index as u32))
            })
        })
        .collect()
}
