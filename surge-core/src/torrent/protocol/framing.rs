//! Reassembly of peer wire frames from an arbitrarily chunked byte stream.
//!
//! TCP reads split and merge frames freely. [`FrameDecoder`] buffers incoming
//! bytes and yields only complete frames, decoded once into [`Frame`]. The
//! first frame on a connection must be the handshake; everything after is
//! length-prefixed.

use bytes::{Buf, BytesMut};

use super::handshake::{FrameKind, HANDSHAKE_OVERHEAD, HandshakeCodec};
use super::messages::MessageCodec;
use super::types::{PeerHandshake, PeerMessage};
use crate::torrent::TorrentError;
use crate::torrent::layout::BLOCK_LEN;

/// Largest non-bitfield frame accepted: a Piece header plus a doubled block.
const MAX_MESSAGE_FRAME: usize = 4 + 9 + 2 * BLOCK_LEN as usize;

/// One complete frame from a peer.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Handshake(PeerHandshake),
    Message(PeerMessage),
}

/// Incremental frame decoder for one peer connection.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    expect_handshake: bool,
    max_frame_len: usize,
}

impl FrameDecoder {
    /// Creates a decoder for a fresh connection to a torrent of `piece_count` pieces.
    ///
    /// The frame ceiling grows with the bitfield so large torrents are not
    /// mistaken for hostile peers.
    pub fn new(piece_count: u32) -> Self {
        let bitfield_frame = 4 + 1 + piece_count.div_ceil(8) as usize;
        Self {
            buf: BytesMut::with_capacity(MAX_MESSAGE_FRAME),
            expect_handshake: true,
            max_frame_len: MAX_MESSAGE_FRAME.max(bitfield_frame),
        }
    }

    /// Buffer that socket reads append into.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Bytes received but not yet consumed as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Extracts the next complete frame, or `None` until more bytes arrive.
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - First frame is not a handshake, a frame
    ///   exceeds the size ceiling, or a frame fails to decode
    pub fn next_frame(&mut self) -> Result<Option<Frame>, TorrentError> {
        let Some(frame_len) = self.pending_frame_len()? else {
            return Ok(None);
        };
        if self.buf.len() < frame_len {
            self.buf.reserve(frame_len - self.buf.len());
            return Ok(None);
        }

        let raw = self.buf.split_to(frame_len).freeze();
        if self.expect_handshake {
            if HandshakeCodec::classify(&raw) != FrameKind::Handshake {
                return Err(TorrentError::ProtocolError {
                    message: "Peer did not open with a BitTorrent handshake".to_string(),
                });
            }
            self.expect_handshake = false;
            return Ok(Some(Frame::Handshake(
                HandshakeCodec::deserialize_handshake(&raw)?,
            )));
        }

        Ok(Some(Frame::Message(MessageCodec::deserialize_message(
            &raw,
        )?)))
    }

    /// Total length of the frame at the head of the buffer, once its header is in.
    fn pending_frame_len(&self) -> Result<Option<usize>, TorrentError> {
        if self.expect_handshake {
            return Ok(self
                .buf
                .first()
                .map(|&pstrlen| pstrlen as usize + HANDSHAKE_OVERHEAD));
        }

        if self.buf.len() < 4 {
            return Ok(None);
        }
        let frame_len = 4 + (&self.buf[..4]).get_u32() as usize;
        if frame_len > self.max_frame_len {
            return Err(TorrentError::ProtocolError {
                message: format!(
                    "Frame of {frame_len} bytes exceeds limit of {}",
                    self.max_frame_len
                ),
            });
        }
        Ok(Some(frame_len))
    }
}
