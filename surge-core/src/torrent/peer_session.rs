//! One peer wire session: handshake, framing and message dispatch.
//!
//! A session downloads from exactly one peer and keeps at most one block
//! request outstanding. It never uploads. Every session of a torrent shares
//! the same [`PieceManager`] and storage, and each ends on its own without
//! affecting the others.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::layout::{BlockId, TorrentLayout};
use super::piece_manager::PieceManager;
use super::protocol::{
    Frame, FrameDecoder, HandshakeCodec, MessageCodec, PeerHandshake, PeerId, PeerMessage,
    SessionState, pieces_in_bitfield,
};
use super::request_queue::RequestQueue;
use super::{InfoHash, PieceIndex, TorrentError};
use crate::storage::BlockStorage;

/// Everything a session shares with the rest of the download.
#[derive(Clone)]
pub struct SessionContext {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub pieces: Arc<PieceManager>,
    pub storage: Arc<dyn BlockStorage>,
    /// Longest silence tolerated from the peer before giving up on it
    pub idle_timeout: Duration,
}

impl SessionContext {
    fn layout(&self) -> &Arc<TorrentLayout> {
        self.pieces.layout()
    }
}

/// Why a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every block of the torrent has been received
    Completed,
    /// Peer choked us; we do not wait for another unchoke
    Choked,
    /// Peer closed the connection, the socket failed or the peer went idle
    Disconnected,
}

/// Summary of one finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub address: SocketAddr,
    pub outcome: SessionOutcome,
    /// Blocks this peer delivered and we stored
    pub blocks_received: usize,
}

/// Ends the session early. Internal: converted into an outcome by `run`.
enum Halt {
    Finished(SessionOutcome),
    Failed(TorrentError),
}

impl From<TorrentError> for Halt {
    fn from(error: TorrentError) -> Self {
        Halt::Failed(error)
    }
}

type Step = Result<(), Halt>;

/// Download session with one peer over any byte stream.
pub struct PeerSession<S> {
    address: SocketAddr,
    stream: S,
    ctx: SessionContext,
    decoder: FrameDecoder,
    queue: RequestQueue,
    state: SessionState,
    /// The single request in flight, if any
    outstanding: Option<BlockId>,
    blocks_received: usize,
}

impl PeerSession<TcpStream> {
    /// Opens a TCP connection to `address`.
    ///
    /// # Errors
    /// - `TorrentError::PeerDisconnected` - Connection refused, failed or timed out
    pub async fn connect(
        address: SocketAddr,
        ctx: SessionContext,
        connect_timeout: Duration,
    ) -> Result<Self, TorrentError> {
        match tokio::time::timeout(connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => Ok(Self::new(address, stream, ctx)),
            Ok(Err(e)) => {
                tracing::debug!("Connection to {} failed: {}", address, e);
                Err(TorrentError::PeerDisconnected { address })
            }
            Err(_) => {
                tracing::debug!("Connection to {} timed out", address);
                Err(TorrentError::PeerDisconnected { address })
            }
        }
    }
}

impl<S> PeerSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps an already connected stream.
    pub fn new(address: SocketAddr, stream: S, ctx: SessionContext) -> Self {
        let layout = Arc::clone(ctx.layout());
        Self {
            address,
            stream,
            decoder: FrameDecoder::new(layout.piece_count()),
            queue: RequestQueue::new(layout),
            ctx,
            state: SessionState::Connecting,
            outstanding: None,
            blocks_received: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session until the torrent completes or the peer is lost.
    ///
    /// Disconnects, idle timeouts and chokes end the session normally and are
    /// reported through [`SessionOutcome`].
    ///
    /// # Errors
    /// - `TorrentError::PeerProtocolViolation` - Malformed frame, wrong info hash or unusable block
    /// - `TorrentError::Storage` - Block could not be written; fatal to the whole download
    pub async fn run(mut self) -> Result<SessionReport, TorrentError> {
        let halt = self.drive().await;
        self.state = SessionState::Closed;

        let outcome = match halt {
            Halt::Finished(outcome) => outcome,
            Halt::Failed(error) => return Err(error),
        };
        tracing::debug!(
            "Session with {} ended ({:?}) after {} blocks",
            self.address,
            outcome,
            self.blocks_received
        );

        Ok(SessionReport {
            address: self.address,
            outcome,
            blocks_received: self.blocks_received,
        })
    }

    async fn drive(&mut self) -> Halt {
        if let Err(halt) = self.send_handshake().await {
            return halt;
        }
        let idle_timeout = self.ctx.idle_timeout;
        let pieces = Arc::clone(&self.ctx.pieces);

        loop {
            if let Err(halt) = self.dispatch_buffered().await {
                return halt;
            }

            let read = tokio::select! {
                biased;
                () = pieces.wait_complete() => {
                    return Halt::Finished(SessionOutcome::Completed);
                }
                read = tokio::time::timeout(
                    idle_timeout,
                    self.stream.read_buf(self.decoder.buffer_mut()),
                ) => read,
            };

            match read {
                Ok(Ok(0)) => {
                    tracing::debug!("Peer {} closed the connection", self.address);
                    return Halt::Finished(SessionOutcome::Disconnected);
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::debug!("Read from {} failed: {}", self.address, e);
                    return Halt::Finished(SessionOutcome::Disconnected);
                }
                Err(_) => {
                    tracing::debug!(
                        "Peer {} idle for {:?}, disconnecting",
                        self.address,
                        idle_timeout
                    );
                    return Halt::Finished(SessionOutcome::Disconnected);
                }
            }
        }
    }

    async fn send_handshake(&mut self) -> Step {
        let handshake = PeerHandshake::new(self.ctx.info_hash, self.ctx.peer_id);
        self.write(&HandshakeCodec::serialize_handshake(&handshake))
            .await?;
        self.state = SessionState::Handshaking;
        Ok(())
    }

    /// Handles every complete frame currently buffered.
    async fn dispatch_buffered(&mut self) -> Step {
        loop {
            let frame = match self.decoder.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(e) => return Err(self.violation(e.to_string())),
            };
            match frame {
                Frame::Handshake(handshake) => self.on_handshake(handshake).await?,
                Frame::Message(message) => self.on_message(message).await?,
            }
        }
    }

    async fn on_handshake(&mut self, handshake: PeerHandshake) -> Step {
        if handshake.info_hash != self.ctx.info_hash {
            return Err(self.violation(format!(
                "handshake for torrent {} instead of {}",
                handshake.info_hash, self.ctx.info_hash
            )));
        }
        tracing::debug!("Handshake with {} complete", self.address);

        self.send(&PeerMessage::Interested).await?;
        self.state = SessionState::Interested;
        Ok(())
    }

    async fn on_message(&mut self, message: PeerMessage) -> Step {
        tracing::trace!("Received {} from {}", message.kind(), self.address);

        match message {
            PeerMessage::Choke => {
                tracing::debug!("Peer {} choked us", self.address);
                Err(Halt::Finished(SessionOutcome::Choked))
            }
            PeerMessage::Unchoke => {
                self.queue.set_choked(false);
                if self.state == SessionState::Interested {
                    self.state = SessionState::Active;
                }
                self.fill_pipeline().await
            }
            PeerMessage::Have { piece_index } => self.on_available([piece_index]).await,
            PeerMessage::Bitfield { bitfield } => {
                let pieces = pieces_in_bitfield(&bitfield, self.ctx.layout().piece_count());
                self.on_available(pieces).await
            }
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => self.on_block(piece_index, offset, data).await,
            PeerMessage::KeepAlive
            | PeerMessage::Interested
            | PeerMessage::NotInterested
            | PeerMessage::Request { .. }
            | PeerMessage::Cancel { .. }
            | PeerMessage::Port { .. } => Ok(()),
        }
    }

    /// Queues newly announced pieces. Only an idle queue triggers a request;
    /// otherwise the next arriving block does.
    async fn on_available(&mut self, pieces: impl IntoIterator<Item = PieceIndex>) -> Step {
        let was_empty = self.queue.is_empty();
        for index in pieces {
            self.queue.enqueue_piece(index);
        }
        if was_empty {
            self.fill_pipeline().await?;
        }
        Ok(())
    }

    async fn on_block(&mut self, index: PieceIndex, offset: u32, data: bytes::Bytes) -> Step {
        let layout = Arc::clone(self.ctx.layout());
        let Some(block) = layout
            .block_at(index, offset)
            .filter(|block| block.length as usize == data.len())
        else {
            return Err(self.violation(format!(
                "unexpected block: piece {index}, offset {offset}, {} bytes",
                data.len()
            )));
        };

        self.ctx
            .storage
            .write_block(layout.absolute_offset(&block), data)
            .await
            .map_err(TorrentError::from)?;
        self.blocks_received += 1;

        if self.ctx.pieces.mark_received(&block) || self.ctx.pieces.is_complete() {
            return Err(Halt::Finished(SessionOutcome::Completed));
        }

        // Unsolicited or duplicate blocks are kept but leave our request in flight.
        if self.outstanding != Some(block) {
            tracing::debug!("Peer {} sent unrequested block {:?}", self.address, block);
            return Ok(());
        }
        self.outstanding = None;
        self.fill_pipeline().await
    }

    /// Requests the first queued block still needed, unless choked or a
    /// request is already outstanding.
    async fn fill_pipeline(&mut self) -> Step {
        if self.queue.is_choked() || self.outstanding.is_some() {
            return Ok(());
        }

        while let Some(block) = self.queue.dequeue() {
            if !self.ctx.pieces.needed(&block) {
                continue;
            }
            // Marked before the write so no other session claims it meanwhile.
            self.ctx.pieces.mark_requested(&block);
            self.outstanding = Some(block);
            self.send(&PeerMessage::Request {
                piece_index: block.piece_index,
                offset: block.begin,
                length: block.length,
            })
            .await?;
            return Ok(());
        }
        Ok(())
    }

    async fn send(&mut self, message: &PeerMessage) -> Step {
        self.write(&MessageCodec::serialize_message(message)).await
    }

    async fn write(&mut self, bytes: &[u8]) -> Step {
        self.stream.write_all(bytes).await.map_err(|e| {
            tracing::debug!("Write to {} failed: {}", self.address, e);
            Halt::Finished(SessionOutcome::Disconnected)
        })
    }

    fn violation(&self, reason: String) -> Halt {
        tracing::warn!("Peer {} violated the protocol: {}", self.address, reason);
        Halt::Failed(TorrentError::PeerProtocolViolation {
            address: self.address,
            reason,
        })
    }
}
