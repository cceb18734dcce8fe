//! Per-peer FIFO of blocks the peer can serve.

use std::collections::VecDeque;
use std::sync::Arc;

use super::PieceIndex;
use super::layout::{BlockId, TorrentLayout};

/// Blocks announced by one peer, in announcement order, plus whether that
/// peer is currently choking us.
#[derive(Debug)]
pub struct RequestQueue {
    layout: Arc<TorrentLayout>,
    pending: VecDeque<BlockId>,
    choked: bool,
}

impl RequestQueue {
    /// Empty queue; peers start out choking us.
    pub fn new(layout: Arc<TorrentLayout>) -> Self {
        Self {
            layout,
            pending: VecDeque::new(),
            choked: true,
        }
    }

    /// Appends every block of the piece in offset order. Indices past the
    /// end of the torrent are ignored.
    pub fn enqueue_piece(&mut self, index: PieceIndex) {
        let before = self.pending.len();
        self.pending.extend(self.layout.blocks(index));
        if self.pending.len() == before {
            tracing::debug!("Ignoring out-of-range piece {}", index);
        }
    }

    pub fn dequeue(&mut self) -> Option<BlockId> {
        self.pending.pop_front()
    }

    pub fn peek(&self) -> Option<&BlockId> {
        self.pending.front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_choked(&self) -> bool {
        self.choked
    }

    pub fn set_choked(&mut self, choked: bool) {
        self.choked = choked;
    }
}
