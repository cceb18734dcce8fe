//! Torrent-wide block bookkeeping shared by every peer session.
//!
//! Tracks which blocks have been requested and which have arrived. Blocks
//! are handed out at most once until the whole torrent has been requested;
//! after that, anything still missing becomes requestable again so stalled
//! peers cannot wedge the download.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::layout::{BlockId, TorrentLayout};
use super::PieceIndex;

/// Snapshot of download progress in blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub received: usize,
    pub total: usize,
}

impl Progress {
    /// Completed fraction in percent.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.received as f64 * 100.0 / self.total as f64
    }
}

#[derive(Debug)]
struct BlockState {
    requested: Vec<Vec<bool>>,
    received: Vec<Vec<bool>>,
    requested_count: usize,
    received_count: usize,
}

/// Shared requested/received state for one torrent.
///
/// Every operation takes the internal lock for its whole duration, so
/// concurrent sessions observe each operation atomically. The lock is never
/// held across an await point.
#[derive(Debug)]
pub struct PieceManager {
    layout: Arc<TorrentLayout>,
    state: Mutex<BlockState>,
    total_blocks: usize,
    completion: watch::Sender<bool>,
}

impl PieceManager {
    pub fn new(layout: Arc<TorrentLayout>) -> Self {
        let matrix: Vec<Vec<bool>> = (0..layout.piece_count())
            .map(|index| {
                let blocks = layout.blocks_in_piece(PieceIndex::new(index)).unwrap_or(0);
                vec![false; blocks as usize]
            })
            .collect();
        let total_blocks = layout.total_blocks();
        let (completion, _) = watch::channel(total_blocks == 0);

        Self {
            layout,
            state: Mutex::new(BlockState {
                requested: matrix.clone(),
                received: matrix,
                requested_count: 0,
                received_count: 0,
            }),
            total_blocks,
            completion,
        }
    }

    /// Matrix coordinates of a block that belongs to this torrent.
    fn slot(&self, block: &BlockId) -> Option<(usize, usize)> {
        let expected = self.layout.block_at(block.piece_index, block.begin)?;
        (expected == *block).then(|| (block.piece_index.as_usize(), block.block_index()))
    }

    /// Records that a request for `block` is in flight.
    pub fn mark_requested(&self, block: &BlockId) {
        let Some((piece, index)) = self.slot(block) else {
            return;
        };
        let mut state = self.state.lock();
        if !state.requested[piece][index] {
            state.requested[piece][index] = true;
            state.requested_count += 1;
        }
    }

    /// Records that `block` has been written to storage.
    ///
    /// Idempotent. Returns true only for the call that completed the torrent,
    /// which is also the only call that fires the completion signal.
    pub fn mark_received(&self, block: &BlockId) -> bool {
        let Some((piece, index)) = self.slot(block) else {
            return false;
        };

        let completed = {
            let mut state = self.state.lock();
            if state.received[piece][index] {
                return false;
            }
            state.received[piece][index] = true;
            state.received_count += 1;
            if !state.requested[piece][index] {
                state.requested[piece][index] = true;
                state.requested_count += 1;
            }
            state.received_count == self.total_blocks
        };

        if completed {
            self.completion.send_if_modified(|done| !std::mem::replace(done, true));
            tracing::info!("All {} blocks received", self.total_blocks);
        }
        completed
    }

    /// Whether `block` should be requested now.
    ///
    /// Once every block has been requested at least once, the requested set
    /// is reset to the received set, so blocks whose requests went nowhere
    /// are handed out again. Near the end this can put the same block in
    /// flight on several peers.
    pub fn needed(&self, block: &BlockId) -> bool {
        let Some((piece, index)) = self.slot(block) else {
            return false;
        };
        let mut state = self.state.lock();
        if state.requested_count == self.total_blocks {
            state.requested = state.received.clone();
            state.requested_count = state.received_count;
            tracing::debug!(
                "Every block requested, re-opening {} outstanding blocks",
                self.total_blocks - state.received_count
            );
        }
        !state.requested[piece][index]
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().received_count == self.total_blocks
    }

    pub fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    pub fn received_block_count(&self) -> usize {
        self.state.lock().received_count
    }

    pub fn progress(&self) -> Progress {
        Progress {
            received: self.received_block_count(),
            total: self.total_blocks,
        }
    }

    /// Resolves once every block has been received.
    pub async fn wait_complete(&self) {
        let mut completion = self.completion.subscribe();
        // The sender lives as long as `self`, so this only returns on completion.
        let _ = completion.wait_for(|done| *done).await;
    }

    pub fn layout(&self) -> &Arc<TorrentLayout> {
        &self.layout
    }
}
