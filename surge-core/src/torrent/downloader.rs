//! Download orchestration for one torrent.
//!
//! Discovers peers, runs one session per peer against shared block state and
//! flat storage, waits for completion and splits the result into the
//! torrent's files.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use super::layout::TorrentLayout;
use super::parsing::TorrentMetadata;
use super::peer_session::{PeerSession, SessionContext, SessionReport};
use super::piece_manager::PieceManager;
use super::protocol::PeerId;
use super::tracker::{AnnounceRequest, PeerDiscovery};
use super::TorrentError;
use crate::config::SurgeConfig;
use crate::storage::{BlockStorage, FlatStorage, StorageError, split_into_files};

type SessionSet = JoinSet<Result<SessionReport, TorrentError>>;

/// Result of a completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    /// Files written, in torrent order
    pub files: Vec<PathBuf>,
    pub total_bytes: u64,
    /// Peers a session was started with
    pub peers_used: usize,
}

/// Downloads one torrent from the swarm.
pub struct Downloader {
    metadata: TorrentMetadata,
    layout: Arc<TorrentLayout>,
    config: SurgeConfig,
    peer_id: PeerId,
}

impl Downloader {
    /// Prepares a download of `metadata`.
    ///
    /// # Errors
    /// - `TorrentError::InvalidTorrentFile` - Piece geometry inconsistent with the file table
    pub fn new(metadata: TorrentMetadata, config: SurgeConfig) -> Result<Self, TorrentError> {
        let layout = Arc::new(TorrentLayout::from_metadata(&metadata)?);
        let peer_id = PeerId::with_prefix(config.torrent.client_id);

        Ok(Self {
            metadata,
            layout,
            config,
            peer_id,
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn metadata(&self) -> &TorrentMetadata {
        &self.metadata
    }

    /// Location of the in-progress flat file.
    pub fn partial_path(&self) -> PathBuf {
        self.config.storage.work_dir.join(format!(
            "{}{}",
            self.metadata.info_hash, self.config.storage.partial_suffix
        ))
    }

    /// Finds peers through every announce URL, then downloads into `output_dir`.
    ///
    /// # Errors
    /// - `TorrentError::NoPeersFound` - No tracker returned a peer
    /// - See [`Downloader::download_from_peers`]
    pub async fn download(&self, output_dir: &Path) -> Result<DownloadReport, TorrentError> {
        let discovery =
            PeerDiscovery::from_announce_urls(&self.metadata.announce_urls, &self.config.network);
        let request = AnnounceRequest::starting(
            self.metadata.info_hash,
            self.peer_id,
            self.config.network.listen_port,
            self.metadata.total_length,
        );

        tracing::info!(
            "Announcing {} to {} trackers",
            self.metadata.name,
            discovery.tracker_count()
        );
        let peers = discovery.discover(&request).await?;
        tracing::info!("Discovered {} peers", peers.len());

        self.download_from_peers(&peers, output_dir).await
    }

    /// Downloads from an already known peer list into `output_dir`.
    ///
    /// The flat file is removed only after a successful split. On failure it
    /// stays in the work directory.
    ///
    /// # Errors
    /// - `TorrentError::NoPeersFound` - `peers` is empty
    /// - `TorrentError::DownloadIncomplete` - Every session ended before the torrent completed
    /// - `TorrentError::Storage` - Flat file or output files could not be written
    pub async fn download_from_peers(
        &self,
        peers: &[SocketAddr],
        output_dir: &Path,
    ) -> Result<DownloadReport, TorrentError> {
        if peers.is_empty() {
            return Err(TorrentError::NoPeersFound);
        }

        tokio::fs::create_dir_all(&self.config.storage.work_dir)
            .await
            .map_err(StorageError::from)?;
        let storage = FlatStorage::create(self.partial_path(), self.layout.total_length()).await?;

        self.download_into(peers, Arc::new(storage), output_dir).await
    }

    /// Runs sessions against `storage` until completion, then splits the
    /// flat file into `output_dir`.
    async fn download_into(
        &self,
        peers: &[SocketAddr],
        storage: Arc<dyn BlockStorage>,
        output_dir: &Path,
    ) -> Result<DownloadReport, TorrentError> {
        let pieces = Arc::new(PieceManager::new(Arc::clone(&self.layout)));
        let selected = &peers[..peers.len().min(self.config.network.max_peer_connections)];
        let mut sessions = self.spawn_sessions(selected, &pieces, &storage);
        tracing::info!(
            "Downloading {} ({} bytes, {} blocks) from {} peers",
            self.metadata.name,
            self.layout.total_length(),
            pieces.total_blocks(),
            selected.len()
        );

        let supervised = self.supervise(&mut sessions, &pieces).await;
        sessions.shutdown().await;
        supervised?;

        storage.sync().await?;
        drop(storage);

        let flat_path = self.partial_path();
        let files = split_into_files(&flat_path, &self.metadata.files, output_dir).await?;
        tokio::fs::remove_file(&flat_path)
            .await
            .map_err(StorageError::from)?;
        tracing::info!(
            "Download of {} complete: {} files written",
            self.metadata.name,
            files.len()
        );

        Ok(DownloadReport {
            files,
            total_bytes: self.layout.total_length(),
            peers_used: selected.len(),
        })
    }

    fn spawn_sessions(
        &self,
        peers: &[SocketAddr],
        pieces: &Arc<PieceManager>,
        storage: &Arc<dyn BlockStorage>,
    ) -> SessionSet {
        let ctx = SessionContext {
            info_hash: self.metadata.info_hash,
            peer_id: self.peer_id,
            pieces: Arc::clone(pieces),
            storage: Arc::clone(storage),
            idle_timeout: self.config.network.peer_idle_timeout,
        };
        let connect_timeout = self.config.network.peer_connect_timeout;

        let mut sessions = JoinSet::new();
        for &address in peers {
            let ctx = ctx.clone();
            sessions.spawn(async move {
                PeerSession::connect(address, ctx, connect_timeout)
                    .await?
                    .run()
                    .await
            });
        }
        sessions
    }

    /// Waits for completion, a fatal session error, or every session ending.
    async fn supervise(
        &self,
        sessions: &mut SessionSet,
        pieces: &PieceManager,
    ) -> Result<(), TorrentError> {
        let mut progress_tick = tokio::time::interval(self.config.network.progress_interval);
        progress_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        progress_tick.tick().await;

        loop {
            tokio::select! {
                biased;
                () = pieces.wait_complete() => return Ok(()),
                joined = sessions.join_next() => match joined {
                    None => {
                        let progress = pieces.progress();
                        tracing::warn!(
                            "Every peer session ended with {}/{} blocks received",
                            progress.received,
                            progress.total
                        );
                        return Err(TorrentError::DownloadIncomplete {
                            received: progress.received,
                            total: progress.total,
                        });
                    }
                    Some(Ok(Ok(report))) => tracing::debug!(
                        "Peer {} finished ({:?}, {} blocks)",
                        report.address,
                        report.outcome,
                        report.blocks_received
                    ),
                    Some(Ok(Err(e))) if e.is_fatal() => {
                        tracing::warn!("Aborting download: {}", e);
                        return Err(e);
                    }
                    Some(Ok(Err(e))) => tracing::debug!("Peer session failed: {}", e),
                    Some(Err(e)) => tracing::warn!("Peer session task failed: {}", e),
                },
                _ = progress_tick.tick() => {
                    let progress = pieces.progress();
                    tracing::info!(
                        "Progress: {}/{} blocks ({:.1}%), {} sessions active",
                        progress.received,
                        progress.total,
                        progress.percent(),
                        sessions.len()
                    );
                }
            }
        }
    }
}
