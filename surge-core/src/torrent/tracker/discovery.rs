//! Concurrent peer discovery across every announce endpoint of a torrent.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};

use super::http::HttpTrackerClient;
use super::types::{AnnounceRequest, TrackerClient};
use super::udp::UdpTrackerClient;
use crate::config::NetworkConfig;
use crate::torrent::TorrentError;

/// Builds the client matching an announce URL's scheme.
///
/// # Errors
/// - `TorrentError::TrackerUnavailable` - Scheme other than http, https or udp
/// - `TorrentError::UrlParsing` - Malformed URL
pub fn tracker_for_url(
    announce_url: &str,
    config: &NetworkConfig,
) -> Result<Arc<dyn TrackerClient>, TorrentError> {
    let scheme = url::Url::parse(announce_url)?.scheme().to_string();
    match scheme.as_str() {
        "http" | "https" => Ok(Arc::new(HttpTrackerClient::new(
            announce_url.to_string(),
            config,
        )?)),
        "udp" => Ok(Arc::new(UdpTrackerClient::new(
            announce_url.to_string(),
            config,
        )?)),
        other => Err(TorrentError::TrackerUnavailable {
            url: announce_url.to_string(),
            reason: format!("Unsupported tracker scheme: {other}"),
        }),
    }
}

/// Fans one announce out to every tracker and collects the peers they return.
pub struct PeerDiscovery {
    trackers: Vec<Arc<dyn TrackerClient>>,
    min_peers: usize,
}

impl PeerDiscovery {
    /// Builds a client for every usable announce URL. Unusable URLs are logged
    /// and skipped.
    pub fn from_announce_urls(announce_urls: &[String], config: &NetworkConfig) -> Self {
        let trackers = announce_urls
            .iter()
            .filter_map(|url| match tracker_for_url(url, config) {
                Ok(tracker) => Some(tracker),
                Err(e) => {
                    tracing::warn!("Skipping tracker {}: {}", url, e);
                    None
                }
            })
            .collect();

        Self::with_clients(trackers, config)
    }

    /// Discovery over an explicit set of tracker clients.
    pub fn with_clients(trackers: Vec<Arc<dyn TrackerClient>>, config: &NetworkConfig) -> Self {
        Self {
            trackers,
            min_peers: config.min_peers.max(1),
        }
    }

    pub fn tracker_count(&self) -> usize {
        self.trackers.len()
    }

    /// Announces to every tracker at once and returns the distinct peers in
    /// the order they were first reported.
    ///
    /// Returns as soon as `min_peers` distinct peers are known or every
    /// tracker has answered or failed. Each client enforces its own timeout.
    /// Queries still in flight at that point are dropped.
    ///
    /// # Errors
    /// - `TorrentError::NoPeersFound` - No tracker returned any peer
    pub async fn discover(
        &self,
        request: &AnnounceRequest,
    ) -> Result<Vec<SocketAddr>, TorrentError> {
        let mut queries: FuturesUnordered<_> = self
            .trackers
            .iter()
            .map(|tracker| async move {
                let result = tracker.announce(request).await;
                (tracker.tracker_url(), result)
            })
            .collect();

        let mut seen = HashSet::new();
        let mut peers = Vec::new();

        while let Some((url, result)) = queries.next().await {
            match result {
                Ok(response) => {
                    let before = peers.len();
                    peers.extend(
                        response
                            .peers
                            .into_iter()
                            .filter(|peer| seen.insert(*peer)),
                    );
                    tracing::info!(
                        "Tracker {} returned {} new peers ({} total)",
                        url,
                        peers.len() - before,
                        peers.len()
                    );
                }
                Err(e) => tracing::warn!("Tracker {} failed: {}", url, e),
            }

            if peers.len() >= self.min_peers {
                tracing::debug!(
                    "Reached {} peers, abandoning {} outstanding tracker queries",
                    peers.len(),
                    queries.len()
                );
                break;
            }
        }

        if peers.is_empty() {
            return Err(TorrentError::NoPeersFound);
        }
        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::torrent::InfoHash;
    use crate::torrent::protocol::PeerId;
    use crate::torrent::tracker::AnnounceResponse;

    enum Behavior {
        Peers(Vec<&'static str>),
        Fail,
        /// Gives up after 100 ms, as a real client's timeout would
        TimesOut,
        Hang,
    }

    struct StubTracker {
        url: String,
        behavior: Behavior,
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    impl StubTracker {
        fn new(url: &str, behavior: Behavior) -> Self {
            Self {
                url: url.to_string(),
                behavior,
                delay: Duration::ZERO,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl TrackerClient for StubTracker {
        async fn announce(
            &self,
            _request: &AnnounceRequest,
        ) -> Result<AnnounceResponse, TorrentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match &self.behavior {
                Behavior::Peers(peers) => Ok(AnnounceResponse {
                    peers: peers.iter().map(|p| p.parse().unwrap()).collect(),
                    ..Default::default()
                }),
                Behavior::Fail => Err(TorrentError::TrackerUnavailable {
                    url: self.url.clone(),
                    reason: "stub failure".to_string(),
                }),
                Behavior::TimesOut => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Err(TorrentError::TrackerUnavailable {
                        url: self.url.clone(),
                        reason: "Request timed out".to_string(),
                    })
                }
                Behavior::Hang => std::future::pending().await,
            }
        }

        fn tracker_url(&self) -> &str {
            &self.url
        }
    }

    fn request() -> AnnounceRequest {
        AnnounceRequest::starting(InfoHash::new([1; 20]), PeerId::new([2; 20]), 6881, 100)
    }

    fn config(min_peers: usize) -> NetworkConfig {
        NetworkConfig {
            min_peers,
            tracker_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_peers_deduplicated_across_trackers() {
        let discovery = PeerDiscovery::with_clients(
            vec![
                Arc::new(StubTracker::new(
                    "a",
                    Behavior::Peers(vec!["10.0.0.1:1", "10.0.0.2:2"]),
                )),
                Arc::new(
                    StubTracker::new("b", Behavior::Peers(vec!["10.0.0.2:2", "10.0.0.3:3"]))
                        .delayed(Duration::from_millis(20)),
                ),
            ],
            &config(50),
        );

        let peers = discovery.discover(&request()).await.unwrap();
        let expected: Vec<SocketAddr> = ["10.0.0.1:1", "10.0.0.2:2", "10.0.0.3:3"]
            .iter()
            .map(|p| p.parse().unwrap())
            .collect();
        assert_eq!(peers, expected);
    }

    #[tokio::test]
    async fn test_failures_and_timeouts_skipped() {
        let discovery = PeerDiscovery::with_clients(
            vec![
                Arc::new(StubTracker::new("fail", Behavior::Fail)),
                Arc::new(StubTracker::new("slow", Behavior::TimesOut)),
                Arc::new(StubTracker::new("ok", Behavior::Peers(vec!["10.0.0.9:9"]))),
            ],
            &config(50),
        );

        let peers = discovery.discover(&request()).await.unwrap();
        assert_eq!(peers, vec!["10.0.0.9:9".parse::<SocketAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn test_slow_tracker_answer_not_cut_short() {
        // Slower than `tracker_timeout`: only the client decides when to give up.
        let discovery = PeerDiscovery::with_clients(
            vec![Arc::new(
                StubTracker::new("slow", Behavior::Peers(vec!["10.0.0.4:4"]))
                    .delayed(Duration::from_millis(400)),
            )],
            &config(1),
        );

        let peers = discovery.discover(&request()).await.unwrap();
        assert_eq!(peers, vec!["10.0.0.4:4".parse::<SocketAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn test_stops_at_min_peers() {
        let discovery = PeerDiscovery::with_clients(
            vec![
                Arc::new(StubTracker::new(
                    "fast",
                    Behavior::Peers(vec!["10.0.0.1:1", "10.0.0.2:2"]),
                )),
                Arc::new(StubTracker::new("hang", Behavior::Hang)),
            ],
            &NetworkConfig {
                min_peers: 2,
                tracker_timeout: Duration::from_secs(30),
                ..Default::default()
            },
        );

        let peers = tokio::time::timeout(Duration::from_secs(5), discovery.discover(&request()))
            .await
            .expect("discovery should finish without waiting on the hung tracker")
            .unwrap();
        assert_eq!(peers.len(), 2);
    }

    #[tokio::test]
    async fn test_no_peers_found() {
        let discovery = PeerDiscovery::with_clients(
            vec![
                Arc::new(StubTracker::new("fail", Behavior::Fail)),
                Arc::new(StubTracker::new("empty", Behavior::Peers(vec![]))),
            ],
            &config(5),
        );

        assert!(matches!(
            discovery.discover(&request()).await,
            Err(TorrentError::NoPeersFound)
        ));
    }

    #[tokio::test]
    async fn test_every_tracker_queried_once() {
        let tracker = StubTracker::new("a", Behavior::Peers(vec!["10.0.0.1:1"]));
        let calls = Arc::clone(&tracker.calls);
        let discovery = PeerDiscovery::with_clients(vec![Arc::new(tracker)], &config(5));

        discovery.discover(&request()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsupported_schemes_skipped() {
        let urls = vec![
            "http://tracker.example.com/announce".to_string(),
            "wss://tracker.example.com".to_string(),
            "udp://tracker.example.com:6969".to_string(),
            "garbage".to_string(),
        ];
        let discovery = PeerDiscovery::from_announce_urls(&urls, &NetworkConfig::default());
        assert_eq!(discovery.tracker_count(), 2);
    }
}
