//! Centralized configuration for Surge.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::torrent::protocol::DEFAULT_CLIENT_PREFIX;

/// Central configuration for all Surge components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct SurgeConfig {
    pub torrent: TorrentConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
}

/// BitTorrent protocol-specific configuration.
#[derive(Debug, Clone)]
pub struct TorrentConfig {
    /// Azureus-style client prefix placed at the start of every peer id
    pub client_id: &'static str,
}

impl Default for TorrentConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_PREFIX,
        }
    }
}

/// Tracker and peer connection configuration.
///
/// Controls timeouts, peer count thresholds, and the identity presented to
/// HTTP trackers.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Port reported to trackers
    pub listen_port: u16,
    /// Upper bound on a single tracker announce, HTTP or UDP
    pub tracker_timeout: Duration,
    /// Upper bound on establishing a TCP connection to a peer
    pub peer_connect_timeout: Duration,
    /// A peer silent for this long is dropped
    pub peer_idle_timeout: Duration,
    /// Discovery stops waiting on trackers once this many peers are known
    pub min_peers: usize,
    /// Maximum concurrent peer sessions per download
    pub max_peer_connections: usize,
    /// User agent for HTTP requests
    pub user_agent: &'static str,
    /// How often download progress is logged
    pub progress_interval: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: 6881,
            tracker_timeout: Duration::from_secs(15),
            peer_connect_timeout: Duration::from_secs(5),
            peer_idle_timeout: Duration::from_secs(120),
            min_peers: 20,
            max_peer_connections: 50,
            user_agent: "surge/0.1.0",
            progress_interval: Duration::from_secs(5),
        }
    }
}

/// In-progress download storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding in-progress flat download regions
    pub work_dir: PathBuf,
    /// Suffix of the in-progress flat region file
    pub partial_suffix: &'static str,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(".surge"),
            partial_suffix: ".part",
        }
    }
}

impl SurgeConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Applies overrides from `lookup`, keyed by `SURGE_*` variable names.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            let value = lookup(key)?;
            match value.trim().parse() {
                Ok(parsed) => Some(parsed),
                Err(_) => {
                    tracing::warn!("Ignoring invalid value {value:?} for {key}");
                    None
                }
            }
        }

        if let Some(seconds) = parsed::<u64>(&lookup, "SURGE_TRACKER_TIMEOUT") {
            self.network.tracker_timeout = Duration::from_secs(seconds);
        }
        if let Some(seconds) = parsed::<u64>(&lookup, "SURGE_PEER_TIMEOUT") {
            self.network.peer_idle_timeout = Duration::from_secs(seconds);
        }
        if let Some(count) = parsed(&lookup, "SURGE_MIN_PEERS") {
            self.network.min_peers = count;
        }
        if let Some(count) = parsed(&lookup, "SURGE_MAX_PEERS") {
            self.network.max_peer_connections = count;
        }
        if let Some(port) = parsed(&lookup, "SURGE_LISTEN_PORT") {
            self.network.listen_port = port;
        }
        if let Some(dir) = lookup("SURGE_WORK_DIR").filter(|dir| !dir.is_empty()) {
            self.storage.work_dir = PathBuf::from(dir);
        }
    }

    /// Creates a configuration optimized for testing.
    ///
    /// Every timeout is short so failing peers and silent trackers resolve
    /// within a test's lifetime.
    pub fn for_testing() -> Self {
        Self {
            network: NetworkConfig {
                tracker_timeout: Duration::from_millis(500),
                peer_connect_timeout: Duration::from_millis(500),
                peer_idle_timeout: Duration::from_secs(2),
                min_peers: 1,
                progress_interval: Duration::from_millis(100),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = SurgeConfig::default();

        assert_eq!(config.torrent.client_id, "-SG0001-");
        assert_eq!(config.network.listen_port, 6881);
        assert_eq!(config.network.max_peer_connections, 50);
        assert_eq!(config.network.min_peers, 20);
        assert_eq!(config.network.tracker_timeout, Duration::from_secs(15));
        assert_eq!(config.network.peer_idle_timeout, Duration::from_secs(120));
        assert_eq!(config.storage.work_dir, PathBuf::from(".surge"));
        assert_eq!(config.storage.partial_suffix, ".part");
    }

    #[test]
    fn test_testing_preset_shortens_timeouts() {
        let testing = SurgeConfig::for_testing();
        let defaults = SurgeConfig::default();

        assert!(testing.network.tracker_timeout < defaults.network.tracker_timeout);
        assert!(testing.network.peer_connect_timeout < defaults.network.peer_connect_timeout);
        assert!(testing.network.peer_idle_timeout < defaults.network.peer_idle_timeout);
        assert_eq!(testing.network.min_peers, 1);
    }

    #[test]
    fn test_overrides_applied() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SURGE_TRACKER_TIMEOUT", "60"),
            ("SURGE_PEER_TIMEOUT", "30"),
            ("SURGE_MIN_PEERS", "5"),
            ("SURGE_MAX_PEERS", "100"),
            ("SURGE_LISTEN_PORT", "51413"),
            ("SURGE_WORK_DIR", "/tmp/surge-work"),
        ]);

        let mut config = SurgeConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|value| value.to_string()));

        assert_eq!(config.network.tracker_timeout, Duration::from_secs(60));
        assert_eq!(config.network.peer_idle_timeout, Duration::from_secs(30));
        assert_eq!(config.network.min_peers, 5);
        assert_eq!(config.network.max_peer_connections, 100);
        assert_eq!(config.network.listen_port, 51413);
        assert_eq!(config.storage.work_dir, PathBuf::from("/tmp/surge-work"));
    }

    #[test]
    fn test_invalid_overrides_ignored() {
        let mut config = SurgeConfig::default();
        config.apply_overrides(|key| match key {
            "SURGE_MAX_PEERS" => Some("lots".to_string()),
            "SURGE_LISTEN_PORT" => Some("70000".to_string()),
            _ => None,
        });

        assert_eq!(config.network.max_peer_connections, 50);
        assert_eq!(config.network.listen_port, 6881);
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("SURGE_MIN_PEERS", "7");
        }

        let config = SurgeConfig::from_env();
        assert_eq!(config.network.min_peers, 7);

        unsafe {
            std::env::remove_var("SURGE_MIN_PEERS");
        }
    }
}
