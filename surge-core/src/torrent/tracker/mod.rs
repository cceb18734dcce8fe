//! BitTorrent tracker communication abstractions and implementations.
//!
//! HTTP (BEP 3) and UDP (BEP 15) announce clients behind one trait, plus the
//! concurrent discovery that queries every announce endpoint of a torrent.

pub mod discovery;
pub mod http;
pub mod protocol;
pub mod types;
pub mod udp;

// Re-export public API
pub use discovery::{PeerDiscovery, tracker_for_url};
pub use http::HttpTrackerClient;
pub use types::{AnnounceRequest, AnnounceResponse, TrackerClient};
pub use udp::UdpTrackerClient;
