//! `.torrent` metadata parsing.
//!
//! Torrent metadata extraction using the bencode-rs crate, with the info hash
//! computed over the raw bencoded `info` dictionary.

pub mod bencode;
pub mod parser;
pub mod types;

// Re-export public API
pub use parser::BencodeTorrentParser;
pub use types::{TorrentFile, TorrentMetadata, TorrentParser};
