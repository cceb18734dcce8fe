//! BitTorrent wire protocol abstractions and message types.
//!
//! BitTorrent peer-to-peer protocol implementation following BEP 3.
//! Defines message types, the handshake, and stream framing for
//! communicating with remote peers.

pub mod framing;
pub mod handshake;
pub mod messages;
pub mod types;

// Re-export public API
pub use framing::{Frame, FrameDecoder};
pub use handshake::{HANDSHAKE_LEN, HandshakeCodec, PROTOCOL_ID};
pub use messages::{MessageCodec, pieces_in_bitfield};
pub use types::{DEFAULT_CLIENT_PREFIX, PeerHandshake, PeerId, PeerMessage, SessionState};
