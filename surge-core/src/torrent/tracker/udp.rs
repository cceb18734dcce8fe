//! UDP tracker client following BEP 15.
//!
//! Two round trips: a connect exchange that yields a connection id, then the
//! announce itself. Packet building and parsing are pure functions so the
//! byte layouts can be checked without a socket.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::net::UdpSocket;

use super::protocol::constants::{
    COMPACT_PEER_SIZE, UDP_ACTION_ANNOUNCE, UDP_ACTION_CONNECT, UDP_ACTION_ERROR,
    UDP_ANNOUNCE_HEADER_LEN, UDP_ANNOUNCE_REQUEST_LEN, UDP_CONNECT_REQUEST_LEN,
    UDP_CONNECT_RESPONSE_LEN, UDP_MAX_DATAGRAM, UDP_PROTOCOL_ID,
};
use super::protocol::parse_compact_peers;
use super::types::{AnnounceRequest, AnnounceResponse, TrackerClient};
use crate::config::NetworkConfig;
use crate::torrent::TorrentError;
use crate::torrent::fields::FieldReader;

/// Outcome of decoding one datagram received while waiting for a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum UdpReply<T> {
    /// The reply we were waiting for
    Accepted(T),
    /// A datagram for some other transaction; keep waiting
    Stale,
    /// Tracker error or an action not valid at this phase
    Rejected { action: u32, message: String },
}

/// Builds the 16-byte connect request.
pub fn build_connect_request(transaction_id: u32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(UDP_CONNECT_REQUEST_LEN);
    buf.put_u64(UDP_PROTOCOL_ID);
    buf.put_u32(UDP_ACTION_CONNECT);
    buf.put_u32(transaction_id);
    buf
}

/// Decodes a connect response into the connection id.
///
/// # Errors
/// - `TorrentError::Truncated` - Datagram shorter than its layout
pub fn parse_connect_response(
    datagram: &[u8],
    transaction_id: u32,
) -> Result<UdpReply<u64>, TorrentError> {
    let mut reader = FieldReader::new(datagram);
    let Some(action) = read_header(&mut reader, transaction_id, UDP_ACTION_CONNECT)? else {
        return Ok(UdpReply::Stale);
    };
    if let Err(rejected) = action {
        return Ok(rejected);
    }

    if datagram.len() < UDP_CONNECT_RESPONSE_LEN {
        return Err(TorrentError::Truncated {
            needed: UDP_CONNECT_RESPONSE_LEN,
            available: datagram.len(),
        });
    }
    Ok(UdpReply::Accepted(reader.read_u64()?))
}

/// Builds the 98-byte announce request.
pub fn build_announce_request(
    connection_id: u64,
    transaction_id: u32,
    key: u32,
    request: &AnnounceRequest,
) -> BytesMut {
    let mut buf = BytesMut::with_capacity(UDP_ANNOUNCE_REQUEST_LEN);
    buf.put_u64(connection_id);
    buf.put_u32(UDP_ACTION_ANNOUNCE);
    buf.put_u32(transaction_id);
    buf.put_slice(request.info_hash.as_bytes());
    buf.put_slice(request.peer_id.as_bytes());
    buf.put_u64(request.downloaded);
    buf.put_u64(request.left);
    buf.put_u64(request.uploaded);
    // event: none
    buf.put_u32(0);
    // IP address: let the tracker use the datagram source
    buf.put_u32(0);
    buf.put_u32(key);
    // num_want: tracker default
    buf.put_i32(-1);
    buf.put_u16(request.port);
    buf
}

/// Decodes an announce response.
///
/// Layout after the action and transaction id: interval, leechers, seeders,
/// then 6-byte peer records. A trailing partial record is dropped.
///
/// # Errors
/// - `TorrentError::Truncated` - Datagram shorter than the 20-byte header
pub fn parse_announce_response(
    datagram: &[u8],
    transaction_id: u32,
) -> Result<UdpReply<AnnounceResponse>, TorrentError> {
    let mut reader = FieldReader::new(datagram);
    let Some(action) = read_header(&mut reader, transaction_id, UDP_ACTION_ANNOUNCE)? else {
        return Ok(UdpReply::Stale);
    };
    if let Err(rejected) = action {
        return Ok(rejected);
    }

    if datagram.len() < UDP_ANNOUNCE_HEADER_LEN {
        return Err(TorrentError::Truncated {
            needed: UDP_ANNOUNCE_HEADER_LEN,
            available: datagram.len(),
        });
    }
    let interval = reader.read_u32()?;
    let leechers = reader.read_u32()?;
    let seeders = reader.read_u32()?;

    let records = reader.rest();
    let whole = records.len() - records.len() % COMPACT_PEER_SIZE;
    let peers = parse_compact_peers(&records[..whole])?;

    Ok(UdpReply::Accepted(AnnounceResponse {
        interval: Some(interval),
        seeders: Some(seeders),
        leechers: Some(leechers),
        peers,
    }))
}

/// Reads action and transaction id.
///
/// `None` for another transaction's datagram, `Some(Err(_))` for an error or
/// unexpected action, `Some(Ok(()))` when the body should be parsed.
fn read_header<T>(
    reader: &mut FieldReader<'_>,
    transaction_id: u32,
    expected_action: u32,
) -> Result<Option<Result<(), UdpReply<T>>>, TorrentError> {
    let action = reader.read_u32()?;
    let received_transaction = reader.read_u32()?;
    if received_transaction != transaction_id {
        return Ok(None);
    }

    if action == expected_action {
        return Ok(Some(Ok(())));
    }
    let message = if action == UDP_ACTION_ERROR {
        String::from_utf8_lossy(reader.clone().rest()).to_string()
    } else {
        format!("Unexpected action {action}, wanted {expected_action}")
    };
    Ok(Some(Err(UdpReply::Rejected { action, message })))
}

/// UDP tracker client implementation
pub struct UdpTrackerClient {
    announce_url: String,
    host: String,
    port: u16,
    timeout: Duration,
}

impl UdpTrackerClient {
    /// Creates a client for a `udp://host:port` announce URL.
    ///
    /// # Errors
    /// - `TorrentError::UrlParsing` - Announce URL is not a valid URL
    /// - `TorrentError::TrackerUnavailable` - Wrong scheme, or host or port missing
    pub fn new(announce_url: String, config: &NetworkConfig) -> Result<Self, TorrentError> {
        let parsed = url::Url::parse(&announce_url)?;
        let unusable = |reason: &str| TorrentError::TrackerUnavailable {
            url: announce_url.clone(),
            reason: reason.to_string(),
        };

        if parsed.scheme() != "udp" {
            return Err(unusable("Not a udp:// URL"));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| unusable("Missing host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = parsed.port().ok_or_else(|| unusable("Missing port"))?;

        Ok(Self {
            announce_url,
            host,
            port,
            timeout: config.tracker_timeout,
        })
    }

    fn unavailable(&self, reason: impl Into<String>) -> TorrentError {
        TorrentError::TrackerUnavailable {
            url: self.announce_url.clone(),
            reason: reason.into(),
        }
    }

    fn rejected(&self, action: u32, message: String) -> TorrentError {
        tracing::warn!(
            "UDP tracker {} rejected request (action {}): {}",
            self.announce_url,
            action,
            message
        );
        TorrentError::TrackerProtocol {
            url: self.announce_url.clone(),
            action,
            message,
        }
    }

    async fn open_socket(&self) -> Result<UdpSocket, TorrentError> {
        let target = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| self.unavailable(format!("Could not resolve host: {e}")))?
            .next()
            .ok_or_else(|| self.unavailable("Host resolved to no addresses"))?;

        let unspecified = if target.is_ipv4() {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        };
        let socket = UdpSocket::bind(SocketAddr::new(unspecified, 0)).await?;
        socket.connect(target).await?;
        Ok(socket)
    }

    /// Sends `request` and waits for the datagram `parse` accepts.
    async fn exchange<T>(
        &self,
        socket: &UdpSocket,
        request: &[u8],
        parse: impl Fn(&[u8]) -> Result<UdpReply<T>, TorrentError>,
    ) -> Result<T, TorrentError> {
        socket.send(request).await?;

        let mut buf = vec![0u8; UDP_MAX_DATAGRAM];
        loop {
            let len = socket.recv(&mut buf).await?;
            match parse(&buf[..len]) {
                Ok(UdpReply::Accepted(value)) => return Ok(value),
                Ok(UdpReply::Stale) => {
                    tracing::debug!(
                        "Ignoring datagram for another transaction from {}",
                        self.announce_url
                    );
                }
                Ok(UdpReply::Rejected { action, message }) => {
                    return Err(self.rejected(action, message));
                }
                Err(e) => return Err(self.unavailable(format!("Malformed reply: {e}"))),
            }
        }
    }

    async fn announce_inner(
        &self,
        request: &AnnounceRequest,
    ) -> Result<AnnounceResponse, TorrentError> {
        let socket = self.open_socket().await?;

        let connect_tx: u32 = rand::random();
        let connection_id = self
            .exchange(&socket, &build_connect_request(connect_tx), |datagram| {
                parse_connect_response(datagram, connect_tx)
            })
            .await?;
        tracing::debug!("UDP tracker {} connected", self.announce_url);

        let announce_tx: u32 = rand::random();
        let packet = build_announce_request(connection_id, announce_tx, rand::random(), request);
        self.exchange(&socket, &packet, |datagram| {
            parse_announce_response(datagram, announce_tx)
        })
        .await
    }
}

#[async_trait]
impl TrackerClient for UdpTrackerClient {
    async fn announce(&self, request: &AnnounceRequest) -> Result<AnnounceResponse, TorrentError> {
        tracing::debug!("Announcing to UDP tracker: {}", self.announce_url);

        let announce = tokio::time::timeout(self.timeout, self.announce_inner(request))
            .await
            .map_err(|_| self.unavailable("Request timed out"))?
            .map_err(|e| match e {
                TorrentError::Io(io) => self.unavailable(format!("Socket error: {io}")),
                other => other,
            })?;

        tracing::debug!(
            "UDP tracker {} returned {} peers",
            self.announce_url,
            announce.peers.len()
        );
        Ok(announce)
    }

    fn tracker_url(&self) -> &str {
        &self.announce_url
    }
}
