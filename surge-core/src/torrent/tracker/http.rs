//! HTTP tracker client implementation with URL building and response parsing

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;

use super::protocol::parse_compact_peers;
use super::types::{AnnounceRequest, AnnounceResponse, TrackerClient};
use crate::config::NetworkConfig;
use crate::torrent::TorrentError;

/// HTTP tracker client implementation
pub struct HttpTrackerClient {
    announce_url: String,
    client: reqwest::Client,
}

impl HttpTrackerClient {
    /// Creates HTTP tracker client using the configured timeout and user agent.
    ///
    /// # Errors
    /// - `TorrentError::UrlParsing` - Announce URL is not a valid URL
    /// - `TorrentError::TrackerUnavailable` - HTTP client could not be constructed
    pub fn new(announce_url: String, config: &NetworkConfig) -> Result<Self, TorrentError> {
        url::Url::parse(&announce_url)?;

        let client = reqwest::Client::builder()
            .timeout(config.tracker_timeout)
            .user_agent(config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
            .map_err(|e| TorrentError::TrackerUnavailable {
                url: announce_url.clone(),
                reason: format!("HTTP client setup failed: {e}"),
            })?;

        Ok(Self {
            announce_url,
            client,
        })
    }

    fn unavailable(&self, reason: impl Into<String>) -> TorrentError {
        TorrentError::TrackerUnavailable {
            url: self.announce_url.clone(),
            reason: reason.into(),
        }
    }

    /// Build announce URL with query parameters.
    ///
    /// Binary fields are percent-encoded by hand; letting a URL library encode
    /// them would double-encode the `%` escapes. An existing query string on
    /// the announce URL is kept.
    pub(super) fn build_announce_url(&self, request: &AnnounceRequest) -> String {
        let query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            urlencoding::encode_binary(request.info_hash.as_bytes()),
            urlencoding::encode_binary(request.peer_id.as_bytes()),
            request.port,
            request.uploaded,
            request.downloaded,
            request.left,
        );

        let separator = if self.announce_url.contains('?') {
            '&'
        } else {
            '?'
        };
        format!("{}{separator}{query}", self.announce_url)
    }

    /// Parse tracker response from bencode data
    pub(super) fn parse_announce_response(
        &self,
        response_bytes: &[u8],
    ) -> Result<AnnounceResponse, TorrentError> {
        let parsed = bencode_rs::Value::parse(response_bytes)
            .map_err(|e| self.unavailable(format!("Failed to parse tracker response: {e:?}")))?;

        let Some(bencode_rs::Value::Dictionary(dict)) = parsed.first() else {
            return Err(self.unavailable("Tracker response is not a dictionary"));
        };

        if let Some(bencode_rs::Value::Bytes(failure_reason)) =
            dict.get(b"failure reason".as_slice())
        {
            return Err(self.unavailable(format!(
                "Tracker refused announce: {}",
                String::from_utf8_lossy(failure_reason)
            )));
        }

        let integer = |key: &[u8]| match dict.get(key) {
            Some(bencode_rs::Value::Integer(val)) => u32::try_from(*val).ok(),
            _ => None,
        };

        let peers = match dict.get(b"peers".as_slice()) {
            Some(bencode_rs::Value::Bytes(peer_data)) => parse_compact_peers(peer_data)
                .map_err(|e| self.unavailable(e.to_string()))?,
            Some(bencode_rs::Value::List(peer_dicts)) => Self::parse_dictionary_peers(peer_dicts),
            _ => Vec::new(),
        };

        Ok(AnnounceResponse {
            interval: integer(b"interval".as_slice()),
            seeders: integer(b"complete".as_slice()),
            leechers: integer(b"incomplete".as_slice()),
            peers,
        })
    }

    /// Non-compact peer list: `[{ip, port, peer id}, ...]`.
    ///
    /// Entries with hostnames or missing fields are skipped.
    fn parse_dictionary_peers(peer_dicts: &[bencode_rs::Value<'_>]) -> Vec<SocketAddr> {
        peer_dicts
            .iter()
            .filter_map(|entry| {
                let bencode_rs::Value::Dictionary(peer) = entry else {
                    return None;
                };
                let Some(bencode_rs::Value::Bytes(ip)) = peer.get(b"ip".as_slice()) else {
                    return None;
                };
                let Some(bencode_rs::Value::Integer(port)) = peer.get(b"port".as_slice()) else {
                    return None;
                };

                let ip: IpAddr = std::str::from_utf8(ip).ok()?.parse().ok()?;
                let port = u16::try_from(*port).ok()?;
                Some(SocketAddr::new(ip, port))
            })
            .collect()
    }
}

#[async_trait]
impl TrackerClient for HttpTrackerClient {
    async fn announce(&self, request: &AnnounceRequest) -> Result<AnnounceResponse, TorrentError> {
        let url = self.build_announce_url(request);
        tracing::debug!("Announcing to HTTP tracker: {}", self.announce_url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                self.unavailable("Request timed out")
            } else {
                self.unavailable(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.unavailable(format!("HTTP status {status}")));
        }

        let response_bytes = response
            .bytes()
            .await
            .map_err(|e| self.unavailable(format!("Failed to read response body: {e}")))?;

        let announce = self.parse_announce_response(&response_bytes)?;
        tracing::debug!(
            "HTTP tracker {} returned {} peers",
            self.announce_url,
            announce.peers.len()
        );
        Ok(announce)
    }

    fn tracker_url(&self) -> &str {
        &self.announce_url
    }
}
