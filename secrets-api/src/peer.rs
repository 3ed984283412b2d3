//! Peer Protocol Client
//!
//! `GET {endpoint}/_groupcache/{group}/{key}` against the owner's peer
//! listener. A `200` carries the value and its absolute expiry; any other
//! status carrying the [`ApiError`] envelope is an application error reported
//! by the owner. Everything else (connect failures, timeouts, foreign error
//! pages) counts as transport failure, the only kind a caller may fall back
//! from.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Url;
use secrets_cache::PeerFetcher;
use secrets_core::{CacheError, CacheResult, Loaded, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::telemetry::inject_trace_context;

/// Marks a request as peer-originated. Informational only.
pub const HOP_HEADER: &str = "x-groupcache-hop";

/// Path prefix of the peer protocol.
pub const PEER_PREFIX: &str = "_groupcache";

/// Body of a successful peer response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerValue {
    /// Base64 of the cached bytes.
    pub value: String,
    pub expires_at: Timestamp,
}

impl PeerValue {
    pub fn from_loaded(loaded: &Loaded) -> Self {
        Self {
            value: STANDARD.encode(loaded.value()),
            expires_at: loaded.expires_at(),
        }
    }

    pub fn into_loaded(self, key: &str) -> CacheResult<Loaded> {
        let bytes = STANDARD
            .decode(self.value.as_bytes())
            .map_err(|e| CacheError::encoding(key, e))?;
        Ok(Loaded::new(bytes, self.expires_at))
    }
}

/// Build the peer URL with group and key percent-encoded as path segments.
pub fn peer_url(endpoint: &str, group: &str, key: &str) -> CacheResult<Url> {
    let mut url = Url::parse(endpoint).map_err(|e| CacheError::transport(endpoint, e))?;
    url.path_segments_mut()
        .map_err(|_| CacheError::transport(endpoint, "endpoint cannot be a base URL"))?
        .pop_if_empty()
        .extend([PEER_PREFIX, group, key]);
    Ok(url)
}

/// reqwest-backed [`PeerFetcher`].
#[derive(Debug, Clone)]
pub struct HttpPeerClient {
    client: reqwest::Client,
}

impl HttpPeerClient {
    /// `timeout` bounds the whole exchange, connect included.
    pub fn new(timeout: Duration) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ApiError::internal_error(format!("Failed to build peer client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PeerFetcher for HttpPeerClient {
    async fn fetch(&self, peer: &str, group: &str, key: &str) -> CacheResult<Loaded> {
        let url = peer_url(peer, group, key)?;

        let mut headers = HeaderMap::new();
        headers.insert(HOP_HEADER, HeaderValue::from_static("1"));
        inject_trace_context(&mut headers);

        let response = self
            .client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| CacheError::transport(peer, e))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| CacheError::transport(peer, e))?;

        if status.is_success() {
            let value: PeerValue =
                serde_json::from_slice(&body).map_err(|e| CacheError::encoding(key, e))?;
            return value.into_loaded(key);
        }

        match serde_json::from_slice::<ApiError>(&body) {
            Ok(err) => Err(CacheError::PeerRejected {
                peer: peer.to_string(),
                key: key.to_string(),
                code: err.code.as_str().to_string(),
                message: err.message,
            }),
            Err(_) => Err(CacheError::transport(
                peer,
                format!("unexpected response status {}", status),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_peer_url_encodes_segments() -> CacheResult<()> {
        let url = peer_url("http://10.0.0.2:5000", "secrets", "team/db password")?;
        assert_eq!(
            url.as_str(),
            "http://10.0.0.2:5000/_groupcache/secrets/team%2Fdb%20password"
        );

        let url = peer_url("http://10.0.0.2:5000/", "secrets", "k")?;
        assert_eq!(url.as_str(), "http://10.0.0.2:5000/_groupcache/secrets/k");
        Ok(())
    }

    #[test]
    fn test_peer_url_rejects_garbage_as_transport() {
        let err = peer_url("not a url", "secrets", "k").err();
        assert!(err.is_some_and(|e| e.is_transport()));
    }

    #[test]
    fn test_peer_value_wire_format() -> Result<(), Box<dyn std::error::Error>> {
        let expires_at = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).single().ok_or("ts")?;
        let value = PeerValue::from_loaded(&Loaded::new(b"s3cr3t".to_vec(), expires_at));

        let json = serde_json::to_value(&value)?;
        assert_eq!(json["value"], "czNjcjN0");
        assert_eq!(json["expires_at"], "2030-01-02T03:04:05Z");

        let loaded = value.into_loaded("k")?;
        assert_eq!(loaded.value(), b"s3cr3t");
        assert_eq!(loaded.expires_at(), expires_at);
        Ok(())
    }

    #[test]
    fn test_bad_base64_is_encoding_error() {
        let value = PeerValue {
            value: "***".to_string(),
            expires_at: Utc::now(),
        };
        assert!(matches!(
            value.into_loaded("k"),
            Err(CacheError::Encoding { .. })
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport() -> Result<(), Box<dyn std::error::Error>> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let endpoint = format!("http://{}", listener.local_addr()?);
        drop(listener);

        let client = HttpPeerClient::new(Duration::from_millis(500))?;
        let err = client
            .fetch(&endpoint, "secrets", "k")
            .await
            .err()
            .ok_or("expected error")?;
        assert!(err.is_transport(), "{err}");
        Ok(())
    }
}
