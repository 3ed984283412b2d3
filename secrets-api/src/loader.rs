//! Loaders backing the two application modes.
//!
//! - [`FileSecretLoader`] reads secrets from a mounted directory (secret mode)
//! - [`HttpOriginLoader`] forwards the request to an upstream origin (proxy mode)
//!
//! Both produce the bytes that end up in the cache group, so the encoded
//! documents defined here are also what travels between peers.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::CONTENT_TYPE;
use secrets_cache::Loader;
use secrets_core::{CacheError, CacheResult, LoaderOutput};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

// ============================================================================
// SECRET MODE
// ============================================================================

/// Cached document of a resolved secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedSecret {
    pub secret_value: String,
}

impl CachedSecret {
    pub fn new(secret_value: impl Into<String>) -> Self {
        Self {
            secret_value: secret_value.into(),
        }
    }

    pub fn encode(&self, key: &str) -> CacheResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CacheError::encoding(key, e))
    }

    pub fn decode(key: &str, bytes: &[u8]) -> CacheResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::encoding(key, e))
    }
}

/// Reads `{dir}/{secret_name}` and caches its content.
#[derive(Debug, Clone)]
pub struct FileSecretLoader {
    dir: PathBuf,
    ttl: Duration,
}

impl FileSecretLoader {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }
}

/// Secret names map to file names; anything that could leave the directory
/// is rejected.
fn validate_secret_name(key: &str) -> CacheResult<()> {
    if key.contains('/') || key.contains('\\') || key.contains("..") || key.contains('\0') {
        return Err(CacheError::loader(key, "invalid secret name"));
    }
    Ok(())
}

#[async_trait]
impl Loader for FileSecretLoader {
    async fn load(&self, key: &str) -> CacheResult<LoaderOutput> {
        validate_secret_name(key)?;

        let path = self.dir.join(key);
        let contents = tokio::fs::read_to_string(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => CacheError::loader(key, "secret not found"),
            _ => CacheError::loader(key, e),
        })?;

        // Mounted secret files usually end with a newline.
        let value = contents.trim_end_matches(['\r', '\n']);
        let document = CachedSecret::new(value).encode(key)?;
        tracing::debug!(key, path = %path.display(), "Read secret from disk");
        Ok(LoaderOutput::new(document, self.ttl))
    }
}

// ============================================================================
// PROXY MODE
// ============================================================================

/// Cached upstream response: status, content type and raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct WireResponse {
    status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    body: String,
}

impl CachedResponse {
    pub fn encode(&self, key: &str) -> CacheResult<Vec<u8>> {
        let wire = WireResponse {
            status: self.status,
            content_type: self.content_type.clone(),
            body: STANDARD.encode(&self.body),
        };
        serde_json::to_vec(&wire).map_err(|e| CacheError::encoding(key, e))
    }

    pub fn decode(key: &str, bytes: &[u8]) -> CacheResult<Self> {
        let wire: WireResponse =
            serde_json::from_slice(bytes).map_err(|e| CacheError::encoding(key, e))?;
        let body = STANDARD
            .decode(wire.body.as_bytes())
            .map_err(|e| CacheError::encoding(key, e))?;
        Ok(Self {
            status: wire.status,
            content_type: wire.content_type,
            body,
        })
    }

    pub fn is_error(&self) -> bool {
        self.status >= 400
    }
}

/// Split a proxy key back into method and request target.
pub fn split_proxy_key(key: &str) -> CacheResult<(reqwest::Method, &str)> {
    let (method, target) = key
        .split_once(' ')
        .ok_or_else(|| CacheError::loader(key, "key is not 'METHOD URI'"))?;
    let method = reqwest::Method::from_bytes(method.as_bytes())
        .map_err(|e| CacheError::loader(key, e))?;
    if !target.starts_with('/') {
        return Err(CacheError::loader(key, "request target must be a path"));
    }
    Ok((method, target))
}

/// Forwards `METHOD URI` keys to an upstream origin.
///
/// Every response the origin returns is cached, responses with status >= 400
/// for the shorter error ttl. Failing to reach the origin is a loader error.
#[derive(Debug, Clone)]
pub struct HttpOriginLoader {
    client: reqwest::Client,
    base: String,
    ttl: Duration,
    error_ttl: Duration,
}

impl HttpOriginLoader {
    pub fn new(
        base: impl Into<String>,
        timeout: Duration,
        ttl: Duration,
        error_ttl: Duration,
    ) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::internal_error(format!("Failed to build upstream client: {}", e)))?;
        Ok(Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
            ttl,
            error_ttl,
        })
    }
}

#[async_trait]
impl Loader for HttpOriginLoader {
    async fn load(&self, key: &str) -> CacheResult<LoaderOutput> {
        let (method, target) = split_proxy_key(key)?;
        let url = format!("{}{}", self.base, target);

        let response = self
            .client
            .request(method, &url)
            .send()
            .await
            .map_err(|e| CacheError::loader(key, e))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| CacheError::loader(key, e))?
            .to_vec();

        let cached = CachedResponse {
            status,
            content_type,
            body,
        };
        let ttl = if cached.is_error() { self.error_ttl } else { self.ttl };
        tracing::debug!(key, status, ttl_ms = ttl.as_millis() as u64, "Fetched from upstream");
        Ok(LoaderOutput::new(cached.encode(key)?, ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_loader_reads_and_trims() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("db-password"), "s3cr3t\n")?;

        let loader = FileSecretLoader::new(dir.path(), Duration::from_secs(600));
        let output = loader.load("db-password").await?;
        assert_eq!(output.ttl, Duration::from_secs(600));
        assert_eq!(
            CachedSecret::decode("db-password", &output.value)?,
            CachedSecret::new("s3cr3t")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_file_loader_missing_secret() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let loader = FileSecretLoader::new(dir.path(), Duration::from_secs(1));

        let err = loader.load("nope").await.err().ok_or("expected error")?;
        assert_eq!(err, CacheError::loader("nope", "secret not found"));
        Ok(())
    }

    #[tokio::test]
    async fn test_file_loader_rejects_traversal() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let loader = FileSecretLoader::new(dir.path(), Duration::from_secs(1));

        for name in ["../etc/passwd", "a/b", "a\\b", ".."] {
            let err = loader.load(name).await.err().ok_or("expected error")?;
            assert!(matches!(err, CacheError::Loader { .. }), "{name}");
        }
        Ok(())
    }

    #[test]
    fn test_cached_secret_decode_failure_is_encoding() {
        let err = CachedSecret::decode("k", b"not json").err();
        assert!(matches!(err, Some(CacheError::Encoding { .. })));
    }

    #[test]
    fn test_cached_response_keeps_binary_body() -> CacheResult<()> {
        let response = CachedResponse {
            status: 404,
            content_type: Some("text/plain".to_string()),
            body: vec![0, 159, 146, 150],
        };
        assert!(response.is_error());
        let decoded = CachedResponse::decode("k", &response.encode("k")?)?;
        assert_eq!(decoded, response);
        Ok(())
    }

    #[test]
    fn test_cached_response_bad_base64() {
        let err = CachedResponse::decode("k", br#"{"status":200,"body":"%%%"}"#).err();
        assert!(matches!(err, Some(CacheError::Encoding { .. })));
    }

    #[test]
    fn test_split_proxy_key() -> CacheResult<()> {
        let (method, target) = split_proxy_key("GET /users/7?full=1")?;
        assert_eq!(method, reqwest::Method::GET);
        assert_eq!(target, "/users/7?full=1");

        assert!(split_proxy_key("GET").is_err());
        assert!(split_proxy_key("GET http://evil/").is_err());
        assert!(split_proxy_key("BAD METHOD /x").is_err());
        Ok(())
    }
}
