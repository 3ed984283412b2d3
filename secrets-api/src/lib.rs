//! Secrets API - HTTP Layer of the Distributed Secrets Cache
//!
//! This crate wires the cache group from `secrets-cache` to four HTTP
//! listeners: the application facade (secret lookups or a caching proxy), the
//! peer protocol, health and Prometheus metrics. It also carries the peer
//! protocol client, the loaders and the telemetry setup.

pub mod config;
pub mod discovery;
pub mod error;
pub mod facade;
pub mod jobs;
pub mod loader;
pub mod peer;
pub mod routes;
pub mod state;
pub mod telemetry;

use std::sync::Arc;

use secrets_cache::{CacheGroup, Loader};
use secrets_core::{MembershipSnapshot, MembershipView};

// Re-export commonly used types
pub use config::{CacheMode, ServiceConfig};
pub use discovery::{apply_peer_update, PeerUpdate};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use facade::{Outcome, RequestObservation};
pub use loader::{CachedResponse, CachedSecret, FileSecretLoader, HttpOriginLoader};
pub use peer::{HttpPeerClient, PeerValue, HOP_HEADER};
pub use routes::{app_router, health_router, metrics_router, peer_router};
pub use state::AppState;

/// Loader for the configured mode.
pub fn build_loader(config: &ServiceConfig) -> ApiResult<Arc<dyn Loader>> {
    match config.mode {
        CacheMode::Secret => Ok(Arc::new(FileSecretLoader::new(
            config.secrets_dir.clone(),
            config.cache_ttl,
        ))),
        CacheMode::Proxy => {
            let upstream = config
                .upstream_url
                .as_deref()
                .ok_or_else(|| ApiError::missing_field("UPSTREAM_URL"))?;
            Ok(Arc::new(HttpOriginLoader::new(
                upstream,
                config.http_client_timeout,
                config.cache_ttl,
                config.cache_error_ttl,
            )?))
        }
    }
}

/// Cache group routed by this node's membership, with the HTTP peer client.
///
/// The static peer list from the configuration is published before the group
/// serves its first lookup.
pub fn build_group(config: &ServiceConfig, loader: Arc<dyn Loader>) -> ApiResult<Arc<CacheGroup>> {
    let membership = Arc::new(MembershipView::new(
        MembershipSnapshot::single(&config.self_url),
        config.replicas,
    ));
    if !config.peers.is_empty() {
        apply_peer_update(&membership, &config.peers);
    }

    let peers = HttpPeerClient::new(config.peer_timeout)?;
    Ok(Arc::new(
        CacheGroup::new(&config.group_name, config.cache_bytes, loader, membership)
            .with_peers(Arc::new(peers)),
    ))
}
