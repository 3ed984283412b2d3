//! HTTP Routes
//!
//! One router per listener:
//! - application: secret lookups or the caching proxy, depending on mode
//! - peer: the peer protocol and the membership hook
//! - health
//! - metrics

pub mod health;
pub mod membership;
pub mod peer;
pub mod proxy;
pub mod secret;

use std::sync::Arc;

use axum::{routing::get, routing::post, Router};

use crate::config::{CacheMode, ServiceConfig};
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observed, PrometheusRecorder};

/// Router of the application listener.
pub fn app_router(state: AppState, config: &ServiceConfig) -> Router {
    let router = match config.mode {
        CacheMode::Secret => Router::new().route(&config.app_route, post(secret::get_secret)),
        CacheMode::Proxy => Router::new().fallback(proxy::proxy),
    };
    observed(router.with_state(state))
}

/// Router of the peer listener.
pub fn peer_router(state: AppState) -> Router {
    let router = Router::new()
        .route(
            "/_groupcache/peers",
            get(membership::list_peers).put(membership::update_peers),
        )
        .route("/_groupcache/:group/:key", get(peer::serve_peer))
        .with_state(state);
    observed(router)
}

/// Router of the health listener.
pub fn health_router(path: &str, state: AppState) -> Router {
    health::create_router(path, state)
}

/// Router of the metrics listener.
pub fn metrics_router(path: &str, recorder: Arc<PrometheusRecorder>) -> Router {
    Router::new()
        .route(path, get(metrics_handler))
        .with_state(recorder)
}
