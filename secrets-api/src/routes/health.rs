//! Health Check Endpoint
//!
//! Served on its own listener so probes keep answering while the application
//! listener is saturated. Reports the local store and the topology this node
//! routes with.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDetails {
    pub version: String,
    pub uptime_seconds: u64,
    pub group: String,
    pub generation: u64,
    pub peers: usize,
    pub items: u64,
    pub bytes: u64,
    pub hit_rate: f64,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET {HEALTH_PATH}
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let topology = state.membership.current();

    match state.group.store().stats() {
        Ok(stats) => {
            let response = HealthResponse {
                status: HealthStatus::Healthy,
                message: None,
                details: Some(HealthDetails {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    uptime_seconds: state.start_time.elapsed().as_secs(),
                    group: state.group.name().to_string(),
                    generation: topology.generation(),
                    peers: topology.snapshot().peers().len(),
                    items: stats.items,
                    bytes: stats.bytes,
                    hit_rate: stats.hit_rate(),
                }),
            };
            (StatusCode::OK, Json(response))
        }
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            let response = HealthResponse {
                status: HealthStatus::Unhealthy,
                message: Some(e.to_string()),
                details: None,
            };
            (StatusCode::SERVICE_UNAVAILABLE, Json(response))
        }
    }
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(path: &str, state: AppState) -> Router {
    Router::new().route(path, get(health)).with_state(state)
}
