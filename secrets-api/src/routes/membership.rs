//! Membership hook on the peer listener.
//!
//! - `GET /_groupcache/peers` returns the topology in force
//! - `PUT /_groupcache/peers` publishes a new peer set
//!
//! Neither route is authenticated. Anyone who can reach the peer listener can
//! rewrite cluster membership and read any key, so `GROUPCACHE_PORT` must only
//! be reachable from inside the cluster (pod network or a NetworkPolicy), never
//! exposed through the service or an ingress.

use axum::{extract::State, Json};
use secrets_core::Topology;
use serde::{Deserialize, Serialize};

use crate::discovery::{apply_peer_update, PeerUpdate};
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipResponse {
    pub self_endpoint: String,
    pub peers: Vec<String>,
    pub generation: u64,
}

impl From<&Topology> for MembershipResponse {
    fn from(topology: &Topology) -> Self {
        Self {
            self_endpoint: topology.snapshot().self_endpoint().to_string(),
            peers: topology.snapshot().peers().iter().cloned().collect(),
            generation: topology.generation(),
        }
    }
}

/// GET /_groupcache/peers
pub async fn list_peers(State(state): State<AppState>) -> Json<MembershipResponse> {
    Json(MembershipResponse::from(state.membership.current().as_ref()))
}

/// PUT /_groupcache/peers
pub async fn update_peers(
    State(state): State<AppState>,
    Json(update): Json<PeerUpdate>,
) -> Json<MembershipResponse> {
    let topology = apply_peer_update(&state.membership, &update.peers);
    Json(MembershipResponse::from(topology.as_ref()))
}
