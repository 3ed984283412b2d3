//! Peer Protocol Server
//!
//! `GET /_groupcache/{group}/{key}` resolves the key the way its owner
//! would: local store, then the loader. It never forwards, whatever the
//! requesting node believed about ownership, which caps every lookup at one
//! hop even while two nodes disagree on membership.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use secrets_core::CacheError;

use crate::error::ApiResult;
use crate::peer::{PeerValue, HOP_HEADER};
use crate::state::AppState;

/// GET /_groupcache/{group}/{key}
pub async fn serve_peer(
    State(state): State<AppState>,
    Path((group, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<PeerValue>> {
    if group != state.group.name() {
        return Err(CacheError::GroupNotFound { group }.into());
    }

    let hop = headers
        .get(HOP_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("0");
    tracing::debug!(key = %key, hop, "Serving peer lookup");

    let loaded = state.group.get_local(&key).await?;
    Ok(Json(PeerValue::from_loaded(&loaded)))
}
