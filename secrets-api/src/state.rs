//! Shared application state for Axum routers.

use std::sync::Arc;

use secrets_cache::CacheGroup;
use secrets_core::MembershipView;

use crate::telemetry::Recorder;

/// Application-wide state shared across the app, peer and health routers.
#[derive(Clone)]
pub struct AppState {
    /// The cache group this node serves.
    pub group: Arc<CacheGroup>,
    /// Published membership; the same view the group routes with.
    pub membership: Arc<MembershipView>,
    pub recorder: Arc<dyn Recorder>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(group: Arc<CacheGroup>, recorder: Arc<dyn Recorder>) -> Self {
        Self {
            membership: Arc::clone(group.membership()),
            group,
            recorder,
            start_time: std::time::Instant::now(),
        }
    }
}
