//! Secrets Core - Shared Types
//!
//! Data types shared by every crate in the workspace: the error taxonomy,
//! the cached value shape, cluster membership snapshots and the ownership
//! ring. Nothing in here performs I/O.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;

pub mod error;
pub mod membership;
pub mod ring;

pub use error::{CacheError, CacheResult, ConfigError, StorageError};
pub use membership::{normalize_endpoint, owner_of, MembershipSnapshot, MembershipView, Topology};
pub use ring::{hash64, HashRing, DEFAULT_REPLICAS};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Absolute expiry for a value loaded at `now` with the given ttl.
///
/// Saturates at the maximum representable timestamp instead of overflowing.
pub fn expires_after(now: Timestamp, ttl: Duration) -> Timestamp {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// What a loader hands back: the value and how long it may be cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderOutput {
    pub value: Vec<u8>,
    pub ttl: Duration,
}

impl LoaderOutput {
    pub fn new(value: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            value: value.into(),
            ttl,
        }
    }
}

/// A resolved value with its absolute expiration.
///
/// Cloning is cheap; the bytes are shared between every waiter of a flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded {
    value: Arc<[u8]>,
    expires_at: Timestamp,
}

impl Loaded {
    pub fn new(value: impl Into<Arc<[u8]>>, expires_at: Timestamp) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// Stamp a loader output with an expiry relative to `now`.
    pub fn from_output(output: LoaderOutput, now: Timestamp) -> Self {
        Self::new(output.value, expires_after(now, output.ttl))
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn expires_at(&self) -> Timestamp {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining_at(&self, now: Timestamp) -> Duration {
        self.expires_at
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}
