//! Error types for secrets cache operations

use thiserror::Error;

/// Local store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Entry for key {key} is {size} bytes, larger than the {budget} byte budget")]
    EntryTooLarge { key: String, size: usize, budget: usize },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for cache lookups.
///
/// The split between [`CacheError::PeerTransport`] and every other variant is
/// load-bearing: only transport failures let a group fall back to resolving a
/// key locally.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Loader failed for key {key}: {reason}")]
    Loader { key: String, reason: String },

    #[error("Peer {peer} unreachable: {reason}")]
    PeerTransport { peer: String, reason: String },

    #[error("Peer {peer} rejected key {key} ({code}): {message}")]
    PeerRejected {
        peer: String,
        key: String,
        code: String,
        message: String,
    },

    #[error("Encoding error for key {key}: {reason}")]
    Encoding { key: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("In-flight load for key {key} ended without a result")]
    FlightAborted { key: String },

    #[error("Cache group not found: {group}")]
    GroupNotFound { group: String },
}

impl CacheError {
    /// Create a loader error.
    pub fn loader(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::Loader {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an encoding error.
    pub fn encoding(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::Encoding {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a peer transport error.
    pub fn transport(peer: impl Into<String>, reason: impl ToString) -> Self {
        Self::PeerTransport {
            peer: peer.into(),
            reason: reason.to_string(),
        }
    }

    /// True when the owner could not be reached at all.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::PeerTransport { .. })
    }
}

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
