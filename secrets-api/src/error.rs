//! Error Types for the Secrets API
//!
//! This module defines error handling for the HTTP layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! The same envelope travels over the peer protocol, which is how a caller
//! tells an owner's application error apart from an unreachable owner.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use secrets_core::{CacheError, ConfigError, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Client Errors (400, 404)
    // ========================================================================
    /// Request contains invalid input data
    InvalidInput,

    /// Required field is missing or blank
    MissingField,

    /// Requested cache group is not served by this node
    GroupNotFound,

    // ========================================================================
    // Upstream Errors (502, 503, 504)
    // ========================================================================
    /// The backing loader failed or rejected the key
    LoaderFailed,

    /// The owning peer could not be reached
    PeerUnavailable,

    // ========================================================================
    // Server Errors (500)
    // ========================================================================
    /// A cached or transferred payload could not be decoded
    EncodingError,

    /// Configuration is invalid
    ConfigError,

    /// Internal server error
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidInput | ErrorCode::MissingField => StatusCode::BAD_REQUEST,

            ErrorCode::GroupNotFound => StatusCode::NOT_FOUND,

            ErrorCode::LoaderFailed => StatusCode::BAD_GATEWAY,
            ErrorCode::PeerUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            ErrorCode::EncodingError | ErrorCode::ConfigError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Wire name of the code, as serialized in the envelope.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::MissingField => "MISSING_FIELD",
            ErrorCode::GroupNotFound => "GROUP_NOT_FOUND",
            ErrorCode::LoaderFailed => "LOADER_FAILED",
            ErrorCode::PeerUnavailable => "PEER_UNAVAILABLE",
            ErrorCode::EncodingError => "ENCODING_ERROR",
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingField,
            format!("Required field '{}' is missing", field),
        )
    }

    pub fn group_not_found(group: impl fmt::Display) -> Self {
        Self::new(ErrorCode::GroupNotFound, format!("Cache group {} not found", group))
    }

    pub fn loader_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::LoaderFailed, message)
    }

    pub fn peer_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PeerUnavailable, message)
    }

    pub fn encoding_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EncodingError, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        let message = err.to_string();
        match err {
            CacheError::Loader { .. } | CacheError::PeerRejected { .. } => {
                ApiError::loader_failed(message)
            }
            CacheError::PeerTransport { .. } => ApiError::peer_unavailable(message),
            CacheError::Encoding { .. } => ApiError::encoding_error(message),
            CacheError::GroupNotFound { group } => ApiError::group_not_found(group),
            CacheError::Storage(StorageError::EntryTooLarge { .. })
            | CacheError::Storage(StorageError::LockPoisoned)
            | CacheError::FlightAborted { .. } => {
                tracing::error!(error = %message, "Cache failure");
                ApiError::internal_error(message)
            }
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::new(ErrorCode::ConfigError, err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
