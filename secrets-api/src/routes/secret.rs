//! Secret-mode facade.
//!
//! `POST {APP_ROUTE}` with `{"secret_name": "..."}`. The trimmed name is the
//! cache key; the cached bytes are a [`CachedSecret`] document.

use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::facade::{request_ip, RequestObservation};
use crate::loader::CachedSecret;
use crate::state::AppState;
use crate::telemetry::RequestId;

/// Request body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecretRequest {
    #[serde(default)]
    pub secret_name: String,
}

/// Response body. Empty fields are left out, so a success renders as
/// `{"secret_value":"..."}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl SecretResponse {
    pub fn value(secret_value: String) -> Self {
        Self {
            secret_value,
            ..Self::default()
        }
    }

    pub fn error(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            status: Some(status.as_u16()),
            ..Self::default()
        }
    }

    fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

/// POST {APP_ROUTE}
pub async fn get_secret(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    remote: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let observation = RequestObservation::start(
        &method,
        &uri,
        request_ip(remote.map(|ConnectInfo(addr)| addr)),
        request_id.map(|Extension(id)| id.0).unwrap_or_default(),
    );
    let recorder = state.recorder.as_ref();

    let request: SecretRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            let status = StatusCode::BAD_REQUEST;
            observation.finish(recorder, None, Some(status.as_u16()), None);
            return SecretResponse::error(status, format!("Invalid JSON: {}", e))
                .into_response_with(status);
        }
    };

    let key = request.secret_name.trim();
    if key.is_empty() {
        let status = StatusCode::BAD_REQUEST;
        observation.finish(recorder, None, Some(status.as_u16()), None);
        return SecretResponse::error(status, "Required field 'secret_name' is missing")
            .into_response_with(status);
    }

    let resolved = state
        .group
        .get(key)
        .await
        .and_then(|loaded| CachedSecret::decode(key, loaded.value()));

    match resolved {
        Ok(secret) => {
            observation.finish(recorder, Some(key), Some(StatusCode::OK.as_u16()), None);
            SecretResponse::value(secret.secret_value).into_response_with(StatusCode::OK)
        }
        Err(err) => {
            let message = err.to_string();
            observation.finish(recorder, Some(key), None, Some(&message));
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            SecretResponse::error(status, message).into_response_with(status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_renders_value_only() -> Result<(), serde_json::Error> {
        let json = serde_json::to_string(&SecretResponse::value("s3cr3t".to_string()))?;
        assert_eq!(json, r#"{"secret_value":"s3cr3t"}"#);
        Ok(())
    }

    #[test]
    fn test_error_renders_error_and_status() -> Result<(), serde_json::Error> {
        let json = serde_json::to_value(SecretResponse::error(StatusCode::BAD_REQUEST, "nope"))?;
        assert_eq!(json, serde_json::json!({"error": "nope", "status": 400}));
        Ok(())
    }

    #[test]
    fn test_missing_name_deserializes_empty() -> Result<(), serde_json::Error> {
        let request: SecretRequest = serde_json::from_str("{}")?;
        assert!(request.secret_name.is_empty());
        Ok(())
    }
}
