//! Proxy-mode facade.
//!
//! Every request on the application listener is keyed by `METHOD URI` and
//! answered with the cached upstream status and body.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::{header::CONTENT_TYPE, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Extension,
};

use crate::facade::{request_ip, RequestObservation};
use crate::loader::CachedResponse;
use crate::state::AppState;
use crate::telemetry::RequestId;

/// Cache key of a proxied request. The body is not part of it.
pub fn proxy_key(method: &Method, uri: &Uri) -> String {
    let target = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    format!("{} {}", method, target)
}

fn render(cached: CachedResponse) -> Response {
    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let body = if cached.body.is_empty() && cached.is_error() {
        status
            .canonical_reason()
            .unwrap_or("upstream error")
            .as_bytes()
            .to_vec()
    } else {
        cached.body
    };

    let mut response = (status, body).into_response();
    if let Some(content_type) = cached
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}

/// Fallback handler for every application route.
pub async fn proxy(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    remote: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    uri: Uri,
) -> Response {
    let observation = RequestObservation::start(
        &method,
        &uri,
        request_ip(remote.map(|ConnectInfo(addr)| addr)),
        request_id.map(|Extension(id)| id.0).unwrap_or_default(),
    );
    let key = proxy_key(&method, &uri);

    let resolved = state
        .group
        .get(&key)
        .await
        .and_then(|loaded| CachedResponse::decode(&key, loaded.value()));

    match resolved {
        Ok(cached) => {
            observation.finish(state.recorder.as_ref(), Some(&key), Some(cached.status), None);
            render(cached)
        }
        Err(err) => {
            let message = err.to_string();
            observation.finish(state.recorder.as_ref(), Some(&key), None, Some(&message));
            (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
        }
    }
}
