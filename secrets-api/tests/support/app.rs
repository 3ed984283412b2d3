#![allow(dead_code)]

use std::sync::Arc;

use axum::{body::Body, http::StatusCode, Router};
use secrets_api::{
    app_router, telemetry::NoopRecorder, telemetry::Recorder, AppState, ServiceConfig,
};
use secrets_cache::{CacheGroup, Loader};
use secrets_test_utils::fixtures::local_group;
use tower::ServiceExt;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Configuration with every variable unset, plus `vars`.
pub fn test_config(vars: &[(&str, &str)]) -> ServiceConfig {
    let vars: Vec<(String, String)> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    ServiceConfig::from_lookup(move |name| {
        vars.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    })
    .expect("test configuration")
}

/// Secret-mode application router over a single-node group.
pub fn secret_app(loader: Arc<dyn Loader>) -> (Router, Arc<CacheGroup>) {
    secret_app_with(loader, Arc::new(NoopRecorder))
}

pub fn secret_app_with(
    loader: Arc<dyn Loader>,
    recorder: Arc<dyn Recorder>,
) -> (Router, Arc<CacheGroup>) {
    let group = local_group(loader);
    let state = AppState::new(Arc::clone(&group), recorder);
    (app_router(state, &test_config(&[])), group)
}

pub struct Reply {
    pub status: StatusCode,
    pub request_id: Option<String>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("json body")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub async fn send(router: &Router, request: axum::http::Request<Body>) -> Reply {
    let response = router.clone().oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body")
        .to_vec();
    Reply {
        status,
        request_id,
        body,
    }
}

pub async fn post_secret(router: &Router, body: &str) -> Reply {
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/secret")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request");
    send(router, request).await
}

pub async fn get(router: &Router, uri: &str) -> Reply {
    let request = axum::http::Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request");
    send(router, request).await
}
