//! Axum Middleware for HTTP Request Tracing
//!
//! Wraps every request on the app and peer listeners with:
//! - a correlation id (`x-request-id`, UUIDv7 when the caller sent none)
//! - a tracing span parented on the incoming W3C trace context
//! - a completion log line

use std::time::Instant;

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
    Router,
};
use opentelemetry::{global, Context};
use opentelemetry_http::{HeaderExtractor, HeaderInjector};
use tower::ServiceBuilder;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId as HeaderRequestId, SetRequestIdLayer,
};
use tracing::{field::Empty, info_span, Instrument};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use uuid::Uuid;

/// Correlation id of the request being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Generates time-ordered UUIDv7 request ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<HeaderRequestId> {
        HeaderValue::from_str(&Uuid::now_v7().to_string())
            .ok()
            .map(HeaderRequestId::new)
    }
}

/// Extract trace context from incoming request headers.
fn extract_trace_context(headers: &HeaderMap) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

/// Write the current span's trace context into outgoing headers.
pub fn inject_trace_context(headers: &mut HeaderMap) {
    let cx = tracing::Span::current().context();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&cx, &mut HeaderInjector(headers))
    });
}

/// Observability middleware for Axum.
pub async fn observability_middleware(mut request: Request, next: Next) -> Response {
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<HeaderRequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::now_v7().to_string());
    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let parent_context = extract_trace_context(request.headers());

    let span = info_span!(
        "http_request",
        otel.kind = "server",
        request_id = %request_id,
        http.route = %path,
        http.status_code = Empty,
        method = Empty,
        uri = Empty,
        request_ip = Empty,
        outcome = Empty,
        elapsed = Empty,
        response_error = Empty,
    );
    let _ = span.set_parent(parent_context);

    let response = next.run(request).instrument(span.clone()).await;

    let status = response.status().as_u16();
    span.record("http.status_code", status);
    tracing::info!(
        parent: &span,
        method = %method,
        path = %path,
        status,
        duration_ms = start.elapsed().as_millis() as u64,
        request_id = %request_id,
        "Request completed"
    );

    response
}

/// Attach the correlation id and tracing layers to `router`.
pub fn observed(router: Router) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(axum::middleware::from_fn(observability_middleware)),
    )
}
