//! W3C trace context on forwarded lookups.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{extract::State, http::HeaderMap, Json, Router};
use opentelemetry::{global, trace::TracerProvider as _};
use opentelemetry_sdk::{propagation::TraceContextPropagator, trace::SdkTracerProvider};
use secrets_api::{HttpPeerClient, PeerValue};
use secrets_cache::CacheGroup;
use secrets_core::{Loaded, MembershipSnapshot, MembershipView, DEFAULT_REPLICAS};
use secrets_test_utils::{fixtures::spawn_server, CountingLoader};
use tracing::Instrument;
use tracing_subscriber::layer::SubscriberExt;

#[path = "support/app.rs"]
mod test_app_support;
use test_app_support::TestResult;

const SELF_ENDPOINT: &str = "http://10.0.0.1:5000";

type Seen = Arc<Mutex<Vec<Option<String>>>>;

/// An owner that answers every peer request and remembers its `traceparent`.
async fn recording_owner() -> std::io::Result<(String, Seen)> {
    let seen: Seen = Arc::default();
    let router = Router::new()
        .fallback(|State(seen): State<Seen>, headers: HeaderMap| async move {
            let traceparent = headers
                .get("traceparent")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            seen.lock().expect("seen lock").push(traceparent);
            let expires_at = chrono::Utc::now() + chrono::Duration::minutes(10);
            Json(PeerValue::from_loaded(&Loaded::new(b"s3cr3t".to_vec(), expires_at)))
        })
        .with_state(Arc::clone(&seen));
    let addr = spawn_server(router).await?;
    Ok((format!("http://{}", addr), seen))
}

#[tokio::test]
async fn test_forwarded_get_carries_traceparent() -> TestResult {
    global::set_text_map_propagator(TraceContextPropagator::new());
    let provider = SdkTracerProvider::builder().build();
    let subscriber = tracing_subscriber::registry()
        .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("secrets-test")));
    let _default = tracing::subscriber::set_default(subscriber);

    let (owner, seen) = recording_owner().await?;
    let membership = Arc::new(MembershipView::new(
        MembershipSnapshot::new(SELF_ENDPOINT, [SELF_ENDPOINT, owner.as_str()]),
        DEFAULT_REPLICAS,
    ));
    let key = (0..100_000)
        .map(|i| format!("key-{}", i))
        .find(|key| membership.current().owner_of(key) == owner)
        .ok_or("no key maps to the owner")?;

    let loader = Arc::new(CountingLoader::secret("local"));
    let group = CacheGroup::new("secrets", 1_000_000, loader.clone(), membership)
        .with_peers(Arc::new(HttpPeerClient::new(Duration::from_millis(500))?));

    let loaded = group
        .get(&key)
        .instrument(tracing::info_span!("secret_lookup"))
        .await?;

    assert_eq!(loaded.value(), b"s3cr3t");
    assert_eq!(loader.calls(), 0);
    let seen = seen.lock().expect("seen lock").clone();
    assert_eq!(seen.len(), 1);
    let traceparent = seen[0].clone().ok_or("owner saw no traceparent")?;
    assert!(traceparent.starts_with("00-"), "{traceparent}");
    Ok(())
}
