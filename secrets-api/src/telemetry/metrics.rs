//! Prometheus Metrics Definitions
//!
//! Metrics live in a per-service [`Registry`] handed to whoever needs it;
//! nothing registers into the process-global default registry. Request
//! outcomes go through the [`Recorder`] trait so tests can swap in
//! [`NoopRecorder`].

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use prometheus::{
    core::{Collector, Desc, Describer},
    proto::MetricFamily,
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use secrets_cache::{CacheGroup, GroupStats, StoreStats};

use crate::error::{ApiError, ApiResult};
use crate::facade::Outcome;

/// Sink for per-request observations.
///
/// Recording is fire-and-forget: implementations must never fail or block
/// the request that is being recorded.
pub trait Recorder: Send + Sync {
    /// Record one classified request. `status` is absent when the request
    /// failed before a response status was known.
    fn record_request(&self, method: &str, status: Option<u16>, outcome: Outcome, elapsed: Duration);
}

/// Recorder that drops every observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl Recorder for NoopRecorder {
    fn record_request(&self, _: &str, _: Option<u16>, _: Outcome, _: Duration) {}
}

/// Prometheus-backed recorder owning the service registry.
#[derive(Clone)]
pub struct PrometheusRecorder {
    registry: Registry,
    namespace: String,
    request_latency: HistogramVec,
}

impl PrometheusRecorder {
    /// Create the registry and register the request metrics.
    pub fn new(namespace: &str, latency_buckets: Vec<f64>) -> ApiResult<Self> {
        let registry = Registry::new();

        let request_latency = HistogramVec::new(
            HistogramOpts::new(
                "http_server_request_duration_seconds",
                "Spent time for HTTP requests, labelled by method, status and outcome",
            )
            .namespace(namespace)
            .buckets(latency_buckets),
            &["method", "status", "outcome"],
        )
        .map_err(|e| ApiError::internal_error(format!("Failed to create request histogram: {}", e)))?;
        registry
            .register(Box::new(request_latency.clone()))
            .map_err(|e| ApiError::internal_error(format!("Failed to register request histogram: {}", e)))?;

        #[cfg(target_os = "linux")]
        registry
            .register(Box::new(prometheus::process_collector::ProcessCollector::for_self()))
            .map_err(|e| ApiError::internal_error(format!("Failed to register process collector: {}", e)))?;

        Ok(Self {
            registry,
            namespace: namespace.to_string(),
            request_latency,
        })
    }

    /// Export the counters of `group` and its local store at scrape time.
    pub fn register_cache(&self, group: Arc<CacheGroup>) -> ApiResult<()> {
        let collector = CacheCollector::new(&self.namespace, group)?;
        self.registry
            .register(Box::new(collector))
            .map_err(|e| ApiError::internal_error(format!("Failed to register cache collector: {}", e)))
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode(&self) -> ApiResult<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| ApiError::internal_error(format!("Failed to encode metrics: {}", e)))?;
        Ok(buffer)
    }
}

impl Recorder for PrometheusRecorder {
    fn record_request(&self, method: &str, status: Option<u16>, outcome: Outcome, elapsed: Duration) {
        let status = status.map(|s| s.to_string()).unwrap_or_default();
        self.request_latency
            .with_label_values(&[method, status.as_str(), outcome.as_str()])
            .observe(elapsed.as_secs_f64());
    }
}

#[derive(Clone, Copy)]
enum MetricKind {
    Counter,
    Gauge,
}

struct CacheMetric {
    opts: Opts,
    kind: MetricKind,
    read: fn(&GroupStats, &StoreStats) -> u64,
}

/// Reads group and store statistics on every scrape.
struct CacheCollector {
    group: Arc<CacheGroup>,
    metrics: Vec<CacheMetric>,
    descs: Vec<Desc>,
}

impl CacheCollector {
    fn new(namespace: &str, group: Arc<CacheGroup>) -> ApiResult<Self> {
        use MetricKind::{Counter, Gauge};

        let specs: [(&str, &str, MetricKind, fn(&GroupStats, &StoreStats) -> u64); 14] = [
            ("cache_gets_total", "Lookups served by the cache group", Counter, |g, _| g.gets),
            ("cache_local_hits_total", "Lookups answered from the local store", Counter, |g, _| g.local_hits),
            ("cache_loads_total", "Loader invocations", Counter, |g, _| g.loads),
            ("cache_load_errors_total", "Loader invocations that failed", Counter, |g, _| g.load_errors),
            ("cache_peer_fetches_total", "Fetches sent to owning peers", Counter, |g, _| g.peer_fetches),
            ("cache_peer_errors_total", "Peer fetches that failed", Counter, |g, _| g.peer_errors),
            ("cache_fallbacks_total", "Lookups resolved locally because the owner was unreachable", Counter, |g, _| g.fallbacks),
            ("cache_store_hits_total", "Local store hits", Counter, |_, s| s.hits),
            ("cache_store_misses_total", "Local store misses", Counter, |_, s| s.misses),
            ("cache_store_evictions_total", "Entries evicted to respect the byte budget", Counter, |_, s| s.evictions),
            ("cache_store_expirations_total", "Entries dropped after expiring", Counter, |_, s| s.expirations),
            ("cache_store_items", "Entries currently held", Gauge, |_, s| s.items),
            ("cache_store_bytes", "Bytes currently charged against the budget", Gauge, |_, s| s.bytes),
            ("cache_store_max_bytes", "Configured byte budget", Gauge, |_, s| s.max_bytes),
        ];

        let mut metrics = Vec::with_capacity(specs.len());
        let mut descs = Vec::with_capacity(specs.len());
        for (name, help, kind, read) in specs {
            let opts = Opts::new(name, help)
                .namespace(namespace)
                .const_label("group", group.name());
            descs.push(
                opts.describe()
                    .map_err(|e| ApiError::internal_error(format!("Invalid metric {}: {}", name, e)))?,
            );
            metrics.push(CacheMetric { opts, kind, read });
        }

        Ok(Self {
            group,
            metrics,
            descs,
        })
    }
}

impl Collector for CacheCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let group_stats = self.group.stats();
        let store_stats = match self.group.store().stats() {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping cache metrics");
                return Vec::new();
            }
        };

        let mut families = Vec::with_capacity(self.metrics.len());
        for metric in &self.metrics {
            let value = (metric.read)(&group_stats, &store_stats);
            let collected = match metric.kind {
                MetricKind::Counter => IntCounter::with_opts(metric.opts.clone()).map(|c| {
                    c.inc_by(value);
                    c.collect()
                }),
                MetricKind::Gauge => IntGauge::with_opts(metric.opts.clone()).map(|g| {
                    g.set(i64::try_from(value).unwrap_or(i64::MAX));
                    g.collect()
                }),
            };
            match collected {
                Ok(mut family) => families.append(&mut family),
                Err(e) => tracing::warn!(error = %e, "Failed to build cache metric"),
            }
        }
        families
    }
}

/// Handler for the metrics route.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler(State(metrics): State<Arc<PrometheusRecorder>>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.message.into_bytes(),
            )
        }
    }
}
