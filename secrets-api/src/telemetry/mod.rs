//! Secrets Telemetry - Observability Infrastructure
//!
//! Provides OpenTelemetry tracing, correlation ids and Prometheus metrics
//! for the HTTP listeners.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics_handler, NoopRecorder, PrometheusRecorder, Recorder};
pub use middleware::{inject_trace_context, observability_middleware, observed, RequestId};
pub use tracer::{init_tracer, TelemetryConfig, TelemetryGuard};
