//! OpenTelemetry Tracer Initialization
//!
//! Sets up the tracing subscriber (JSON logs + OpenTelemetry bridge) and,
//! when an OTLP endpoint is configured, an OTLP/HTTP span exporter compatible
//! with Jaeger, Grafana Tempo or any OTLP collector.

use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
    Resource,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ApiError, ApiResult};

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// OTLP/HTTP collector base URL (e.g. "http://otel-collector:4318")
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
    pub service_version: String,
    /// Environment (production, staging, development)
    pub environment: String,
    /// Trace sampling ratio (0.0 to 1.0)
    pub trace_sample_rate: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            service_name: std::env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "secrets".to_string()),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: std::env::var("DEPLOYMENT_ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            trace_sample_rate: std::env::var("OTEL_TRACE_SAMPLE_RATE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1.0),
        }
    }
}

/// Keeps the tracer provider alive; flushes pending spans on shutdown.
#[derive(Debug)]
pub struct TelemetryGuard {
    provider: SdkTracerProvider,
}

impl TelemetryGuard {
    /// Flush and stop the tracer provider. Call once before exit.
    pub fn shutdown(self) {
        if let Err(e) = self.provider.shutdown() {
            tracing::warn!(error = %e, "Tracer shutdown failed");
        } else {
            tracing::info!("Tracer shutdown complete");
        }
    }
}

fn sampler_for(rate: f64) -> Sampler {
    if rate >= 1.0 {
        Sampler::ParentBased(Box::new(Sampler::AlwaysOn))
    } else if rate <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(rate)))
    }
}

/// Initialize the tracer provider and the global tracing subscriber.
///
/// Must be called once at startup, before any span is created. Installs
/// W3C TraceContext propagation so trace context crosses the peer hop.
pub fn init_tracer(config: &TelemetryConfig) -> ApiResult<TelemetryGuard> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attributes([
            KeyValue::new("service.version", config.service_version.clone()),
            KeyValue::new("deployment.environment", config.environment.clone()),
        ])
        .build();

    let builder = SdkTracerProvider::builder()
        .with_sampler(sampler_for(config.trace_sample_rate))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource);

    let provider = match &config.otlp_endpoint {
        Some(endpoint) => {
            let exporter = SpanExporter::builder()
                .with_http()
                .with_endpoint(format!("{}/v1/traces", endpoint.trim_end_matches('/')))
                .build()
                .map_err(|e| {
                    ApiError::internal_error(format!("Failed to create OTLP exporter: {}", e))
                })?;
            builder.with_batch_exporter(exporter).build()
        }
        // Spans still get ids so trace context propagates to peers.
        None => builder.build(),
    };

    let tracer = provider.tracer("secrets");
    global::set_tracer_provider(provider.clone());

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("secrets_api=info,secrets_cache=info,tower_http=info,warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init()
        .map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = %config.service_name,
        environment = %config.environment,
        otlp_endpoint = ?config.otlp_endpoint,
        "Telemetry initialized"
    );

    Ok(TelemetryGuard { provider })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_selection() {
        assert!(matches!(sampler_for(1.0), Sampler::ParentBased(_)));
        assert!(matches!(sampler_for(0.0), Sampler::AlwaysOff));
        assert!(matches!(sampler_for(-1.0), Sampler::AlwaysOff));
        assert!(matches!(sampler_for(0.25), Sampler::ParentBased(_)));
    }

    #[test]
    fn test_telemetry_config_has_service_identity() {
        let config = TelemetryConfig::default();
        assert!(!config.service_name.is_empty());
        assert_eq!(config.service_version, env!("CARGO_PKG_VERSION"));
    }
}
