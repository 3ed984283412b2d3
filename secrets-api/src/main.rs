//! Secrets Cache Server Entry Point
//!
//! Bootstraps configuration and telemetry, builds the cache group and serves
//! the application, peer, health and metrics listeners until SIGINT or
//! SIGTERM.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use secrets_api::{
    app_router, build_group, build_loader, health_router,
    jobs::spawn_purge_task,
    metrics_router, peer_router,
    telemetry::{init_tracer, PrometheusRecorder, Recorder, TelemetryConfig},
    ApiError, ApiResult, AppState, ServiceConfig,
};
use tokio::net::TcpListener;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry = init_tracer(&TelemetryConfig::default())?;

    let config = ServiceConfig::from_env()?;
    tracing::info!(
        mode = config.mode.as_str(),
        group = %config.group_name,
        self_url = %config.self_url,
        peers = config.peers.len(),
        label_selector = %config.label_selector,
        cache_bytes = config.cache_bytes,
        "Configuration loaded"
    );

    let loader = build_loader(&config)?;
    let group = build_group(&config, loader)?;

    let metrics = Arc::new(PrometheusRecorder::new(
        &config.metrics_namespace,
        config.latency_buckets.clone(),
    )?);
    metrics.register_cache(Arc::clone(&group))?;
    let recorder: Arc<dyn Recorder> = metrics.clone();
    let state = AppState::new(Arc::clone(&group), recorder);

    // Any bind failure aborts startup.
    let app = bind(config.listen_addr, "app").await?;
    let peer = bind(config.peer_addr, "peer").await?;
    let health = bind(config.health_addr, "health").await?;
    let metrics_listener = bind(config.metrics_addr, "metrics").await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let purge = config
        .purge_expired
        .then(|| spawn_purge_task(Arc::clone(&group), config.purge_interval, shutdown_rx.clone()));

    let servers = tokio::try_join!(
        serve(app, app_router(state.clone(), &config), shutdown_rx.clone()),
        serve(peer, peer_router(state.clone()), shutdown_rx.clone()),
        serve(health, health_router(&config.health_path, state), shutdown_rx.clone()),
        serve(
            metrics_listener,
            metrics_router(&config.metrics_path, metrics),
            shutdown_rx.clone(),
        ),
        async {
            shutdown_signal().await;
            shutdown_tx.send_replace(true);
            Ok::<(), ApiError>(())
        },
    );

    if let Some(purge) = purge {
        shutdown_tx.send_replace(true);
        if let Err(e) = purge.await {
            tracing::warn!(error = %e, "Purge task did not stop cleanly");
        }
    }

    telemetry.shutdown();
    servers.map(|_| ())
}

async fn bind(addr: SocketAddr, name: &str) -> ApiResult<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {} listener on {}: {}", name, addr, e)))?;
    tracing::info!(%addr, listener = name, "Listening");
    Ok(listener)
}

async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown_rx: watch::Receiver<bool>,
) -> ApiResult<()> {
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.wait_for(|stop| *stop).await;
    })
    .await
    .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
