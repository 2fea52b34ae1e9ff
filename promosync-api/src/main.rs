//! promosync API Server Entry Point
//!
//! Loads configuration, connects and migrates both databases, starts the
//! rebuild consumer and serves HTTP until Ctrl-C.

use std::net::SocketAddr;

use prometheus::Registry;
use promosync_api::telemetry::{init_tracing, TelemetryConfig};
use promosync_api::{build, create_router, spawn_cache_janitor, spawn_consumer, ApiError, ApiResult};
use promosync_core::SyncConfig;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(&TelemetryConfig::default())?;

    let config = SyncConfig::load()?;
    tracing::info!(environment = %config.environment, "Configuration loaded");

    let app = build(&config, Registry::new()).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = vec![spawn_consumer(app.consumer, app.coordinator, shutdown_rx.clone())];
    if let Some(lmdb) = app.lmdb {
        tasks.push(spawn_cache_janitor(lmdb, config.cache.ttl(), shutdown_rx));
    }

    let addr: SocketAddr = config.http.bind.parse().map_err(|e| {
        ApiError::invalid_input(format!("Invalid bind address {}: {}", config.http.bind, e))
    })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;
    tracing::info!(%addr, "Starting promosync API server");

    axum::serve(listener, create_router(app.state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await
        .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;

    // Receivers may already be gone if a task exited early.
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Background task panicked");
        }
    }

    Ok(())
}
