//! simalloc allocator
//!
//! Serves scenario parameters to simulation workers and records their
//! outcomes in a crash-safe allocation ledger.

use std::time::Duration;

use anyhow::Result;
use simalloc_server::{api, config::Config, logging, state::AppState, worker::FlushWorker};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to SIMALLOC_LOG_LEVEL)
    logging::init(&config.log_level, config.log_file.as_deref())?;

    info!("Starting simalloc allocator");
    if let Some(path) = &config.log_file {
        info!(path = %path.display(), "Mirroring logs to file");
    }
    info!(
        listen_addr = %config.listen_addr,
        dataset = %config.dataset_path.display(),
        ledger = %config.ledger_path.display(),
        error_policy = %config.error_policy,
        "Configuration loaded"
    );

    // Load the dataset and reconcile the ledger
    let (state, report) = match AppState::from_config(&config) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Failed to recover allocation ledger");
            return Err(e);
        }
    };
    info!(
        requeued = report.requeued,
        retained = report.retained,
        requeued_errors = report.requeued_errors,
        stale_mappings = report.stale_mappings,
        "Ledger recovered"
    );
    match state.api_token() {
        Some(token) => info!(fingerprint = %token.fingerprint(), "Bearer token auth enabled"),
        None => warn!("SIMALLOC_API_TOKEN not set, /v1 routes are unauthenticated"),
    }

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start flush worker in background
    let flush_worker = FlushWorker::new(state.service().clone(), config.flush_interval);
    let flush_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            flush_worker.run(shutdown_rx).await;
        }
    });

    let service = state.service().clone();
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    // Spawn the server with graceful shutdown
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = Duration::from_secs(10);

    if let Err(e) = tokio::time::timeout(shutdown_timeout, flush_handle).await {
        warn!(error = %e, "Flush worker did not shut down in time");
    }

    // Final flush so the ledger on disk matches memory
    if let Err(e) = service.flush().await {
        error!(error = %e, "Final ledger flush failed");
    }

    info!("Allocator shutdown complete");
    Ok(())
}
