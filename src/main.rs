//! arxiv-api: HTTP API with OpenTelemetry tracing and metrics.
//!
//! # Usage
//!
//! ```bash
//! arxiv-api --port 4000 --telemetry-enabled true --trace-endpoint otel:4318
//! ```
//!
//! Environment variables can also be used:
//! - `API_PORT`: Port to listen on
//! - `TELEMETRY_ENABLED`: Export traces and metrics
//! - `TRACE_ENDPOINT` / `METRIC_ENDPOINT`: OTLP/HTTP collectors
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use anyhow::Context as _;
use arxiv_api::config::Config;
use arxiv_api::observability::alloc::CountingAllocator;
use arxiv_api::observability::logging::{init_logging, LogSettings};
use arxiv_api::observability::Telemetry;
use arxiv_api::server::run_server;
use tokio::sync::watch;

#[global_allocator]
static ALLOCATOR: CountingAllocator = CountingAllocator::new();

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration from CLI arguments and environment
    let config = Config::parse_args();

    // Telemetry first so the logging layer can attach to the tracer;
    // its startup summary is logged once the subscriber is installed
    let (telemetry, shutdown) =
        Telemetry::init(&config.telemetry).context("failed to initialize telemetry")?;

    init_logging(
        &LogSettings {
            level: config.log_level.clone(),
            json: config.json_logs(),
            service_name: config.telemetry.service_name.clone(),
        },
        telemetry.sdk_tracer(),
    )
    .context("failed to initialize logging")?;
    telemetry.log_startup(&config.telemetry);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        env = %config.env,
        telemetry_enabled = telemetry.is_enabled(),
        "Starting arxiv-api"
    );

    // Create shutdown signal channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let served = run_server(&config, telemetry, shutdown_rx).await;

    // Flush telemetry even when the server failed
    shutdown.shutdown().await;

    served.map_err(|e| anyhow::anyhow!(e)).context("server error")?;
    tracing::info!("arxiv-api shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {
                        tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM, initiating shutdown...");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler, waiting for Ctrl+C");
                let _ = ctrl_c.await;
                tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = ctrl_c.await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        tracing::info!("Received Ctrl+C, initiating shutdown...");
    }
}
