//! HTTP server setup and lifecycle.
//!
//! Configures the axum router with:
//! - Request instrumentation on every route
//! - The healthcheck endpoint
//! - Graceful shutdown support

use std::net::SocketAddr;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use opentelemetry::{Context, KeyValue};
use serde::Serialize;
use tokio::sync::watch;

use crate::config::Config;
use crate::observability::middleware::instrument;
use crate::observability::span;
use crate::observability::Telemetry;

/// State shared across handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    pub telemetry: Telemetry,
    pub environment: String,
    pub service_name: String,
}

impl AppState {
    pub fn new(config: &Config, telemetry: Telemetry) -> Self {
        Self {
            telemetry,
            environment: config.env.clone(),
            service_name: config.telemetry.service_name.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SystemInfo {
    pub environment: String,
    pub version: &'static str,
    pub service: String,
}

#[derive(Debug, Serialize)]
pub struct Healthcheck {
    pub status: &'static str,
    pub system_info: SystemInfo,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    let telemetry = state.telemetry.clone();
    let routes = Router::new()
        .route("/v1/healthcheck", get(healthcheck_handler))
        .with_state(state);
    instrument(routes, telemetry)
}

/// Handle GET /v1/healthcheck.
async fn healthcheck_handler(State(state): State<AppState>) -> Json<Healthcheck> {
    let (cx, mut span) = state
        .telemetry
        .start_span(&Context::current(), "healthcheck_handler");

    span::add_event(&cx, "Start giving info", vec![]);
    let body = Healthcheck {
        status: "available",
        system_info: SystemInfo {
            environment: state.environment.clone(),
            version: env!("CARGO_PKG_VERSION"),
            service: state.service_name.clone(),
        },
    };
    span::add_event(
        &cx,
        "Ended giving info",
        vec![KeyValue::new("environment", state.environment.clone())],
    );

    tracing::info!(environment = %state.environment, "Healthcheck");
    span.end();
    Json(body)
}

/// Run the HTTP server until `shutdown_rx` fires.
pub async fn run_server(
    config: &Config,
    telemetry: Telemetry,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let app = router(AppState::new(config, telemetry));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Starting HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
            tracing::info!("Shutdown signal received, stopping server");
        })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
