//! arxiv-api: an HTTP API service with OpenTelemetry instrumentation.
//!
//! The interesting part is the observability layer: one [`Telemetry`]
//! value per process multiplexes distributed tracing and metrics across
//! every request, samples runtime health in the background, and collapses
//! to no-ops when export is disabled.
//!
//! # Modules
//!
//! - [`config`]: CLI and environment configuration
//! - [`observability`]: Telemetry controller, registry, spans, sampler, middleware
//! - [`server`]: axum router and server lifecycle
//!
//! [`Telemetry`]: observability::Telemetry

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // observability::TelemetryError is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::cast_precision_loss,        // Gauges are f64 by design of the metric API
    clippy::cast_possible_truncation    // Durations in ms fit in u64
)]

pub mod config;
pub mod observability;
pub mod server;
