//! Error types for telemetry setup.
//!
//! Only startup failures are surfaced as errors. Recording paths log and
//! drop instead of returning these.

use opentelemetry::metrics::MetricsError;
use opentelemetry::trace::TraceError;
use thiserror::Error;

use super::registry::InstrumentKind;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid telemetry configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to create trace exporter: {0}")]
    TraceExporter(#[from] TraceError),

    #[error("failed to create metric exporter: {0}")]
    MetricExporter(#[source] MetricsError),

    #[error("failed to create {name}: {source}")]
    Instrument {
        name: String,
        #[source]
        source: MetricsError,
    },

    #[error("instrument {name} is already registered as a {existing}, not a {requested}")]
    InstrumentKindConflict {
        name: String,
        existing: InstrumentKind,
        requested: InstrumentKind,
    },
}
