//! Structured logging setup.
//!
//! Configures:
//! - Console logging, JSON in production
//! - Environment-based filter (via RUST_LOG)
//! - Optional bridge into the OpenTelemetry trace pipeline so log events
//!   carry the active trace

use opentelemetry_sdk::trace::Tracer;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Logging options.
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Filter directive used when RUST_LOG is unset.
    pub level: String,
    /// Render events as JSON.
    pub json: bool,
    /// Service name recorded in the startup event.
    pub service_name: String,
}

/// Initialize logging.
///
/// When `tracer` is set, spans created through `tracing` are exported as
/// OpenTelemetry spans and log lines are attached to the current trace.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(settings: &LogSettings, tracer: Option<Tracer>) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},arxiv_api=debug", settings.level)));

    let fmt_layer = if settings.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    let otel_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    tracing::info!(
        service = %settings.service_name,
        json = settings.json,
        "Logging initialized"
    );
    Ok(())
}

/// Initialize logging for tests (only logs errors).
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("error")
        .with_test_writer()
        .try_init();
}

/// Run `f` with a subscriber that records every event, returning the output.
#[cfg(test)]
pub(crate) fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    use std::io;
    use std::sync::Arc;

    use parking_lot::Mutex;

    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let buffer = Arc::new(Mutex::new(Vec::new()));
    let writer = Arc::clone(&buffer);
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || Captured(Arc::clone(&writer)))
        .finish();

    let result = tracing::subscriber::with_default(subscriber, f);
    let output = String::from_utf8_lossy(&buffer.lock()).into_owned();
    (result, output)
}
