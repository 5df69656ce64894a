//! OpenTelemetry observability infrastructure.
//!
//! Provides:
//! - Tracing and metrics export over OTLP/HTTP
//! - A per-process instrument registry with absolute gauges
//! - Request instrumentation middleware for axum routers
//! - A background sampler for runtime health metrics
//!
//! [`Telemetry::init`] is called once at startup. It either builds the
//! export pipeline or installs no-op providers; both return the same
//! [`Telemetry`] type, so callers never branch on the mode.

pub mod alloc;
pub mod error;
pub mod instruments;
pub mod logging;
pub mod middleware;
pub mod registry;
pub mod sampler;
pub mod span;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::metrics::noop::NoopMeterProvider;
use opentelemetry::metrics::MeterProvider as _;
use opentelemetry::trace::noop::NoopTracerProvider;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, Context, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{Sampler, Tracer, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use tokio_util::sync::CancellationToken;

use crate::config::TelemetryConfig;
use crate::observability::instruments::InstrumentSpec;

pub use error::TelemetryError;
pub use registry::{Gauge, InstrumentKind, Registry};
pub use sampler::{ProcessStats, RuntimeStats, SamplerHandle, StatsSource, SystemSampler};
pub use span::{RequestSpan, SpanFacade};

/// Instrumentation scope name for the service's meter.
pub const METER_NAME: &str = "application-metrics";

/// How often metrics are pushed to the collector.
pub const METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Upper bound on [`ShutdownHandle::shutdown`].
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-request timeout for exporter calls.
const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

/// Process-wide instrumentation front-end.
///
/// Cheap to clone; clones share one registry and one tracer.
#[derive(Clone)]
pub struct Telemetry {
    spans: SpanFacade,
    registry: Arc<Registry>,
    tracer: Option<Tracer>,
}

impl Telemetry {
    /// Build the telemetry pipeline described by `config`.
    ///
    /// When telemetry is disabled, no-op providers are installed globally and
    /// the returned shutdown handle does nothing. When enabled, OTLP/HTTP
    /// exporters are built, the built-in instruments are declared, the
    /// system sampler is started and only then are the providers installed
    /// as the globals; this path must run inside a tokio runtime.
    ///
    /// Nothing is logged on success; see [`Telemetry::log_startup`].
    pub fn init(config: &TelemetryConfig) -> Result<(Self, ShutdownHandle), TelemetryError> {
        config.validate()?;

        if !config.telemetry_enabled {
            global::set_tracer_provider(NoopTracerProvider::new());
            global::set_meter_provider(NoopMeterProvider::new());
            return Ok((Self::disabled(), ShutdownHandle::noop()));
        }

        let resource = resource(config);

        let tracer_provider = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .http()
                    .with_endpoint(config.trace_url())
                    .with_timeout(EXPORT_TIMEOUT),
            )
            .with_trace_config(
                opentelemetry_sdk::trace::Config::default()
                    .with_sampler(Sampler::TraceIdRatioBased(config.trace_ratio))
                    .with_resource(resource.clone()),
            )
            .install_batch(runtime::Tokio)?;

        let meter_provider = match opentelemetry_otlp::new_pipeline()
            .metrics(runtime::Tokio)
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .http()
                    .with_endpoint(config.metric_url())
                    .with_timeout(EXPORT_TIMEOUT),
            )
            .with_resource(resource)
            .with_period(METRIC_EXPORT_INTERVAL)
            .build()
        {
            Ok(provider) => provider,
            Err(e) => {
                if let Err(shutdown_err) = tracer_provider.shutdown() {
                    tracing::warn!(error = %shutdown_err, "Failed to shut down tracer provider");
                }
                return Err(TelemetryError::MetricExporter(e));
            }
        };

        // Declare before going global so a failure leaves the globals untouched.
        let (telemetry, shutdown) = Self::with_providers(
            tracer_provider.clone(),
            meter_provider.clone(),
            config.max_route_counters,
        )?;
        global::set_tracer_provider(tracer_provider);
        global::set_meter_provider(meter_provider);
        Ok((telemetry, shutdown))
    }

    /// Wire a registry, tracer and sampler onto existing providers.
    ///
    /// Does not touch the global providers. If the built-in instruments
    /// cannot be declared, both providers are shut down and the error is
    /// returned. Must run inside a tokio runtime.
    pub fn with_providers(
        tracer_provider: TracerProvider,
        meter_provider: SdkMeterProvider,
        dynamic_counter_limit: usize,
    ) -> Result<(Self, ShutdownHandle), TelemetryError> {
        Self::with_catalog(
            tracer_provider,
            meter_provider,
            dynamic_counter_limit,
            &instruments::BUILTIN,
        )
    }

    fn with_catalog(
        tracer_provider: TracerProvider,
        meter_provider: SdkMeterProvider,
        dynamic_counter_limit: usize,
        catalog: &[InstrumentSpec],
    ) -> Result<(Self, ShutdownHandle), TelemetryError> {
        let registry = Arc::new(Registry::new(
            meter_provider.meter(METER_NAME),
            dynamic_counter_limit,
        ));
        if let Err(e) = registry.declare(catalog) {
            close_providers(&tracer_provider, &meter_provider);
            return Err(e);
        }

        let sampler = SystemSampler::new(Arc::clone(&registry), ProcessStats::new())
            .spawn(CancellationToken::new());

        let telemetry = Self {
            spans: SpanFacade::from_provider(&tracer_provider),
            registry,
            tracer: Some(tracer_provider.tracer(span::TRACER_NAME)),
        };
        let shutdown = ShutdownHandle {
            providers: Some((tracer_provider, meter_provider)),
            sampler: Some(sampler),
            timeout: SHUTDOWN_TIMEOUT,
        };
        Ok((telemetry, shutdown))
    }

    /// Log the outcome of [`Telemetry::init`].
    ///
    /// Called once the subscriber is installed; `init` itself logs nothing
    /// on success.
    pub fn log_startup(&self, config: &TelemetryConfig) {
        if self.is_enabled() {
            tracing::info!(
                service = %config.service_name,
                trace_endpoint = %config.trace_url(),
                metric_endpoint = %config.metric_url(),
                trace_ratio = config.trace_ratio,
                dynamic_counter_limit = config.max_route_counters,
                "Telemetry initialized"
            );
        } else {
            tracing::info!(service = %config.service_name, "Telemetry disabled");
        }
    }

    /// Telemetry whose every operation is a no-op.
    pub fn disabled() -> Self {
        Self {
            spans: SpanFacade::Noop,
            registry: Arc::new(Registry::noop()),
            tracer: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.spans.is_active()
    }

    pub fn spans(&self) -> &SpanFacade {
        &self.spans
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// SDK tracer for bridging `tracing` spans, when enabled.
    pub fn sdk_tracer(&self) -> Option<Tracer> {
        self.tracer.clone()
    }

    pub fn start_span(&self, parent: &Context, name: &'static str) -> (Context, RequestSpan) {
        self.spans.start_span(parent, name)
    }

    pub fn increment(&self, name: &str, delta: u64, labels: &[KeyValue]) {
        self.registry.increment(name, delta, labels);
    }

    pub fn record_histogram(&self, name: &str, value: f64, labels: &[KeyValue]) {
        self.registry.record_histogram(name, value, labels);
    }

    pub fn set_gauge(&self, name: &str, value: f64, labels: &[KeyValue]) {
        self.registry.set_gauge(name, value, labels);
    }
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("spans", &self.spans)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Stops the sampler and flushes the providers.
///
/// Consumed by [`ShutdownHandle::shutdown`], so it runs at most once.
pub struct ShutdownHandle {
    providers: Option<(TracerProvider, SdkMeterProvider)>,
    sampler: Option<SamplerHandle>,
    timeout: Duration,
}

impl ShutdownHandle {
    /// Handle with nothing to shut down.
    pub fn noop() -> Self {
        Self {
            providers: None,
            sampler: None,
            timeout: SHUTDOWN_TIMEOUT,
        }
    }

    /// Override the shutdown bound.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Stop the sampler, then flush and close both providers.
    ///
    /// Best-effort: failures are logged and the call always returns within
    /// the configured bound. Provider shutdown runs on a blocking thread
    /// that is not cancelled when the bound fires; it keeps going until the
    /// exporters give up, each request being capped at the export timeout.
    /// Dropping the runtime waits for that thread, so process exit can lag
    /// this call by up to one export timeout per provider.
    pub async fn shutdown(self) {
        let Self {
            providers,
            sampler,
            timeout,
        } = self;

        let work = async move {
            if let Some(sampler) = sampler {
                sampler.stop().await;
            }

            if let Some((tracer_provider, meter_provider)) = providers {
                // Provider shutdown blocks on exporter I/O.
                let flush = tokio::task::spawn_blocking(move || {
                    if let Err(e) = tracer_provider.shutdown() {
                        tracing::error!(error = %e, "Error shutting down tracer provider");
                    }
                    if let Err(e) = meter_provider.shutdown() {
                        tracing::error!(error = %e, "Error shutting down meter provider");
                    }
                });
                if let Err(e) = flush.await {
                    tracing::error!(error = %e, "Telemetry flush task failed");
                }
            }
        };

        if tokio::time::timeout(timeout, work).await.is_err() {
            tracing::error!(
                timeout_ms = timeout.as_millis() as u64,
                "Telemetry shutdown timed out"
            );
        } else {
            tracing::debug!("Telemetry shut down");
        }
    }
}

impl fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("providers", &self.providers.is_some())
            .field("sampler", &self.sampler)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Best-effort close of providers that never went into service.
fn close_providers(tracer_provider: &TracerProvider, meter_provider: &SdkMeterProvider) {
    if let Err(e) = tracer_provider.shutdown() {
        tracing::warn!(error = %e, "Failed to shut down tracer provider");
    }
    if let Err(e) = meter_provider.shutdown() {
        tracing::warn!(error = %e, "Failed to shut down meter provider");
    }
}

fn resource(config: &TelemetryConfig) -> Resource {
    Resource::new([
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new("deployment.environment", config.environment.clone()),
    ])
}
