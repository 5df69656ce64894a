//! Test utilities for telemetry tests.
//!
//! Provides:
//! - A `Telemetry` wired to in-memory span and metric exporters
//! - Helpers to read counter sums, gauge totals and histogram counts

#![allow(dead_code)]

use std::time::Duration;

use arxiv_api::observability::logging::init_test_logging;
use arxiv_api::observability::{ShutdownHandle, Telemetry};
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::metrics::data::{Histogram, ResourceMetrics, Sum};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::runtime;
use opentelemetry_sdk::testing::metrics::InMemoryMetricsExporter;
use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
use opentelemetry_sdk::trace::TracerProvider;

/// Telemetry backed by in-memory exporters.
///
/// Metric reads flush the meter provider, which blocks on the periodic
/// reader task; tests using them need the multi-thread runtime.
pub struct TestTelemetry {
    pub telemetry: Telemetry,
    pub shutdown: ShutdownHandle,
    span_exporter: InMemorySpanExporter,
    metric_exporter: InMemoryMetricsExporter,
    meter_provider: SdkMeterProvider,
}

impl TestTelemetry {
    /// Start telemetry with the default dynamic counter limit.
    pub fn start() -> Self {
        Self::with_limit(256)
    }

    /// Start telemetry with at most `limit` lazily created counters.
    pub fn with_limit(limit: usize) -> Self {
        init_test_logging();

        let span_exporter = InMemorySpanExporter::default();
        let tracer_provider = TracerProvider::builder()
            .with_simple_exporter(span_exporter.clone())
            .build();

        let metric_exporter = InMemoryMetricsExporter::default();
        let reader = PeriodicReader::builder(metric_exporter.clone(), runtime::Tokio)
            .with_interval(Duration::from_secs(3600))
            .build();
        let meter_provider = SdkMeterProvider::builder().with_reader(reader).build();

        let (telemetry, shutdown) =
            Telemetry::with_providers(tracer_provider, meter_provider.clone(), limit)
                .expect("failed to build telemetry");

        Self {
            telemetry,
            shutdown,
            span_exporter,
            metric_exporter,
            meter_provider,
        }
    }

    /// Spans ended so far.
    pub fn spans(&self) -> Vec<SpanData> {
        self.span_exporter
            .get_finished_spans()
            .expect("failed to read spans")
    }

    /// Flush and return the latest cumulative export.
    fn latest(&self) -> Option<ResourceMetrics> {
        self.meter_provider.force_flush().expect("flush failed");
        self.metric_exporter
            .get_finished_metrics()
            .expect("failed to read metrics")
            .pop()
    }

    /// Sum over all attribute sets of the u64 counter `name`.
    pub fn counter_total(&self, name: &str) -> u64 {
        let Some(metrics) = self.latest() else {
            return 0;
        };
        metrics
            .scope_metrics
            .iter()
            .flat_map(|scope| scope.metrics.iter())
            .filter(|metric| metric.name == name)
            .filter_map(|metric| metric.data.as_any().downcast_ref::<Sum<u64>>())
            .flat_map(|sum| sum.data_points.iter())
            .map(|point| point.value)
            .sum()
    }

    /// Sum over all attribute sets of the up/down counter behind gauge `name`.
    pub fn gauge_total(&self, name: &str) -> f64 {
        let Some(metrics) = self.latest() else {
            return 0.0;
        };
        metrics
            .scope_metrics
            .iter()
            .flat_map(|scope| scope.metrics.iter())
            .filter(|metric| metric.name == name)
            .filter_map(|metric| metric.data.as_any().downcast_ref::<Sum<f64>>())
            .flat_map(|sum| sum.data_points.iter())
            .map(|point| point.value)
            .sum()
    }

    /// Number of observations recorded on histogram `name`.
    pub fn histogram_count(&self, name: &str) -> u64 {
        let Some(metrics) = self.latest() else {
            return 0;
        };
        metrics
            .scope_metrics
            .iter()
            .flat_map(|scope| scope.metrics.iter())
            .filter(|metric| metric.name == name)
            .filter_map(|metric| metric.data.as_any().downcast_ref::<Histogram<f64>>())
            .flat_map(|histogram| histogram.data_points.iter())
            .map(|point| point.count)
            .sum()
    }
}

/// Value of attribute `key` on `span` rendered as a string.
pub fn span_attr(span: &SpanData, key: &str) -> Option<String> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.as_str().into_owned())
}

