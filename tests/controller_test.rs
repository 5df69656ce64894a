//! Telemetry controller lifecycle tests.
//!
//! Tests:
//! - Disabled mode: full call surface is safe
//! - Enabled mode: built-in catalog is declared
//! - Shutdown with an unresponsive collector returns within the bound
//! - Shutdown honours a custom bound
//! - Sampler collection-cycle deltas reach gc_runs_total

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use arxiv_api::config::TelemetryConfig;
use arxiv_api::observability::instruments::{self, BUILTIN, GC_RUNS_TOTAL};
use arxiv_api::observability::{
    span, RuntimeStats, StatsSource, SystemSampler, Telemetry, SHUTDOWN_TIMEOUT,
};
use common::TestTelemetry;
use opentelemetry::{Context, KeyValue};

/// Replays a fixed list of readings.
struct ScriptedSource {
    readings: Vec<RuntimeStats>,
}

impl StatsSource for ScriptedSource {
    fn sample(&mut self) -> RuntimeStats {
        if self.readings.is_empty() {
            RuntimeStats::default()
        } else {
            self.readings.remove(0)
        }
    }
}

#[tokio::test]
async fn test_disabled_init_full_surface() {
    let (telemetry, shutdown) = Telemetry::init(&TelemetryConfig::default()).unwrap();
    assert!(!telemetry.is_enabled());

    let (cx, mut request_span) = telemetry.start_span(&Context::current(), "request");
    request_span.set_attributes([KeyValue::new("http.method", "GET")]);
    span::add_event(&cx, "event", vec![]);
    span::set_attributes(&cx, [KeyValue::new("k", "v")]);
    telemetry.increment(instruments::HTTP_REQUESTS_TOTAL, 1, &[]);
    telemetry.increment("http_requests_get__anything", 1, &[]);
    telemetry.record_histogram(instruments::HTTP_REQUEST_DURATION_SECONDS, 0.01, &[]);
    telemetry.set_gauge(instruments::NUM_CPU, 8.0, &[]);
    request_span.end();

    let started = Instant::now();
    shutdown.shutdown().await;
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_builtin_catalog_is_declared() {
    let harness = TestTelemetry::start();
    let registry = harness.telemetry.registry();
    for spec in BUILTIN {
        assert_eq!(registry.kind_of(spec.name), Some(spec.kind), "{}", spec.name);
    }
    assert!(harness.telemetry.is_enabled());
    assert!(harness.telemetry.sdk_tracer().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_with_unresponsive_collector_is_bounded() {
    // Accepts connections and never answers.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let config = TelemetryConfig {
        telemetry_enabled: true,
        trace_endpoint: addr.to_string(),
        metric_endpoint: addr.to_string(),
        trace_ratio: 1.0,
        ..TelemetryConfig::default()
    };
    let (telemetry, shutdown) = Telemetry::init(&config).unwrap();
    assert!(telemetry.is_enabled());

    let (_cx, mut request_span) = telemetry.start_span(&Context::current(), "request");
    request_span.end();
    telemetry.increment(instruments::HTTP_REQUESTS_TOTAL, 1, &[]);

    let started = Instant::now();
    shutdown.shutdown().await;
    assert!(started.elapsed() < SHUTDOWN_TIMEOUT + Duration::from_secs(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_with_refused_collector_returns() {
    let config = TelemetryConfig {
        telemetry_enabled: true,
        // Reserved port, nothing listens here.
        trace_endpoint: "127.0.0.1:9".into(),
        metric_endpoint: "127.0.0.1:9".into(),
        ..TelemetryConfig::default()
    };
    let (telemetry, shutdown) = Telemetry::init(&config).unwrap();
    telemetry.increment(instruments::HTTP_REQUESTS_TOTAL, 1, &[]);

    let started = Instant::now();
    shutdown.shutdown().await;
    assert!(started.elapsed() < SHUTDOWN_TIMEOUT + Duration::from_secs(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_flushes_in_memory_pipeline() {
    let harness = TestTelemetry::start();
    harness.telemetry.increment(instruments::GC_RUNS_TOTAL, 1, &[]);

    let started = Instant::now();
    harness
        .shutdown
        .with_timeout(Duration::from_secs(1))
        .shutdown()
        .await;
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sampler_publishes_gc_deltas() {
    let harness = TestTelemetry::start();
    let registry = Arc::clone(harness.telemetry.registry());
    let reading = |gc_cycles| RuntimeStats {
        alloc_bytes: 100,
        total_alloc_bytes: 1000,
        sys_bytes: 5000,
        tasks: 2,
        cpus: 4,
        gc_cycles,
    };
    let mut sampler = SystemSampler::new(
        registry,
        ScriptedSource {
            readings: vec![reading(0), reading(3), reading(3), reading(5)],
        },
    );

    for _ in 0..4 {
        sampler.sample_once();
    }

    assert_eq!(harness.counter_total(GC_RUNS_TOTAL), 5);
    assert!((harness.gauge_total(instruments::MEMORY_SYS_BYTES) - 5000.0).abs() < 1e-9);
}
