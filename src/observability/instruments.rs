//! Built-in instrument catalog.
//!
//! Key metrics:
//! - http_requests_total: Counter for handled requests
//! - http_request_duration_seconds: Histogram for request latency
//! - memory_*_bytes, num_goroutines, num_cpu: Gauges fed by the system sampler
//! - gc_runs_total: Counter for completed collection cycles

use super::registry::InstrumentKind;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const MEMORY_ALLOC_BYTES: &str = "memory_alloc_bytes";
pub const MEMORY_TOTAL_ALLOC_BYTES: &str = "memory_total_alloc_bytes";
pub const MEMORY_SYS_BYTES: &str = "memory_sys_bytes";
/// Live tasks on the async runtime. The name is kept for dashboard compatibility.
pub const NUM_GOROUTINES: &str = "num_goroutines";
pub const NUM_CPU: &str = "num_cpu";
pub const GC_RUNS_TOTAL: &str = "gc_runs_total";

/// Receives increments once the lazily created counter cap is exhausted.
pub const DYNAMIC_COUNTERS_OVERFLOW_TOTAL: &str = "dynamic_counters_overflow_total";

/// Declaration of one built-in instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub unit: &'static str,
    pub kind: InstrumentKind,
}

/// Instruments declared at startup. Failing to create any of them is fatal.
pub const BUILTIN: [InstrumentSpec; 8] = [
    InstrumentSpec {
        name: MEMORY_ALLOC_BYTES,
        description: "Current memory allocation in bytes",
        unit: "By",
        kind: InstrumentKind::Gauge,
    },
    InstrumentSpec {
        name: MEMORY_TOTAL_ALLOC_BYTES,
        description: "Total memory allocation in bytes",
        unit: "By",
        kind: InstrumentKind::Gauge,
    },
    InstrumentSpec {
        name: MEMORY_SYS_BYTES,
        description: "System memory obtained in bytes",
        unit: "By",
        kind: InstrumentKind::Gauge,
    },
    InstrumentSpec {
        name: NUM_GOROUTINES,
        description: "Number of live runtime tasks",
        unit: "1",
        kind: InstrumentKind::Gauge,
    },
    InstrumentSpec {
        name: NUM_CPU,
        description: "Number of CPUs",
        unit: "1",
        kind: InstrumentKind::Gauge,
    },
    InstrumentSpec {
        name: GC_RUNS_TOTAL,
        description: "Total number of completed GC cycles",
        unit: "1",
        kind: InstrumentKind::Counter,
    },
    InstrumentSpec {
        name: HTTP_REQUEST_DURATION_SECONDS,
        description: "HTTP request duration in seconds",
        unit: "s",
        kind: InstrumentKind::Histogram,
    },
    InstrumentSpec {
        name: HTTP_REQUESTS_TOTAL,
        description: "Total number of HTTP requests",
        unit: "1",
        kind: InstrumentKind::Counter,
    },
];

/// Metric name for the per-route counter of `method` and `path`.
///
/// Every character of the path outside `[A-Za-z0-9]` becomes `_`.
pub fn route_counter_name(method: &str, path: &str) -> String {
    format!(
        "http_requests_{}_{}",
        method.to_ascii_lowercase(),
        sanitize_path(path)
    )
}

fn sanitize_path(path: &str) -> String {
    path.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
