//! Instrument registry.
//!
//! Owns every named counter, histogram and gauge for one telemetry
//! instance. A name is bound to exactly one instrument kind; get-or-create
//! runs under the map's per-shard lock so concurrent first use of a name
//! yields a single instrument.
//!
//! Gauges are layered on an up/down counter: the registry remembers the
//! last value written per name and applies only the difference, so the
//! exported sum always equals the most recent `set_gauge` value.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use opentelemetry::metrics::noop::NoopMeterProvider;
use opentelemetry::metrics::{
    Counter, Histogram, Meter, MeterProvider as _, MetricsError, UpDownCounter,
};
use opentelemetry::KeyValue;
use parking_lot::Mutex;

use super::error::TelemetryError;
use super::instruments::{self, InstrumentSpec};

/// The kind an instrument name is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentKind {
    Counter,
    Histogram,
    Gauge,
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Counter => f.write_str("counter"),
            Self::Histogram => f.write_str("histogram"),
            Self::Gauge => f.write_str("gauge"),
        }
    }
}

/// Absolute-value gauge over a delta-accumulating instrument.
pub struct Gauge {
    instrument: UpDownCounter<f64>,
    last: Mutex<f64>,
}

impl Gauge {
    fn new(instrument: UpDownCounter<f64>) -> Self {
        Self {
            instrument,
            last: Mutex::new(0.0),
        }
    }

    /// Set the gauge to `value`.
    ///
    /// The read of the last value, the delta add and the store happen under
    /// one lock, so concurrent writers cannot lose an update.
    pub fn set(&self, value: f64, labels: &[KeyValue]) {
        let mut last = self.last.lock();
        let diff = value - *last;
        self.instrument.add(diff, labels);
        *last = value;
    }

    /// Last value written (0 before the first write).
    pub fn value(&self) -> f64 {
        *self.last.lock()
    }
}

#[derive(Clone)]
enum Instrument {
    Counter(Arc<Counter<u64>>),
    Histogram(Arc<Histogram<f64>>),
    Gauge(Arc<Gauge>),
}

impl Instrument {
    fn kind(&self) -> InstrumentKind {
        match self {
            Self::Counter(_) => InstrumentKind::Counter,
            Self::Histogram(_) => InstrumentKind::Histogram,
            Self::Gauge(_) => InstrumentKind::Gauge,
        }
    }
}

/// Outcome of resolving a name for [`Registry::increment`].
enum DynamicSlot {
    Found(Arc<Counter<u64>>),
    Exhausted,
}

/// Named instrument store shared by the middleware, the sampler and
/// application code.
pub struct Registry {
    meter: Meter,
    enabled: bool,
    instruments: DashMap<String, Instrument>,
    dynamic_limit: usize,
    dynamic_created: AtomicUsize,
    overflow_warned: AtomicBool,
}

impl Registry {
    /// Create a registry recording through `meter`.
    ///
    /// At most `dynamic_limit` counters are created lazily by
    /// [`Registry::increment`]; later unknown names are folded into
    /// `dynamic_counters_overflow_total`.
    pub fn new(meter: Meter, dynamic_limit: usize) -> Self {
        Self {
            meter,
            enabled: true,
            instruments: DashMap::new(),
            dynamic_limit,
            dynamic_created: AtomicUsize::new(0),
            overflow_warned: AtomicBool::new(false),
        }
    }

    /// Create a registry whose recording operations do nothing.
    pub fn noop() -> Self {
        let meter = NoopMeterProvider::new().meter("noop");
        Self {
            enabled: false,
            ..Self::new(meter, 0)
        }
    }

    /// Whether recordings reach a meter pipeline.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Declare the built-in instrument catalog.
    pub fn declare(&self, specs: &[InstrumentSpec]) -> Result<(), TelemetryError> {
        for spec in specs {
            match spec.kind {
                InstrumentKind::Counter => {
                    self.get_or_create_counter(spec.name, spec.description, spec.unit)?;
                }
                InstrumentKind::Histogram => {
                    self.get_or_create_histogram(spec.name, spec.description, spec.unit)?;
                }
                InstrumentKind::Gauge => {
                    self.get_or_create_gauge(spec.name, spec.description, spec.unit)?;
                }
            }
        }
        Ok(())
    }

    pub fn get_or_create_counter(
        &self,
        name: &str,
        description: &str,
        unit: &str,
    ) -> Result<Arc<Counter<u64>>, TelemetryError> {
        self.get_or_create(
            name,
            InstrumentKind::Counter,
            |instrument| match instrument {
                Instrument::Counter(counter) => Some(Arc::clone(counter)),
                _ => None,
            },
            || {
                let counter = self
                    .meter
                    .u64_counter(name.to_string())
                    .with_description(description.to_string())
                    .with_unit(unit.to_string())
                    .try_init()?;
                let counter = Arc::new(counter);
                Ok((Instrument::Counter(Arc::clone(&counter)), counter))
            },
        )
    }

    pub fn get_or_create_histogram(
        &self,
        name: &str,
        description: &str,
        unit: &str,
    ) -> Result<Arc<Histogram<f64>>, TelemetryError> {
        self.get_or_create(
            name,
            InstrumentKind::Histogram,
            |instrument| match instrument {
                Instrument::Histogram(histogram) => Some(Arc::clone(histogram)),
                _ => None,
            },
            || {
                let histogram = self
                    .meter
                    .f64_histogram(name.to_string())
                    .with_description(description.to_string())
                    .with_unit(unit.to_string())
                    .try_init()?;
                let histogram = Arc::new(histogram);
                Ok((Instrument::Histogram(Arc::clone(&histogram)), histogram))
            },
        )
    }

    pub fn get_or_create_gauge(
        &self,
        name: &str,
        description: &str,
        unit: &str,
    ) -> Result<Arc<Gauge>, TelemetryError> {
        self.get_or_create(
            name,
            InstrumentKind::Gauge,
            |instrument| match instrument {
                Instrument::Gauge(gauge) => Some(Arc::clone(gauge)),
                _ => None,
            },
            || {
                let instrument = self
                    .meter
                    .f64_up_down_counter(name.to_string())
                    .with_description(description.to_string())
                    .with_unit(unit.to_string())
                    .try_init()?;
                let gauge = Arc::new(Gauge::new(instrument));
                Ok((Instrument::Gauge(Arc::clone(&gauge)), gauge))
            },
        )
    }

    /// Add `delta` to the counter `name`, creating it on first use.
    ///
    /// Creation failures are logged and the increment is dropped.
    pub fn increment(&self, name: &str, delta: u64, labels: &[KeyValue]) {
        if !self.enabled {
            return;
        }
        if let Some(counter) = self.dynamic_counter(name) {
            counter.add(delta, labels);
        }
    }

    /// Record `value` on a declared histogram. Unknown names are dropped.
    pub fn record_histogram(&self, name: &str, value: f64, labels: &[KeyValue]) {
        if !self.enabled {
            return;
        }
        match self.lookup(name) {
            Some(Instrument::Histogram(histogram)) => histogram.record(value, labels),
            Some(other) => tracing::warn!(
                metric = name,
                kind = %other.kind(),
                "Metric is not a histogram, dropping recording"
            ),
            None => tracing::warn!(metric = name, "Histogram not found, dropping recording"),
        }
    }

    /// Set a declared gauge to the absolute `value`. Unknown names are dropped.
    pub fn set_gauge(&self, name: &str, value: f64, labels: &[KeyValue]) {
        if !self.enabled {
            return;
        }
        match self.lookup(name) {
            Some(Instrument::Gauge(gauge)) => gauge.set(value, labels),
            Some(other) => tracing::warn!(
                metric = name,
                kind = %other.kind(),
                "Metric is not a gauge, dropping value"
            ),
            None => tracing::warn!(metric = name, "Gauge not found, dropping value"),
        }
    }

    /// Last value written to gauge `name`, if it is a declared gauge.
    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        match self.lookup(name) {
            Some(Instrument::Gauge(gauge)) => Some(gauge.value()),
            _ => None,
        }
    }

    /// Kind bound to `name`, if any.
    pub fn kind_of(&self, name: &str) -> Option<InstrumentKind> {
        self.lookup(name).map(|instrument| instrument.kind())
    }

    /// Number of registered instruments.
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    fn lookup(&self, name: &str) -> Option<Instrument> {
        self.instruments.get(name).map(|entry| entry.value().clone())
    }

    /// Resolve a counter for `increment`, creating it lazily within the cap.
    fn dynamic_counter(&self, name: &str) -> Option<Arc<Counter<u64>>> {
        match self.lookup(name) {
            Some(Instrument::Counter(counter)) => return Some(counter),
            Some(other) => {
                tracing::warn!(
                    metric = name,
                    kind = %other.kind(),
                    "Metric is not a counter, dropping increment"
                );
                return None;
            }
            None => {}
        }

        let slot = match self.instruments.entry(name.to_string()) {
            Entry::Occupied(entry) => match entry.get() {
                Instrument::Counter(counter) => DynamicSlot::Found(Arc::clone(counter)),
                other => {
                    tracing::warn!(
                        metric = name,
                        kind = %other.kind(),
                        "Metric is not a counter, dropping increment"
                    );
                    return None;
                }
            },
            // Only the caller holding the vacant entry may take a slot.
            Entry::Vacant(entry) => {
                if self.dynamic_created.fetch_add(1, Ordering::SeqCst) >= self.dynamic_limit {
                    self.dynamic_created.fetch_sub(1, Ordering::SeqCst);
                    DynamicSlot::Exhausted
                } else {
                    match self
                        .meter
                        .u64_counter(name.to_string())
                        .with_description(format!("Dynamic counter for {name}"))
                        .try_init()
                    {
                        Ok(counter) => {
                            let counter = Arc::new(counter);
                            entry.insert(Instrument::Counter(Arc::clone(&counter)));
                            DynamicSlot::Found(counter)
                        }
                        Err(e) => {
                            self.dynamic_created.fetch_sub(1, Ordering::SeqCst);
                            tracing::warn!(metric = name, error = %e, "Failed to create counter");
                            return None;
                        }
                    }
                }
            }
        };

        // The entry lock is released here; the overflow counter may share its shard.
        match slot {
            DynamicSlot::Found(counter) => Some(counter),
            DynamicSlot::Exhausted => {
                if !self.overflow_warned.swap(true, Ordering::SeqCst) {
                    tracing::warn!(
                        metric = name,
                        limit = self.dynamic_limit,
                        overflow = instruments::DYNAMIC_COUNTERS_OVERFLOW_TOTAL,
                        "Dynamic counter limit reached, folding new names into overflow counter"
                    );
                }
                self.overflow_counter()
            }
        }
    }

    fn overflow_counter(&self) -> Option<Arc<Counter<u64>>> {
        self.get_or_create_counter(
            instruments::DYNAMIC_COUNTERS_OVERFLOW_TOTAL,
            "Increments to counters created after the dynamic limit",
            "1",
        )
        .map_err(|e| {
            tracing::warn!(
                metric = instruments::DYNAMIC_COUNTERS_OVERFLOW_TOTAL,
                error = %e,
                "Failed to create counter"
            );
        })
        .ok()
    }

    /// Get-or-create under the entry lock for `name`.
    fn get_or_create<T>(
        &self,
        name: &str,
        kind: InstrumentKind,
        extract: impl Fn(&Instrument) -> Option<T>,
        create: impl FnOnce() -> Result<(Instrument, T), MetricsError>,
    ) -> Result<T, TelemetryError> {
        match self.instruments.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                let existing = entry.get();
                extract(existing).ok_or_else(|| {
                    TelemetryError::InstrumentKindConflict {
                        name: name.to_string(),
                        existing: existing.kind(),
                        requested: kind,
                    }
                })
            }
            Entry::Vacant(entry) => {
                let (instrument, handle) =
                    create().map_err(|source| TelemetryError::Instrument {
                        name: name.to_string(),
                        source,
                    })?;
                entry.insert(instrument);
                Ok(handle)
            }
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("enabled", &self.enabled)
            .field("instruments", &self.instruments.len())
            .field("dynamic_limit", &self.dynamic_limit)
            .field("dynamic_created", &self.dynamic_created.load(Ordering::Relaxed))
            .finish()
    }
}
