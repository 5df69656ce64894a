//! Background sampler for process runtime health.
//!
//! Every [`SAMPLE_INTERVAL`] the sampler reads a [`RuntimeStats`] snapshot
//! from its [`StatsSource`] and publishes it through the registry: five
//! gauges via `set_gauge` and the collection-cycle delta via `increment`.
//!
//! The loop owns its interval timer and exits on the first poll after its
//! cancellation token fires, so teardown never waits longer than one tick.

use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::alloc;
use super::instruments::{
    GC_RUNS_TOTAL, MEMORY_ALLOC_BYTES, MEMORY_SYS_BYTES, MEMORY_TOTAL_ALLOC_BYTES, NUM_CPU,
    NUM_GOROUTINES,
};
use super::registry::Registry;

/// Time between two samples.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

/// One reading of the process runtime counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Heap bytes currently allocated.
    pub alloc_bytes: u64,
    /// Heap bytes allocated since start.
    pub total_alloc_bytes: u64,
    /// Memory the process holds from the OS (resident set).
    pub sys_bytes: u64,
    /// Live tasks on the async runtime.
    pub tasks: u64,
    /// Logical CPUs available.
    pub cpus: u64,
    /// Cumulative collection cycles completed.
    pub gc_cycles: u64,
}

/// Where the sampler reads its numbers from.
pub trait StatsSource: Send + 'static {
    fn sample(&mut self) -> RuntimeStats;
}

/// Stats for the current process.
///
/// Heap numbers come from [`alloc::CountingAllocator`], resident memory from
/// `sysinfo`, the task count from the tokio runtime the source was created
/// on. Rust has no garbage collector, so `gc_cycles` is always zero.
pub struct ProcessStats {
    system: System,
    pid: Result<Pid, &'static str>,
    pid_reported: bool,
    runtime: Option<tokio::runtime::Handle>,
}

impl ProcessStats {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid(),
            pid_reported: false,
            runtime: tokio::runtime::Handle::try_current().ok(),
        }
    }

    fn resident_bytes(&mut self) -> u64 {
        let pid = match self.pid {
            Ok(pid) => pid,
            Err(e) => {
                // Reported from the sampler task, once logging is up.
                if !self.pid_reported {
                    self.pid_reported = true;
                    tracing::warn!(
                        error = e,
                        "Cannot resolve current pid, memory_sys_bytes will read 0"
                    );
                }
                return 0;
            }
        };
        if !self.system.refresh_process(pid) {
            return 0;
        }
        self.system.process(pid).map_or(0, |process| process.memory())
    }
}

impl Default for ProcessStats {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSource for ProcessStats {
    fn sample(&mut self) -> RuntimeStats {
        let heap = alloc::heap_usage();
        RuntimeStats {
            alloc_bytes: heap.allocated,
            total_alloc_bytes: heap.total_allocated,
            sys_bytes: self.resident_bytes(),
            tasks: self
                .runtime
                .as_ref()
                .map_or(0, |handle| handle.metrics().num_alive_tasks() as u64),
            cpus: num_cpus::get() as u64,
            gc_cycles: 0,
        }
    }
}

/// Sampler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    Sampling,
    Stopped,
}

/// Periodically publishes [`RuntimeStats`] into a [`Registry`].
pub struct SystemSampler<S> {
    registry: Arc<Registry>,
    source: S,
    interval: Duration,
    last_gc_cycles: u64,
    state: watch::Sender<SamplerState>,
}

impl<S: StatsSource> SystemSampler<S> {
    pub fn new(registry: Arc<Registry>, source: S) -> Self {
        let (state, _) = watch::channel(SamplerState::Idle);
        Self {
            registry,
            source,
            interval: SAMPLE_INTERVAL,
            last_gc_cycles: 0,
            state,
        }
    }

    /// Override the sampling interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Take one sample and publish it.
    pub fn sample_once(&mut self) {
        self.state.send_replace(SamplerState::Sampling);

        let stats = self.source.sample();
        self.registry
            .set_gauge(MEMORY_ALLOC_BYTES, stats.alloc_bytes as f64, &[]);
        self.registry
            .set_gauge(MEMORY_TOTAL_ALLOC_BYTES, stats.total_alloc_bytes as f64, &[]);
        self.registry
            .set_gauge(MEMORY_SYS_BYTES, stats.sys_bytes as f64, &[]);
        self.registry.set_gauge(NUM_GOROUTINES, stats.tasks as f64, &[]);
        self.registry.set_gauge(NUM_CPU, stats.cpus as f64, &[]);

        let completed = stats.gc_cycles.saturating_sub(self.last_gc_cycles);
        if completed > 0 {
            self.registry.increment(GC_RUNS_TOTAL, completed, &[]);
            self.last_gc_cycles = stats.gc_cycles;
        }

        self.state.send_replace(SamplerState::Idle);
    }

    /// Run the sampler on the current tokio runtime until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> SamplerHandle {
        let state = self.state.subscribe();
        let token = cancel.clone();
        let join = tokio::spawn(self.run(token));
        SamplerHandle {
            cancel,
            join,
            state,
        }
    }

    async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(interval_secs = self.interval.as_secs(), "System sampler started");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => self.sample_once(),
            }
        }

        self.state.send_replace(SamplerState::Stopped);
        tracing::debug!("System sampler stopped");
    }
}

/// Handle to a running sampler.
#[derive(Debug)]
pub struct SamplerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
    state: watch::Receiver<SamplerState>,
}

impl SamplerHandle {
    pub fn state(&self) -> SamplerState {
        *self.state.borrow()
    }

    /// Cancel the sampler and wait for its task to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "System sampler task failed");
        }
    }
}
