//! Pressure samples and the signal port they are computed from.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// One complete pressure measurement.
///
/// Published atomically by the sampler; readers always see a whole
/// sample, never a torn one.
#[derive(Debug, Clone)]
pub struct PressureSample {
    pub taken_at: Instant,
    /// Heap bytes in use over the configured budget, `0.0..=1.0+`.
    pub heap_load: f64,
    /// Busy workers over maximum workers, `0.0..=1.0`.
    pub threadpool_util: f64,
    /// Work items awaiting a worker.
    pub pending_work_depth: usize,
}

impl PressureSample {
    /// A sample reporting no pressure at all.
    pub fn idle() -> Self {
        Self {
            taken_at: Instant::now(),
            heap_load: 0.0,
            threadpool_util: 0.0,
            pending_work_depth: 0,
        }
    }
}

/// Raw signals the sampler reads each tick.
///
/// Defined here and implemented by outer adapters; tests substitute
/// fixed values.
pub trait PressureSignals: Send + Sync + 'static {
    fn heap_used_bytes(&self) -> u64;
    fn heap_budget_bytes(&self) -> u64;
    fn workers_busy(&self) -> usize;
    fn workers_max(&self) -> usize;
    fn pending_work_depth(&self) -> usize;
}

/// Signal source backed by plain atomics. The default for tests and for
/// deployments that feed measurements from an external agent.
#[derive(Debug, Default)]
pub struct StaticSignals {
    heap_used: AtomicU64,
    heap_budget: AtomicU64,
    workers_busy: AtomicUsize,
    workers_max: AtomicUsize,
    pending: AtomicUsize,
}

impl StaticSignals {
    pub fn new(heap_budget_bytes: u64, workers_max: usize) -> Self {
        let signals = Self::default();
        signals.heap_budget.store(heap_budget_bytes, Ordering::Relaxed);
        signals.workers_max.store(workers_max, Ordering::Relaxed);
        signals
    }

    pub fn set_heap_used(&self, bytes: u64) {
        self.heap_used.store(bytes, Ordering::Relaxed);
    }

    pub fn set_workers_busy(&self, busy: usize) {
        self.workers_busy.store(busy, Ordering::Relaxed);
    }

    pub fn set_pending(&self, depth: usize) {
        self.pending.store(depth, Ordering::Relaxed);
    }
}

impl PressureSignals for StaticSignals {
    fn heap_used_bytes(&self) -> u64 {
        self.heap_used.load(Ordering::Relaxed)
    }

    fn heap_budget_bytes(&self) -> u64 {
        self.heap_budget.load(Ordering::Relaxed)
    }

    fn workers_busy(&self) -> usize {
        self.workers_busy.load(Ordering::Relaxed)
    }

    fn workers_max(&self) -> usize {
        self.workers_max.load(Ordering::Relaxed)
    }

    fn pending_work_depth(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}

/// Signal source reading the process and the tokio runtime.
///
/// Heap usage comes from `/proc/self/statm` resident pages (zero on
/// platforms without procfs, which disables the memory check). Worker
/// business is approximated from alive tasks over worker count; the
/// queue depth is the runtime's injection queue.
pub struct ProcessSignals {
    heap_budget_bytes: u64,
    runtime: tokio::runtime::Handle,
    page_size: u64,
}

impl ProcessSignals {
    /// # Panics
    ///
    /// Panics outside a tokio runtime; construct from `main`.
    pub fn new(heap_budget_bytes: u64) -> Self {
        Self {
            heap_budget_bytes,
            runtime: tokio::runtime::Handle::current(),
            page_size: 4096,
        }
    }
}

impl PressureSignals for ProcessSignals {
    fn heap_used_bytes(&self) -> u64 {
        resident_bytes(self.page_size).unwrap_or(0)
    }

    fn heap_budget_bytes(&self) -> u64 {
        self.heap_budget_bytes
    }

    fn workers_busy(&self) -> usize {
        let metrics = self.runtime.metrics();
        metrics.num_alive_tasks().min(metrics.num_workers())
    }

    fn workers_max(&self) -> usize {
        self.runtime.metrics().num_workers()
    }

    fn pending_work_depth(&self) -> usize {
        self.runtime.metrics().global_queue_depth()
    }
}

#[cfg(target_os = "linux")]
fn resident_bytes(page_size: u64) -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * page_size)
}

#[cfg(not(target_os = "linux"))]
fn resident_bytes(_page_size: u64) -> Option<u64> {
    None
}
