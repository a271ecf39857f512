//! Background pressure sampler.

use crate::sample::{PressureSample, PressureSignals};
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lock-free cell holding the most recent complete sample.
///
/// One writer (the sampler task), any number of readers. Readers pay an
/// atomic pointer load; they never block and never see a torn sample.
#[derive(Clone)]
pub struct PressureCell {
    inner: Arc<ArcSwap<PressureSample>>,
}

impl PressureCell {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(PressureSample::idle())),
        }
    }

    /// The most recent published sample.
    pub fn latest(&self) -> Arc<PressureSample> {
        self.inner.load_full()
    }

    /// Publishes a complete sample. Tests use this to inject pressure.
    pub fn publish(&self, sample: PressureSample) {
        self.inner.store(Arc::new(sample));
    }
}

impl Default for PressureCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodically computes a [`PressureSample`] from the signal port and
/// publishes it to a [`PressureCell`].
pub struct Sampler {
    signals: Arc<dyn PressureSignals>,
    cell: PressureCell,
    interval: Duration,
}

impl Sampler {
    pub fn new(signals: Arc<dyn PressureSignals>, cell: PressureCell, interval: Duration) -> Self {
        Self {
            signals,
            cell,
            interval,
        }
    }

    /// Takes one sample and publishes it.
    pub fn sample_once(&self) {
        let heap_budget = self.signals.heap_budget_bytes();
        let heap_load = if heap_budget == 0 {
            0.0
        } else {
            self.signals.heap_used_bytes() as f64 / heap_budget as f64
        };

        let workers_max = self.signals.workers_max();
        let threadpool_util = if workers_max == 0 {
            0.0
        } else {
            self.signals.workers_busy() as f64 / workers_max as f64
        };

        let sample = PressureSample {
            taken_at: Instant::now(),
            heap_load,
            threadpool_util,
            pending_work_depth: self.signals.pending_work_depth(),
        };

        metrics::gauge!("admission_heap_load").set(sample.heap_load);
        metrics::gauge!("admission_threadpool_util").set(sample.threadpool_util);
        metrics::gauge!("admission_pending_work_depth").set(sample.pending_work_depth as f64);

        self.cell.publish(sample);
    }

    /// Runs the sampling loop until the shutdown token fires.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("pressure sampler stopping");
                        break;
                    }
                    _ = ticker.tick() => self.sample_once(),
                }
            }
        })
    }
}
