//! Per-request admit/reject decisions.

use crate::sampler::PressureCell;
use metrics::counter;
use rxserve_core::{Event, FailureKind, FnListener, Listeners};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Threshold knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct AdmissionConfig {
    /// Heap load percentage at or above which requests are rejected.
    pub memory_threshold_percent: f64,
    /// Worker utilisation percentage at or above which requests are
    /// rejected.
    pub thread_pool_threshold_percent: f64,
    /// Pending work depth at or above which requests are rejected.
    pub pending_work_items_threshold: usize,
    /// Sampler period.
    pub check_interval_ms: u64,
    /// `Retry-After` seconds attached to rejections.
    pub retry_after_seconds: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            memory_threshold_percent: 85.0,
            thread_pool_threshold_percent: 90.0,
            pending_work_items_threshold: 100,
            check_interval_ms: 100,
            retry_after_seconds: 10,
        }
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Memory,
    ThreadPool,
    PendingWork,
    ShuttingDown,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::Memory => "memory-pressure",
            RejectReason::ThreadPool => "threadpool-pressure",
            RejectReason::PendingWork => "queue-pressure",
            RejectReason::ShuttingDown => "shutting-down",
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionDecision {
    Admit,
    Reject {
        reason: RejectReason,
        /// Human detail, e.g. `"Memory: 90% >= 85%"`.
        detail: String,
        retry_after: u64,
    },
}

impl AdmissionDecision {
    /// Maps a rejection onto the failure taxonomy; `Admit` maps to none.
    pub fn into_failure(self) -> Option<FailureKind> {
        match self {
            AdmissionDecision::Admit => None,
            AdmissionDecision::Reject {
                reason: RejectReason::ShuttingDown,
                ..
            } => Some(FailureKind::ShuttingDown),
            AdmissionDecision::Reject {
                detail,
                retry_after,
                ..
            } => Some(FailureKind::Rejected {
                reason: detail,
                retry_after,
            }),
        }
    }
}

/// Pressure-state transitions, emitted once per edge.
#[derive(Debug, Clone)]
pub enum AdmissionEvent {
    PressureEntered { detail: String },
    PressureCleared,
}

impl Event for AdmissionEvent {
    fn kind(&self) -> &'static str {
        match self {
            AdmissionEvent::PressureEntered { .. } => "pressure_entered",
            AdmissionEvent::PressureCleared => "pressure_cleared",
        }
    }

    fn component(&self) -> &str {
        "admission"
    }
}

/// Builder for [`AdmissionController`].
pub struct AdmissionControllerBuilder {
    cell: PressureCell,
    config: AdmissionConfig,
    listeners: Listeners<AdmissionEvent>,
}

impl AdmissionControllerBuilder {
    pub fn config(mut self, config: AdmissionConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a callback fired on pressure-state edges with the new
    /// state (`true` = under pressure).
    pub fn on_pressure_change<F>(mut self, f: F) -> Self
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.listeners
            .add(FnListener::new(move |event: &AdmissionEvent| match event {
                AdmissionEvent::PressureEntered { .. } => f(true),
                AdmissionEvent::PressureCleared => f(false),
            }));
        self
    }

    pub fn build(self) -> AdmissionController {
        AdmissionController {
            cell: self.cell,
            config: self.config,
            under_pressure: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            listeners: self.listeners,
        }
    }
}

/// Decides, per request, whether to accept work based on the latest
/// pressure sample. The check is wait-free; staleness is bounded by the
/// sampler period.
pub struct AdmissionController {
    cell: PressureCell,
    config: AdmissionConfig,
    under_pressure: AtomicBool,
    shutting_down: AtomicBool,
    listeners: Listeners<AdmissionEvent>,
}

impl AdmissionController {
    pub fn builder(cell: PressureCell) -> AdmissionControllerBuilder {
        AdmissionControllerBuilder {
            cell,
            config: AdmissionConfig::default(),
            listeners: Listeners::new(),
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Flips the controller into rejecting everything with the
    /// shutting-down code. First step of graceful shutdown.
    pub fn begin_shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::info!("admission controller now rejecting new requests for shutdown");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Checks the latest sample against the thresholds.
    pub fn decide(&self) -> AdmissionDecision {
        if self.shutting_down.load(Ordering::SeqCst) {
            counter!("admission_decisions_total", "outcome" => "shutting_down").increment(1);
            return AdmissionDecision::Reject {
                reason: RejectReason::ShuttingDown,
                detail: "service is draining".to_string(),
                retry_after: self.config.retry_after_seconds,
            };
        }

        let sample = self.cell.latest();
        let violation = self.first_violation(&sample);

        match violation {
            Some((reason, detail)) => {
                if !self.under_pressure.swap(true, Ordering::SeqCst) {
                    tracing::warn!(%detail, "entering pressure state; rejecting new requests");
                    self.listeners.emit(&AdmissionEvent::PressureEntered {
                        detail: detail.clone(),
                    });
                }
                counter!("admission_decisions_total", "outcome" => "rejected").increment(1);
                AdmissionDecision::Reject {
                    reason,
                    detail,
                    retry_after: self.config.retry_after_seconds,
                }
            }
            None => {
                if self.under_pressure.swap(false, Ordering::SeqCst) {
                    tracing::info!("pressure cleared; admitting requests again");
                    self.listeners.emit(&AdmissionEvent::PressureCleared);
                }
                counter!("admission_decisions_total", "outcome" => "admitted").increment(1);
                AdmissionDecision::Admit
            }
        }
    }

    fn first_violation(
        &self,
        sample: &crate::sample::PressureSample,
    ) -> Option<(RejectReason, String)> {
        let heap_pct = sample.heap_load * 100.0;
        if heap_pct >= self.config.memory_threshold_percent {
            return Some((
                RejectReason::Memory,
                format!(
                    "Memory: {:.0}% >= {:.0}%",
                    heap_pct, self.config.memory_threshold_percent
                ),
            ));
        }

        let util_pct = sample.threadpool_util * 100.0;
        if util_pct >= self.config.thread_pool_threshold_percent {
            return Some((
                RejectReason::ThreadPool,
                format!(
                    "ThreadPool: {:.0}% >= {:.0}%",
                    util_pct, self.config.thread_pool_threshold_percent
                ),
            ));
        }

        if sample.pending_work_depth >= self.config.pending_work_items_threshold {
            return Some((
                RejectReason::PendingWork,
                format!(
                    "PendingWork: {} >= {}",
                    sample.pending_work_depth, self.config.pending_work_items_threshold
                ),
            ));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::PressureSample;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Instant;

    fn sample(heap: f64, util: f64, pending: usize) -> PressureSample {
        PressureSample {
            taken_at: Instant::now(),
            heap_load: heap,
            threadpool_util: util,
            pending_work_depth: pending,
        }
    }

    #[test]
    fn idle_samples_admit() {
        let cell = PressureCell::new();
        let controller = AdmissionController::builder(cell).build();
        assert_eq!(controller.decide(), AdmissionDecision::Admit);
    }

    #[test]
    fn memory_pressure_rejects_with_detail() {
        let cell = PressureCell::new();
        cell.publish(sample(0.90, 0.0, 0));
        let controller = AdmissionController::builder(cell).build();

        let decision = controller.decide();
        let AdmissionDecision::Reject {
            reason,
            detail,
            retry_after,
        } = decision
        else {
            panic!("expected rejection");
        };
        assert_eq!(reason, RejectReason::Memory);
        assert_eq!(detail, "Memory: 90% >= 85%");
        assert_eq!(retry_after, 10);
    }

    #[test]
    fn threadpool_and_queue_thresholds_reject() {
        let cell = PressureCell::new();
        let controller = AdmissionController::builder(cell.clone()).build();

        cell.publish(sample(0.0, 0.95, 0));
        assert!(matches!(
            controller.decide(),
            AdmissionDecision::Reject {
                reason: RejectReason::ThreadPool,
                ..
            }
        ));

        cell.publish(sample(0.0, 0.0, 150));
        assert!(matches!(
            controller.decide(),
            AdmissionDecision::Reject {
                reason: RejectReason::PendingWork,
                ..
            }
        ));
    }

    #[test]
    fn thresholds_are_inclusive() {
        let cell = PressureCell::new();
        let controller = AdmissionController::builder(cell.clone()).build();

        cell.publish(sample(0.85, 0.0, 0));
        assert!(matches!(
            controller.decide(),
            AdmissionDecision::Reject { .. }
        ));

        cell.publish(sample(0.8499, 0.0, 0));
        assert_eq!(controller.decide(), AdmissionDecision::Admit);
    }

    #[test]
    fn transitions_fire_once_per_edge() {
        let edges = Arc::new(AtomicUsize::new(0));
        let cell = PressureCell::new();
        let e = Arc::clone(&edges);
        let controller = AdmissionController::builder(cell.clone())
            .on_pressure_change(move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        cell.publish(sample(0.95, 0.0, 0));
        controller.decide();
        controller.decide();
        controller.decide();
        assert_eq!(edges.load(Ordering::SeqCst), 1);

        cell.publish(sample(0.10, 0.0, 0));
        controller.decide();
        controller.decide();
        assert_eq!(edges.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn shutdown_rejects_everything() {
        let cell = PressureCell::new();
        let controller = AdmissionController::builder(cell).build();
        controller.begin_shutdown();

        let decision = controller.decide();
        assert!(matches!(
            decision,
            AdmissionDecision::Reject {
                reason: RejectReason::ShuttingDown,
                ..
            }
        ));
        assert_eq!(
            decision.into_failure(),
            Some(FailureKind::ShuttingDown)
        );
    }

    #[test]
    fn rejections_map_onto_the_failure_taxonomy() {
        let cell = PressureCell::new();
        cell.publish(sample(0.90, 0.0, 0));
        let controller = AdmissionController::builder(cell).build();

        match controller.decide().into_failure() {
            Some(FailureKind::Rejected {
                reason,
                retry_after,
            }) => {
                assert!(reason.contains("Memory: 90% >= 85%"));
                assert_eq!(retry_after, 10);
            }
            other => panic!("unexpected mapping: {other:?}"),
        }
        assert_eq!(AdmissionDecision::Admit.into_failure(), None);
    }
}
