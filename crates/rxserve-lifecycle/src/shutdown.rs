//! Graceful-shutdown coordination.
//!
//! One coordinator per process. Requests register through
//! [`ShutdownCoordinator::begin_request`] and are tracked until their
//! futures resolve; on shutdown the tracker drains up to the configured
//! deadline, then the force token cancels whatever remains. Write-safe
//! tokens hang off the force token only, so a mutation survives both a
//! client disconnect and the soft half of shutdown.

use rxserve_core::{Identity, RequestContext};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Drain knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ShutdownConfig {
    /// How long in-flight requests may run after the shutdown signal.
    /// Must be less than the orchestrator's grace period.
    pub shutdown_timeout_seconds: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_seconds: 30,
        }
    }
}

impl ShutdownConfig {
    pub fn drain_deadline(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

/// Cancellation handles for one request.
///
/// Dropping the scope cancels the read-path token (a dropped request
/// future means nobody is waiting for the answer), leaving `write_safe`
/// untouched.
#[derive(Debug)]
pub struct RequestScope {
    /// Read-path handle: fires on deadline expiry, scope drop, or forced
    /// shutdown.
    pub cancel: CancellationToken,
    /// Handle for mutations: fires on forced shutdown only.
    pub write_safe: CancellationToken,
}

impl RequestScope {
    /// Builds the pipeline context for this scope.
    pub fn context(&self, correlation_id: impl Into<String>, identity: Option<Identity>) -> RequestContext {
        RequestContext::new(
            correlation_id,
            identity,
            self.cancel.clone(),
            self.write_safe.clone(),
        )
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Outcome of a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every in-flight request finished inside the deadline.
    Clean,
    /// The deadline expired and remaining requests were cancelled.
    Forced,
}

impl DrainOutcome {
    /// Process exit code: 0 on a clean drain, non-zero when work had to
    /// be cut off.
    pub fn exit_code(&self) -> i32 {
        match self {
            DrainOutcome::Clean => 0,
            DrainOutcome::Forced => 1,
        }
    }
}

/// Tracks in-flight work and coordinates the drain sequence.
pub struct ShutdownCoordinator {
    force: CancellationToken,
    tracker: TaskTracker,
    draining: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            force: CancellationToken::new(),
            tracker: TaskTracker::new(),
            draining: AtomicBool::new(false),
        }
    }

    /// Mints the cancellation scope for a new request.
    pub fn begin_request(&self) -> RequestScope {
        RequestScope {
            cancel: self.force.child_token(),
            write_safe: self.force.child_token(),
        }
    }

    /// Tracks a request future so the drain waits for it.
    pub fn track<F>(&self, work: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        self.tracker.track_future(work)
    }

    /// The tracker used for detached mutation tasks, so a command whose
    /// caller disconnected still holds the drain open.
    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    /// Token cancelled when the drain deadline expires.
    pub fn force_token(&self) -> CancellationToken {
        self.force.clone()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Runs the drain: waits up to `deadline` for tracked work, then
    /// cancels the force token and gives cancelled work a short grace to
    /// unwind.
    pub async fn drain(&self, deadline: Duration) -> DrainOutcome {
        self.draining.store(true, Ordering::SeqCst);
        self.tracker.close();
        tracing::info!(
            deadline_secs = deadline.as_secs(),
            in_flight = self.tracker.len(),
            "draining in-flight requests"
        );

        tokio::select! {
            _ = self.tracker.wait() => {
                tracing::info!("drain complete");
                DrainOutcome::Clean
            }
            _ = tokio::time::sleep(deadline) => {
                tracing::warn!(
                    remaining = self.tracker.len(),
                    "drain deadline expired; cancelling remaining requests"
                );
                self.force.cancel();
                // Cooperative code unwinds quickly once the token fires;
                // anything still running after the grace is abandoned.
                let _ = tokio::time::timeout(Duration::from_secs(1), self.tracker.wait()).await;
                DrainOutcome::Forced
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn request_tokens_fire_on_forced_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        let scope = coordinator.begin_request();

        coordinator.force_token().cancel();
        assert!(scope.cancel.is_cancelled());
        assert!(scope.write_safe.is_cancelled());
    }

    #[tokio::test]
    async fn dropping_a_scope_cancels_reads_only() {
        let coordinator = ShutdownCoordinator::new();
        let scope = coordinator.begin_request();
        let cancel = scope.cancel.clone();
        let write_safe = scope.write_safe.clone();

        drop(scope);
        assert!(cancel.is_cancelled());
        assert!(!write_safe.is_cancelled());
    }

    #[tokio::test]
    async fn drain_waits_for_in_flight_work() {
        let coordinator = ShutdownCoordinator::new();

        let work = coordinator.track(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            42
        });
        let handle = tokio::spawn(work);

        let outcome = coordinator.drain(Duration::from_secs(5)).await;
        assert_eq!(outcome, DrainOutcome::Clean);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(handle.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn drain_forces_cancellation_past_the_deadline() {
        let coordinator = ShutdownCoordinator::new();
        let scope = coordinator.begin_request();

        let cancel = scope.cancel.clone();
        let handle = tokio::spawn(coordinator.track(async move {
            // Cooperative worker: runs until cancelled.
            cancel.cancelled().await;
            "cancelled"
        }));

        let started = Instant::now();
        let outcome = coordinator.drain(Duration::from_millis(50)).await;
        assert_eq!(outcome, DrainOutcome::Forced);
        assert_ne!(outcome.exit_code(), 0);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(handle.await.unwrap(), "cancelled");
        drop(scope);
    }

    #[tokio::test]
    async fn detached_tasks_hold_the_drain_open() {
        let coordinator = ShutdownCoordinator::new();
        let tracker = coordinator.tracker();

        tracker.spawn(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        });

        let outcome = coordinator.drain(Duration::from_secs(5)).await;
        assert_eq!(outcome, DrainOutcome::Clean);
    }
}
