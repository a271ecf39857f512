//! Per-request deadlines.

use crate::shutdown::RequestScope;
use metrics::counter;
use rxserve_core::FailureKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// Route timeout knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct TimeoutConfig {
    /// Budget for routes without an override.
    pub default_timeout_seconds: u64,
    /// Per-route overrides, keyed by operation name.
    pub endpoint_timeouts: HashMap<String, u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 60,
            endpoint_timeouts: HashMap::new(),
        }
    }
}

impl TimeoutConfig {
    /// The budget for an operation: its override, or the default.
    pub fn budget_for(&self, operation: &str) -> Duration {
        let seconds = self
            .endpoint_timeouts
            .get(operation)
            .copied()
            .unwrap_or(self.default_timeout_seconds);
        Duration::from_secs(seconds)
    }
}

/// Races `work` against its budget inside a request scope.
///
/// On expiry the scope's read-path token is cancelled so in-flight
/// suspension points unwind cooperatively, and the caller observes
/// `TimeoutExceeded`. The budget covers handler execution and
/// serialization, not response-body transmission.
pub async fn run_with_deadline<T, F>(
    scope: &RequestScope,
    operation: &str,
    budget: Duration,
    work: F,
) -> Result<T, FailureKind>
where
    F: Future<Output = Result<T, FailureKind>>,
{
    tokio::select! {
        outcome = work => outcome,
        _ = tokio::time::sleep(budget) => {
            scope.cancel.cancel();
            counter!("request_timeouts_total", "operation" => operation.to_string())
                .increment(1);
            tracing::warn!(operation, budget_ms = budget.as_millis() as u64, "request exceeded its budget");
            Err(FailureKind::TimeoutExceeded)
        }
        _ = scope.cancel.cancelled() => {
            // The scope was cancelled from outside (forced shutdown or a
            // linked disconnect); surface it the same way.
            Err(FailureKind::TimeoutExceeded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownCoordinator;
    use std::time::Instant;

    #[test]
    fn budget_prefers_the_route_override() {
        let mut config = TimeoutConfig::default();
        config.endpoint_timeouts.insert("orders:create".into(), 120);

        assert_eq!(config.budget_for("orders:create"), Duration::from_secs(120));
        assert_eq!(config.budget_for("orders:list"), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn fast_work_completes_inside_the_budget() {
        let coordinator = ShutdownCoordinator::new();
        let scope = coordinator.begin_request();

        let outcome = run_with_deadline(&scope, "test", Duration::from_secs(1), async {
            Ok::<_, FailureKind>(5)
        })
        .await;
        assert_eq!(outcome.unwrap(), 5);
    }

    #[tokio::test]
    async fn a_handler_that_never_finishes_times_out_within_the_budget() {
        let coordinator = ShutdownCoordinator::new();
        let scope = coordinator.begin_request();

        let started = Instant::now();
        let outcome: Result<(), _> =
            run_with_deadline(&scope, "test", Duration::from_millis(50), async {
                std::future::pending().await
            })
            .await;

        assert_eq!(outcome, Err(FailureKind::TimeoutExceeded));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(500), "timed out late: {elapsed:?}");
        assert!(scope.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn expiry_cancels_the_scope_but_not_the_write_handle() {
        let coordinator = ShutdownCoordinator::new();
        let scope = coordinator.begin_request();

        let _: Result<(), _> =
            run_with_deadline(&scope, "test", Duration::from_millis(20), async {
                std::future::pending().await
            })
            .await;

        assert!(scope.cancel.is_cancelled());
        assert!(!scope.write_safe.is_cancelled());
    }
}
