//! Resilient execution of outbound calls.
//!
//! Every call to an outbound dependency (the authoritative store, the
//! remote cache) goes through [`ResilientExecutor::execute`], which wraps
//! the operation with a per-kind policy:
//!
//! - a per-operation timeout, reported as the `execution-timeout` category;
//! - retries with exponential jittered backoff, only for errors whose
//!   category the [`TransientClassifier`] recognizes;
//! - a circuit breaker that fast-fails once the failure ratio in its
//!   sampling window trips, then admits a single recovery probe.
//!
//! Operations must be idempotent under retry; call sites running
//! non-idempotent work use [`ResilientExecutor::execute_once`].
//!
//! ```
//! use rxserve_resilience::{BackendError, DependencyKind, ResilientExecutor};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let executor = ResilientExecutor::builder().build();
//! let cancel = CancellationToken::new();
//!
//! let value = executor
//!     .execute(DependencyKind::PrimaryStore, &cancel, || async {
//!         Ok::<_, BackendError>(42)
//!     })
//!     .await;
//! # }
//! ```

mod backoff;
mod circuit;
mod classify;
mod config;
mod events;

pub use backoff::ExponentialJitterBackoff;
pub use circuit::{CircuitBreaker, CircuitState};
pub use classify::{BackendError, TransientClassifier};
pub use config::{
    BreakerSettings, DependencyKind, ExecutorPolicy, ResilientExecutorBuilder, RetrySettings,
};
pub use events::ResilienceEvent;

use metrics::counter;
use rxserve_core::FailureKind;
use std::future::Future;
use tokio_util::sync::CancellationToken;

struct KindRuntime {
    policy: ExecutorPolicy,
    breaker: CircuitBreaker,
    backoff: ExponentialJitterBackoff,
}

impl KindRuntime {
    fn new(
        kind: DependencyKind,
        policy: ExecutorPolicy,
        listeners: rxserve_core::Listeners<ResilienceEvent>,
    ) -> Self {
        let breaker = CircuitBreaker::new(kind.as_str(), policy.breaker.clone(), listeners);
        let backoff =
            ExponentialJitterBackoff::new(policy.retry.base_delay).jitter(policy.retry.jitter);
        Self {
            policy,
            breaker,
            backoff,
        }
    }
}

/// Shared wrapper applying retry, breaker, and timeout to outbound calls.
pub struct ResilientExecutor {
    classifier: TransientClassifier,
    listeners: rxserve_core::Listeners<ResilienceEvent>,
    primary_store: KindRuntime,
    cache: KindRuntime,
}

impl ResilientExecutor {
    /// Starts a builder with the per-kind default policies.
    pub fn builder() -> ResilientExecutorBuilder {
        ResilientExecutorBuilder::new()
    }

    pub(crate) fn from_builder(builder: ResilientExecutorBuilder) -> Self {
        Self {
            primary_store: KindRuntime::new(
                DependencyKind::PrimaryStore,
                builder.primary_store,
                builder.listeners.clone(),
            ),
            cache: KindRuntime::new(
                DependencyKind::Cache,
                builder.cache,
                builder.listeners.clone(),
            ),
            classifier: builder.classifier,
            listeners: builder.listeners,
        }
    }

    fn runtime(&self, kind: DependencyKind) -> &KindRuntime {
        match kind {
            DependencyKind::PrimaryStore => &self.primary_store,
            DependencyKind::Cache => &self.cache,
        }
    }

    /// The breaker guarding a dependency kind, for health reporting.
    pub fn breaker(&self, kind: DependencyKind) -> &CircuitBreaker {
        &self.runtime(kind).breaker
    }

    /// Runs `op` under the policy for `kind`, retrying transient
    /// failures. The closure is invoked once per attempt.
    pub async fn execute<T, F, Fut>(
        &self,
        kind: DependencyKind,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, FailureKind>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let max_attempts = self.runtime(kind).policy.retry.max_attempts.max(1);
        self.run(kind, cancel, max_attempts, op).await
    }

    /// Runs `op` exactly once under the timeout and breaker, with no
    /// retries. For non-idempotent work.
    pub async fn execute_once<T, F, Fut>(
        &self,
        kind: DependencyKind,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, FailureKind>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        self.run(kind, cancel, 1, op).await
    }

    async fn run<T, F, Fut>(
        &self,
        kind: DependencyKind,
        cancel: &CancellationToken,
        max_attempts: u32,
        op: F,
    ) -> Result<T, FailureKind>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let runtime = self.runtime(kind);
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(FailureKind::TimeoutExceeded);
            }

            if !runtime.breaker.try_acquire() {
                return Err(FailureKind::Transient(format!(
                    "{} circuit open",
                    kind.as_str()
                )));
            }

            let error = tokio::select! {
                _ = cancel.cancelled() => {
                    runtime.breaker.abandon();
                    return Err(FailureKind::TimeoutExceeded);
                }
                outcome = tokio::time::timeout(runtime.policy.op_timeout, op()) => {
                    match outcome {
                        Ok(Ok(value)) => {
                            runtime.breaker.record_success();
                            counter!(
                                "resilience_calls_total",
                                "dependency" => kind.as_str(),
                                "outcome" => "success"
                            )
                            .increment(1);
                            return Ok(value);
                        }
                        Ok(Err(error)) => error,
                        Err(_elapsed) => BackendError::execution_timeout(format!(
                            "{} operation exceeded {:?}",
                            kind.as_str(),
                            runtime.policy.op_timeout
                        )),
                    }
                }
            };

            runtime.breaker.record_failure();
            counter!(
                "resilience_calls_total",
                "dependency" => kind.as_str(),
                "outcome" => "failure"
            )
            .increment(1);

            attempt += 1;
            let retryable = self.classifier.is_transient(&error);

            if !retryable {
                tracing::debug!(
                    dependency = kind.as_str(),
                    category = %error.category,
                    "error not retryable"
                );
                return Err(self.classifier.classify(&error));
            }

            if attempt >= max_attempts {
                tracing::warn!(
                    dependency = kind.as_str(),
                    attempts = attempt,
                    "retry attempts exhausted"
                );
                self.listeners.emit(&ResilienceEvent::AttemptsExhausted {
                    component: kind.as_str().to_string(),
                    attempts: attempt,
                });
                return Err(self.classifier.classify(&error));
            }

            let delay = runtime.backoff.delay_for(attempt - 1);
            tracing::debug!(
                dependency = kind.as_str(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying after delay"
            );
            self.listeners.emit(&ResilienceEvent::RetryScheduled {
                component: kind.as_str().to_string(),
                attempt,
                delay,
            });

            tokio::select! {
                _ = cancel.cancelled() => return Err(FailureKind::TimeoutExceeded),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl Default for ResilientExecutor {
    fn default() -> Self {
        Self::builder().build()
    }
}
