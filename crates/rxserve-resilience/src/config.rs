//! Executor policy configuration.

use crate::classify::TransientClassifier;
use crate::events::ResilienceEvent;
use rxserve_core::{FnListener, Listeners};
use std::time::Duration;

/// Outbound dependency classes with independent policies and breakers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    /// The authoritative data store.
    PrimaryStore,
    /// The distributed cache tier.
    Cache,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::PrimaryStore => "primary-store",
            DependencyKind::Cache => "cache",
        }
    }
}

/// Retry knobs for one dependency kind.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    /// Base delay before the first retry; doubles per attempt.
    pub base_delay: Duration,
    /// Symmetric jitter factor applied to each delay.
    pub jitter: f64,
}

/// Breaker knobs for one dependency kind.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    /// Sliding sample window.
    pub window: Duration,
    /// Completed calls required in the window before evaluation.
    pub minimum_throughput: usize,
    /// Failure ratio at which the circuit opens.
    pub failure_ratio: f64,
    /// Time spent open before a probe is admitted.
    pub open_duration: Duration,
}

/// Full policy for one dependency kind.
#[derive(Debug, Clone)]
pub struct ExecutorPolicy {
    pub retry: RetrySettings,
    pub breaker: BreakerSettings,
    /// Per-operation budget; expiry counts as an `execution-timeout`.
    pub op_timeout: Duration,
}

impl ExecutorPolicy {
    /// Defaults for the authoritative store: 3 attempts from 200 ms,
    /// breaker needing 10 calls, 30 s open, 30 s per-operation budget.
    pub fn primary_store() -> Self {
        Self {
            retry: RetrySettings {
                max_attempts: 3,
                base_delay: Duration::from_millis(200),
                jitter: 0.25,
            },
            breaker: BreakerSettings {
                window: Duration::from_secs(10),
                minimum_throughput: 10,
                failure_ratio: 0.5,
                open_duration: Duration::from_secs(30),
            },
            op_timeout: Duration::from_secs(30),
        }
    }

    /// Defaults for the cache tier: 2 attempts from 100 ms, breaker
    /// needing 20 calls, 15 s open, 5 s per-operation budget.
    pub fn cache() -> Self {
        Self {
            retry: RetrySettings {
                max_attempts: 2,
                base_delay: Duration::from_millis(100),
                jitter: 0.25,
            },
            breaker: BreakerSettings {
                window: Duration::from_secs(10),
                minimum_throughput: 20,
                failure_ratio: 0.5,
                open_duration: Duration::from_secs(15),
            },
            op_timeout: Duration::from_secs(5),
        }
    }
}

/// Builder assembling a [`crate::ResilientExecutor`].
pub struct ResilientExecutorBuilder {
    pub(crate) primary_store: ExecutorPolicy,
    pub(crate) cache: ExecutorPolicy,
    pub(crate) classifier: TransientClassifier,
    pub(crate) listeners: Listeners<ResilienceEvent>,
}

impl ResilientExecutorBuilder {
    pub(crate) fn new() -> Self {
        Self {
            primary_store: ExecutorPolicy::primary_store(),
            cache: ExecutorPolicy::cache(),
            classifier: TransientClassifier::default(),
            listeners: Listeners::new(),
        }
    }

    /// Replaces the primary-store policy.
    pub fn primary_store(mut self, policy: ExecutorPolicy) -> Self {
        self.primary_store = policy;
        self
    }

    /// Replaces the cache policy.
    pub fn cache(mut self, policy: ExecutorPolicy) -> Self {
        self.cache = policy;
        self
    }

    /// Replaces the transient-category table.
    pub fn classifier(mut self, classifier: TransientClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Register a callback for scheduled retries.
    pub fn on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, Duration) + Send + Sync + 'static,
    {
        self.listeners
            .add(FnListener::new(move |event: &ResilienceEvent| {
                if let ResilienceEvent::RetryScheduled { attempt, delay, .. } = event {
                    f(*attempt, *delay);
                }
            }));
        self
    }

    /// Register a callback for breaker state transitions.
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(crate::CircuitState, crate::CircuitState) + Send + Sync + 'static,
    {
        self.listeners
            .add(FnListener::new(move |event: &ResilienceEvent| {
                if let ResilienceEvent::CircuitTransition { from, to, .. } = event {
                    f(*from, *to);
                }
            }));
        self
    }

    /// Register a callback for breaker fast-fails.
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners
            .add(FnListener::new(move |event: &ResilienceEvent| {
                if matches!(event, ResilienceEvent::CallRejected { .. }) {
                    f();
                }
            }));
        self
    }

    pub fn build(self) -> crate::ResilientExecutor {
        crate::ResilientExecutor::from_builder(self)
    }
}
