//! Events emitted by the executor and its circuit breakers.

use crate::circuit::CircuitState;
use rxserve_core::Event;
use std::time::Duration;

/// Observable occurrences inside the resilient executor.
#[derive(Debug, Clone)]
pub enum ResilienceEvent {
    /// A retry was scheduled after a transient failure.
    RetryScheduled {
        component: String,
        attempt: u32,
        delay: Duration,
    },
    /// Every permitted attempt failed; the failure is being surfaced.
    AttemptsExhausted { component: String, attempts: u32 },
    /// The circuit breaker changed state.
    CircuitTransition {
        component: String,
        from: CircuitState,
        to: CircuitState,
    },
    /// The breaker fast-failed a call without invoking the operation.
    CallRejected { component: String },
}

impl Event for ResilienceEvent {
    fn kind(&self) -> &'static str {
        match self {
            ResilienceEvent::RetryScheduled { .. } => "retry_scheduled",
            ResilienceEvent::AttemptsExhausted { .. } => "attempts_exhausted",
            ResilienceEvent::CircuitTransition { .. } => "circuit_transition",
            ResilienceEvent::CallRejected { .. } => "call_rejected",
        }
    }

    fn component(&self) -> &str {
        match self {
            ResilienceEvent::RetryScheduled { component, .. }
            | ResilienceEvent::AttemptsExhausted { component, .. }
            | ResilienceEvent::CircuitTransition { component, .. }
            | ResilienceEvent::CallRejected { component } => component,
        }
    }
}
