//! Circuit breaker state machine.
//!
//! Failures are tracked in a sliding time window. The circuit opens when
//! the window holds at least the minimum throughput and the failure ratio
//! crosses the threshold; after the open duration a single probe is
//! admitted, and its outcome decides between closing and re-opening.

use crate::config::BreakerSettings;
use crate::events::ResilienceEvent;
use metrics::counter;
use rxserve_core::Listeners;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Breaker state, readable lock-free through [`CircuitBreaker::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Calls flow through.
    Closed = 0,
    /// Calls fast-fail without touching the backend.
    Open = 1,
    /// One probe call is allowed to test recovery.
    HalfOpen = 2,
}

impl CircuitState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct CallRecord {
    at: Instant,
    failed: bool,
}

struct Circuit {
    state: CircuitState,
    last_transition: Instant,
    records: VecDeque<CallRecord>,
    probe_in_flight: bool,
}

/// Per-dependency breaker shared by all requests.
///
/// State transitions serialize through an internal mutex; readers observe
/// the current state through an atomic so the hot path never blocks.
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<Circuit>,
    published: AtomicU8,
    listeners: Listeners<ResilienceEvent>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        settings: BreakerSettings,
        listeners: Listeners<ResilienceEvent>,
    ) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(Circuit {
                state: CircuitState::Closed,
                last_transition: Instant::now(),
                records: VecDeque::new(),
                probe_in_flight: false,
            }),
            published: AtomicU8::new(CircuitState::Closed as u8),
            listeners,
        }
    }

    /// Current state without taking the lock.
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.published.load(Ordering::Acquire))
    }

    /// Asks whether a call may proceed. A `true` answer must be paired
    /// with exactly one of [`record_success`](Self::record_success),
    /// [`record_failure`](Self::record_failure), or
    /// [`abandon`](Self::abandon).
    pub fn try_acquire(&self) -> bool {
        let mut circuit = self.inner.lock().expect("circuit lock poisoned");
        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if circuit.last_transition.elapsed() >= self.settings.open_duration {
                    self.transition(&mut circuit, CircuitState::HalfOpen);
                    circuit.probe_in_flight = true;
                    true
                } else {
                    self.reject();
                    false
                }
            }
            CircuitState::HalfOpen => {
                if circuit.probe_in_flight {
                    self.reject();
                    false
                } else {
                    circuit.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Records a completed, successful call.
    pub fn record_success(&self) {
        let mut circuit = self.inner.lock().expect("circuit lock poisoned");
        circuit.probe_in_flight = false;
        match circuit.state {
            CircuitState::HalfOpen => self.transition(&mut circuit, CircuitState::Closed),
            _ => {
                circuit.records.push_back(CallRecord {
                    at: Instant::now(),
                    failed: false,
                });
                self.evaluate(&mut circuit);
            }
        }
    }

    /// Records a completed, failed call.
    pub fn record_failure(&self) {
        let mut circuit = self.inner.lock().expect("circuit lock poisoned");
        circuit.probe_in_flight = false;
        match circuit.state {
            CircuitState::HalfOpen => self.transition(&mut circuit, CircuitState::Open),
            _ => {
                circuit.records.push_back(CallRecord {
                    at: Instant::now(),
                    failed: true,
                });
                self.evaluate(&mut circuit);
            }
        }
    }

    /// Releases an acquired slot without recording an outcome. Used when
    /// a call is cancelled before the backend answered, so client
    /// disconnects neither trip nor heal the breaker.
    pub fn abandon(&self) {
        let mut circuit = self.inner.lock().expect("circuit lock poisoned");
        circuit.probe_in_flight = false;
    }

    fn reject(&self) {
        counter!("resilience_calls_rejected_total", "dependency" => self.name.clone())
            .increment(1);
        self.listeners.emit(&ResilienceEvent::CallRejected {
            component: self.name.clone(),
        });
    }

    fn evaluate(&self, circuit: &mut Circuit) {
        let cutoff = Instant::now() - self.settings.window;
        while circuit
            .records
            .front()
            .is_some_and(|record| record.at < cutoff)
        {
            circuit.records.pop_front();
        }

        let total = circuit.records.len();
        if total < self.settings.minimum_throughput {
            return;
        }

        let failures = circuit.records.iter().filter(|r| r.failed).count();
        if failures as f64 / total as f64 >= self.settings.failure_ratio {
            self.transition(circuit, CircuitState::Open);
        }
    }

    fn transition(&self, circuit: &mut Circuit, to: CircuitState) {
        if circuit.state == to {
            return;
        }
        let from = circuit.state;
        circuit.state = to;
        circuit.last_transition = Instant::now();
        circuit.records.clear();
        circuit.probe_in_flight = false;
        self.published.store(to as u8, Ordering::Release);

        // Opening is the only transition worth an operator page.
        if to == CircuitState::Open {
            tracing::error!(
                dependency = %self.name,
                from = from.as_str(),
                to = to.as_str(),
                "circuit opened"
            );
        } else {
            tracing::info!(
                dependency = %self.name,
                from = from.as_str(),
                to = to.as_str(),
                "circuit transition"
            );
        }

        counter!(
            "resilience_circuit_transitions_total",
            "dependency" => self.name.clone(),
            "to" => to.as_str()
        )
        .increment(1);

        self.listeners.emit(&ResilienceEvent::CircuitTransition {
            component: self.name.clone(),
            from,
            to,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings(minimum: usize, open_for: Duration) -> BreakerSettings {
        BreakerSettings {
            window: Duration::from_secs(10),
            minimum_throughput: minimum,
            failure_ratio: 0.5,
            open_duration: open_for,
        }
    }

    fn breaker(minimum: usize, open_for: Duration) -> CircuitBreaker {
        CircuitBreaker::new("test", settings(minimum, open_for), Listeners::new())
    }

    #[test]
    fn stays_closed_below_minimum_throughput() {
        let breaker = breaker(10, Duration::from_secs(30));
        for _ in 0..9 {
            assert!(breaker.try_acquire());
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_at_minimum_throughput_and_ratio() {
        let breaker = breaker(10, Duration::from_secs(30));
        for _ in 0..10 {
            assert!(breaker.try_acquire());
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn mixed_outcomes_respect_the_ratio() {
        let breaker = breaker(10, Duration::from_secs(30));
        for i in 0..10 {
            assert!(breaker.try_acquire());
            if i % 2 == 0 {
                breaker.record_failure();
            } else {
                breaker.record_success();
            }
        }
        // 5 failures over 10 calls meets the 0.5 ratio.
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn half_open_admits_exactly_one_probe() {
        let breaker = breaker(2, Duration::from_millis(20));
        for _ in 0..2 {
            assert!(breaker.try_acquire());
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.try_acquire(), "second probe must be rejected");

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn failed_probe_reopens() {
        let breaker = breaker(2, Duration::from_millis(20));
        for _ in 0..2 {
            assert!(breaker.try_acquire());
            breaker.record_failure();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(breaker.try_acquire());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn abandoned_probe_frees_the_slot() {
        let breaker = breaker(2, Duration::from_millis(20));
        for _ in 0..2 {
            assert!(breaker.try_acquire());
            breaker.record_failure();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(breaker.try_acquire());
        breaker.abandon();
        // The slot is free again and the state is unchanged.
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire());
    }
}
