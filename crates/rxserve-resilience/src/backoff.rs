//! Retry delay computation.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with symmetric jitter.
///
/// The delay for attempt `n` (0-indexed) is `base * multiplier^n`,
/// randomized within `±jitter` of the computed value so coordinated
/// retries from many requests do not land on the backend in lockstep.
#[derive(Debug, Clone)]
pub struct ExponentialJitterBackoff {
    base: Duration,
    multiplier: f64,
    jitter: f64,
    max: Option<Duration>,
}

impl ExponentialJitterBackoff {
    /// Backoff starting at `base` with the default 2.0 multiplier and
    /// ±25% jitter.
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            multiplier: 2.0,
            jitter: 0.25,
            max: None,
        }
    }

    /// Overrides the growth multiplier.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Overrides the jitter factor, clamped to `[0, 1]`.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Caps the computed delay.
    pub fn max(mut self, max: Duration) -> Self {
        self.max = Some(max);
        self
    }

    /// Delay before retry `attempt` (0-indexed: the first retry is 0).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base.mul_f64(self.multiplier.powi(attempt as i32));
        let scaled = match self.max {
            Some(max) => scaled.min(max),
            None => scaled,
        };

        if self.jitter == 0.0 {
            return scaled;
        }

        let spread = scaled.as_secs_f64() * self.jitter;
        let low = (scaled.as_secs_f64() - spread).max(0.0);
        let high = scaled.as_secs_f64() + spread;
        Duration::from_secs_f64(rand::rng().random_range(low..=high))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_without_jitter() {
        let backoff = ExponentialJitterBackoff::new(Duration::from_millis(100)).jitter(0.0);
        assert_eq!(backoff.delay_for(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn jitter_stays_within_the_configured_band() {
        let backoff = ExponentialJitterBackoff::new(Duration::from_millis(200)).jitter(0.25);
        for _ in 0..100 {
            let delay = backoff.delay_for(0);
            assert!(delay >= Duration::from_millis(150), "delay {delay:?} below band");
            assert!(delay <= Duration::from_millis(250), "delay {delay:?} above band");
        }
    }

    #[test]
    fn max_caps_the_pre_jitter_delay() {
        let backoff = ExponentialJitterBackoff::new(Duration::from_millis(100))
            .jitter(0.0)
            .max(Duration::from_millis(250));
        assert_eq!(backoff.delay_for(5), Duration::from_millis(250));
    }
}
