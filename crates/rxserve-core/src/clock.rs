//! Clock port.
//!
//! Lock expiry and pressure sampling read time through this seam so tests
//! can substitute a controllable source.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync + 'static {
    /// Monotonic instant for durations and expirations.
    fn now(&self) -> Instant;
    /// Wall-clock time for timestamps that leave the process.
    fn system_now(&self) -> SystemTime;
}

/// The process clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Shared handle to a clock implementation.
pub type SharedClock = Arc<dyn Clock>;

/// The default shared clock.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
