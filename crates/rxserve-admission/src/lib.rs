//! Adaptive admission control.
//!
//! A background [`Sampler`] measures heap load, worker-pool utilisation,
//! and pending work depth every `CheckIntervalMs`, publishing the result
//! through a lock-free [`PressureCell`]. The [`AdmissionController`]
//! compares the latest sample against configured thresholds per request
//! and rejects with a `Retry-After` hint when any signal is over budget.
//!
//! Static concurrency caps cannot adapt to container memory limits;
//! sampling live signals is cheap, wait-free on the request path, and at
//! most one sampler period stale.

mod controller;
mod sample;
mod sampler;

pub use controller::{
    AdmissionConfig, AdmissionController, AdmissionControllerBuilder, AdmissionDecision,
    AdmissionEvent, RejectReason,
};
pub use sample::{PressureSample, PressureSignals, ProcessSignals, StaticSignals};
pub use sampler::{PressureCell, Sampler};
