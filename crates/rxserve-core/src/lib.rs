//! Shared infrastructure for the rxserve runtime core.
//!
//! This crate provides the pieces every other subsystem builds on:
//! - The failure taxonomy ([`FailureKind`]): errors are values at every
//!   internal boundary; only the HTTP adapter knows about status codes.
//! - The per-request context carrier ([`RequestContext`]) with the
//!   read-path and write-safe cancellation handles.
//! - A small event-listener registry used by the subsystem builders for
//!   `on_*` observability hooks.
//! - The [`Clock`] port so time-dependent code can be driven from tests.

pub mod clock;
pub mod context;
pub mod error;
pub mod events;

pub use clock::{system_clock, Clock, SharedClock, SystemClock};
pub use context::{Identity, RequestContext};
pub use error::{FailureKind, FieldErrors};
pub use events::{Event, FnListener, Listener, Listeners};
