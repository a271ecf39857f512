//! Request lifecycle: deadlines, cancellation, and graceful shutdown.
//!
//! Each admitted request gets a [`RequestScope`] from the process-wide
//! [`ShutdownCoordinator`]: a read-path cancellation token (linked to the
//! route deadline, the client connection, and forced shutdown) and a
//! write-safe token (linked to forced shutdown only). Handlers observe
//! cancellation cooperatively at every suspension point; mutation
//! handlers run under the write-safe token so a disconnect mid-write
//! cannot orphan partial state.
//!
//! Shutdown runs in order: admission flips to rejecting, tracked
//! requests drain up to `ShutdownTimeoutSeconds`, the force token
//! cancels whatever remains, and the process exits 0 only on a clean
//! drain.

mod shutdown;
mod timeout;

pub use shutdown::{DrainOutcome, RequestScope, ShutdownConfig, ShutdownCoordinator};
pub use timeout::{run_with_deadline, TimeoutConfig};
