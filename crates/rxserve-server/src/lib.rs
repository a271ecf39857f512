//! The prescription-order REST service.
//!
//! Wires the runtime core (admission control, request lifecycle, the
//! typed pipeline, the two-tier cache, and the resilient executor)
//! behind an axum HTTP surface:
//!
//! ```text
//! admit? → deadline scope → pipeline(log → validate → cache/invalidate
//!             → handler → executor → store) → envelope / problem-details
//! ```
//!
//! The library exposes the assembly so integration tests can drive the
//! router with injected adapters; `main` adds signal handling and the
//! pressure sampler.

pub mod app;
pub mod config;
pub mod domain;
pub mod handlers;
pub mod middleware;
pub mod ops;
pub mod problem;
pub mod routes;
pub mod state;
pub mod store;

pub use app::{AppBuilder, ServerParts};
pub use config::AppConfig;
pub use state::AppState;
