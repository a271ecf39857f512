//! Operation descriptors.
//!
//! Requests describe themselves to the pipeline through these traits:
//! what they are called, whether their result is cacheable, and which
//! keys a mutation invalidates.

use rxserve_cache::{CacheKey, Consistency, KeyPattern};
use rxserve_core::{FieldErrors, RequestContext};
use std::time::Duration;

/// A request the pipeline can execute.
pub trait Operation: Send + 'static {
    /// The handler's success type.
    type Output: Send + 'static;

    /// Stable operation name for logs, metrics, and route timeouts.
    fn name(&self) -> &'static str;
}

/// How a query's result is cached.
#[derive(Debug, Clone)]
pub struct CacheSpec {
    pub key: CacheKey,
    /// Entry TTL; `None` takes the remote tier's default.
    pub ttl: Option<Duration>,
    pub mode: Consistency,
    /// Opt into the in-process tier. Static reference data only; the
    /// local tier is never invalidated by writes.
    pub use_local: bool,
}

impl CacheSpec {
    pub fn new(key: CacheKey) -> Self {
        Self {
            key,
            ttl: None,
            mode: Consistency::Eventual,
            use_local: false,
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn mode(mut self, mode: Consistency) -> Self {
        self.mode = mode;
        self
    }

    pub fn local(mut self) -> Self {
        self.use_local = true;
        self
    }
}

/// A non-mutating request.
pub trait Query: Operation {
    /// `None` disables caching for this query.
    fn cache_spec(&self) -> Option<CacheSpec> {
        None
    }
}

/// A mutating request.
pub trait Command: Operation {
    /// Keys removed from the cache after the handler commits.
    fn invalidates(&self) -> Vec<KeyPattern> {
        Vec::new()
    }

    /// Lock discipline for the invalidated keys.
    fn mode(&self) -> Consistency {
        Consistency::Eventual
    }
}

/// Request self-validation, run before any caching or handler work.
pub trait Validate {
    fn validate(&self) -> Result<(), FieldErrors> {
        Ok(())
    }
}

/// The pipeline currency: a request plus its per-request context.
#[derive(Debug, Clone)]
pub struct Envelope<R> {
    pub ctx: RequestContext,
    pub request: R,
}

impl<R> Envelope<R> {
    pub fn new(ctx: RequestContext, request: R) -> Self {
        Self { ctx, request }
    }
}
