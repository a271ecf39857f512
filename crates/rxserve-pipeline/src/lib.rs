//! The typed request pipeline.
//!
//! Every business operation runs through an ordered chain of behaviors
//! wrapping a terminal handler, assembled once at startup:
//!
//! ```text
//! logging → validation → caching/invalidation → handler
//! ```
//!
//! Behaviors are tower layers over [`Envelope<R>`]; requests describe
//! themselves through the [`Query`] / [`Command`] / [`Validate`] traits.
//! Validation precedes caching so invalid requests never cause cache
//! writes or lock contention; logging wraps everything so cache hits are
//! observable as fast successes.
//!
//! Queries consult the cache and store their result on a miss (guarded
//! against concurrent writes). Commands run detached under the write-
//! safe cancellation handle and invalidate their declared keys only
//! after the handler succeeds.

mod caching;
mod descriptor;
mod invalidation;
mod logging;
mod validation;

pub use caching::{QueryCache, QueryCacheLayer};
pub use descriptor::{CacheSpec, Command, Envelope, Operation, Query, Validate};
pub use invalidation::{Invalidation, InvalidationLayer};
pub use logging::{Logging, LoggingLayer};
pub use validation::{Validation as ValidationService, ValidationLayer};

use rxserve_cache::CacheService;
use rxserve_core::{FailureKind, RequestContext};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tower::util::BoxCloneSyncService;
use tower::{Service, ServiceBuilder};

/// A fully assembled pipeline for one operation type.
pub type BoxPipeline<R, T> = BoxCloneSyncService<Envelope<R>, T, FailureKind>;

/// Adapts an async closure into a terminal handler service.
pub fn handler_fn<R, T, F, Fut>(
    f: F,
) -> impl Service<Envelope<R>, Response = T, Error = FailureKind, Future = Fut> + Clone + Send + 'static
where
    R: Send + 'static,
    T: Send + 'static,
    F: Fn(RequestContext, R) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<T, FailureKind>> + Send + 'static,
{
    tower::service_fn(move |envelope: Envelope<R>| f(envelope.ctx, envelope.request))
}

/// Assembles the query pipeline: logging → validation → caching →
/// handler.
pub fn query_pipeline<Q, S>(cache: Arc<CacheService>, handler: S) -> BoxPipeline<Q, Q::Output>
where
    Q: Query + Validate,
    Q::Output: Serialize + DeserializeOwned,
    S: Service<Envelope<Q>, Response = Q::Output, Error = FailureKind> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    let service = ServiceBuilder::new()
        .layer(LoggingLayer)
        .layer(ValidationLayer)
        .layer(QueryCacheLayer::new(cache))
        .service(handler);
    BoxCloneSyncService::new(service)
}

/// Assembles the command pipeline: logging → validation → invalidation →
/// handler.
pub fn command_pipeline<C, S>(
    cache: Arc<CacheService>,
    tracker: TaskTracker,
    handler: S,
) -> BoxPipeline<C, C::Output>
where
    C: Command + Validate,
    S: Service<Envelope<C>, Response = C::Output, Error = FailureKind> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    let service = ServiceBuilder::new()
        .layer(LoggingLayer)
        .layer(ValidationLayer)
        .layer(InvalidationLayer::new(cache, tracker))
        .service(handler);
    BoxCloneSyncService::new(service)
}
