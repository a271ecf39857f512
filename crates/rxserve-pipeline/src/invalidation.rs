//! Command invalidation behavior.
//!
//! Runs the handler detached from the request's read-path cancellation
//! and invalidates the command's declared keys only after the handler
//! reports success. A handler error or rollback leaves the cache
//! untouched; a client disconnect leaves the mutation (and its
//! invalidation) running to completion.

use crate::descriptor::{Command, Envelope};
use futures::future::BoxFuture;
use rxserve_core::FailureKind;
use rxserve_cache::CacheService;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::task::TaskTracker;
use tower::{Layer, Service};

#[derive(Clone)]
pub struct InvalidationLayer {
    cache: Arc<CacheService>,
    tracker: TaskTracker,
}

impl InvalidationLayer {
    /// `tracker` is the shutdown coordinator's tracker, so a detached
    /// mutation holds the drain open even after its caller disconnected.
    pub fn new(cache: Arc<CacheService>, tracker: TaskTracker) -> Self {
        Self { cache, tracker }
    }
}

impl<S> Layer<S> for InvalidationLayer {
    type Service = Invalidation<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Invalidation {
            inner,
            cache: Arc::clone(&self.cache),
            tracker: self.tracker.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Invalidation<S> {
    inner: S,
    cache: Arc<CacheService>,
    tracker: TaskTracker,
}

impl<S, C> Service<Envelope<C>> for Invalidation<S>
where
    C: Command,
    S: Service<Envelope<C>, Response = C::Output, Error = FailureKind> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = C::Output;
    type Error = FailureKind;
    type Future = BoxFuture<'static, Result<C::Output, FailureKind>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, envelope: Envelope<C>) -> Self::Future {
        let mut inner = self.inner.clone();
        let cache = Arc::clone(&self.cache);
        let tracker = self.tracker.clone();

        Box::pin(async move {
            let patterns = envelope.request.invalidates();
            let mode = envelope.request.mode();
            let operation = envelope.request.name();

            // The handler sees the write-safe handle as its cancellation
            // token: a disconnect no longer reaches it.
            let write_ctx = envelope.ctx.for_write();
            let write_cancel = write_ctx.cancel.clone();
            let write_envelope = Envelope::new(write_ctx, envelope.request);

            let detached = tracker.spawn(async move {
                let lock = cache.lock_for_write(&patterns, mode, &write_cancel).await;

                let outcome = inner.call(write_envelope).await;

                // Invalidation strictly follows a durable commit; any
                // failure path leaves cached values in place.
                if outcome.is_ok() && !patterns.is_empty() {
                    cache.invalidate(&patterns, &write_cancel).await;
                }

                if let Some(lock) = lock {
                    lock.release().await;
                }
                outcome
            });

            match detached.await {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    tracing::error!(operation, %join_error, "command handler task failed");
                    Err(FailureKind::PermanentBackend(format!(
                        "command handler aborted: {join_error}"
                    )))
                }
            }
        })
    }
}
