//! Request validation behavior.
//!
//! Runs before caching so an invalid request never produces a cache
//! write or lock contention.

use crate::descriptor::{Envelope, Operation, Validate};
use futures::future::BoxFuture;
use rxserve_core::FailureKind;
use std::task::{Context, Poll};
use tower::{Layer, Service};

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationLayer;

impl<S> Layer<S> for ValidationLayer {
    type Service = Validation<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Validation { inner }
    }
}

#[derive(Clone)]
pub struct Validation<S> {
    inner: S,
}

impl<S, R> Service<Envelope<R>> for Validation<S>
where
    R: Operation + Validate,
    S: Service<Envelope<R>, Response = R::Output, Error = FailureKind> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = R::Output;
    type Error = FailureKind;
    type Future = BoxFuture<'static, Result<R::Output, FailureKind>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, envelope: Envelope<R>) -> Self::Future {
        let mut inner = self.inner.clone();
        Box::pin(async move {
            if let Err(errors) = envelope.request.validate() {
                tracing::debug!(
                    operation = envelope.request.name(),
                    correlation_id = %envelope.ctx.correlation_id,
                    "request failed validation"
                );
                return Err(FailureKind::Validation(errors));
            }
            inner.call(envelope).await
        })
    }
}
