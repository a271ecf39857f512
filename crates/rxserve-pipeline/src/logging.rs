//! Outermost behavior: operation logging and timing.

use crate::descriptor::{Envelope, Operation};
use futures::future::BoxFuture;
use metrics::histogram;
use rxserve_core::FailureKind;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};

/// Wraps the rest of the pipeline with per-operation logging. Cache hits
/// show up here as fast successes, which is why logging sits outermost.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingLayer;

impl<S> Layer<S> for LoggingLayer {
    type Service = Logging<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Logging { inner }
    }
}

#[derive(Clone)]
pub struct Logging<S> {
    inner: S,
}

impl<S, R> Service<Envelope<R>> for Logging<S>
where
    R: Operation,
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
            let operation = envelope.request.name();
            let correlation_id = envelope.ctx.correlation_id.clone();
            let started = Instant::now();

            let outcome = inner.call(envelope).await;

            let elapsed = started.elapsed();
            histogram!("pipeline_duration_seconds", "operation" => operation)
                .record(elapsed.as_secs_f64());

            match &outcome {
                Ok(_) => {
                    tracing::info!(
                        operation,
                        %correlation_id,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "operation completed"
                    );
                }
                Err(failure) => {
                    tracing::warn!(
                        operation,
                        %correlation_id,
                        elapsed_ms = elapsed.as_millis() as u64,
                        failure = failure.label(),
                        "operation failed"
                    );
                }
            }
            outcome
        })
    }
}
