//! Query caching behavior.

use crate::descriptor::{Envelope, Query};
use bytes::Bytes;
use futures::future::BoxFuture;
use rxserve_core::FailureKind;
use rxserve_cache::{CacheService, Lookup};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Consults the cache before the handler and stores the handler's result
/// on a miss. Lookup honors the query's consistency mode; the store is
/// guarded on the version observed at miss time so a write that raced
/// the fill wins.
#[derive(Clone)]
pub struct QueryCacheLayer {
    cache: Arc<CacheService>,
}

impl QueryCacheLayer {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self { cache }
    }
}

impl<S> Layer<S> for QueryCacheLayer {
    type Service = QueryCache<S>;

    fn layer(&self, inner: S) -> Self::Service {
        QueryCache {
            inner,
            cache: Arc::clone(&self.cache),
        }
    }
}

#[derive(Clone)]
pub struct QueryCache<S> {
    inner: S,
    cache: Arc<CacheService>,
}

impl<S, Q> Service<Envelope<Q>> for QueryCache<S>
where
    Q: Query,
    Q::Output: Serialize + DeserializeOwned,
    S: Service<Envelope<Q>, Response = Q::Output, Error = FailureKind> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Q::Output;
    type Error = FailureKind;
    type Future = BoxFuture<'static, Result<Q::Output, FailureKind>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, envelope: Envelope<Q>) -> Self::Future {
        let mut inner = self.inner.clone();
        let cache = Arc::clone(&self.cache);

        Box::pin(async move {
            let Some(spec) = envelope.request.cache_spec() else {
                return inner.call(envelope).await;
            };

            let cancel = envelope.ctx.cancel.clone();
            let lookup = cache
                .get(&spec.key, spec.mode, spec.use_local, &cancel)
                .await;

            let observed_version = match lookup {
                Lookup::Hit(payload) => match serde_json::from_slice(&payload) {
                    Ok(value) => return Ok(value),
                    Err(error) => {
                        // A corrupt entry must not take the request down;
                        // refill from the handler and skip the store.
                        tracing::warn!(
                            key = %spec.key,
                            %error,
                            "cached payload failed to deserialize; treating as miss"
                        );
                        None
                    }
                },
                Lookup::Miss { version } => version,
                Lookup::Bypass => None,
            };

            let value = inner.call(envelope).await?;

            if observed_version.is_some() {
                match serde_json::to_vec(&value) {
                    Ok(payload) => {
                        cache
                            .store(
                                &spec.key,
                                Bytes::from(payload),
                                spec.ttl,
                                spec.use_local,
                                observed_version,
                                &cancel,
                            )
                            .await;
                    }
                    Err(error) => {
                        tracing::error!(key = %spec.key, %error, "failed to serialize result for caching");
                    }
                }
            }

            Ok(value)
        })
    }
}
