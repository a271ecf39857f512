//! Two-tier cache with selectable consistency modes.
//!
//! The cache has an in-process tier (bounded LRU for static reference
//! data) and a distributed tier behind the [`RemoteStore`] port. Every
//! cached operation picks one of three consistency modes:
//!
//! - **Eventual**: readers take whatever is cached; staleness is
//!   bounded by TTL.
//! - **Strong**: writers hold a per-key lock; readers of a locked key
//!   bypass the cache and hit the authoritative source.
//! - **Serializable**: like Strong, but readers wait for the lock to
//!   clear and then re-read the (now fresh) cache, falling back to the
//!   source when the wait budget expires.
//!
//! Cache failures are never fatal: reads degrade to misses, writes and
//! invalidations log and continue. Startup is the one exception; an
//! enabled remote tier that cannot be reached refuses to come up
//! ([`CacheService::connect`]).

mod config;
mod events;
mod key;
mod local;
mod lock;
mod memory;
mod remote;
mod service;

pub use config::{CacheConfig, LocalCacheConfig, RemoteCacheConfig};
pub use events::CacheEvent;
pub use key::{CacheKey, KeyError, KeyPattern};
pub use local::LocalTier;
pub use lock::{LockToken, WriteLock};
pub use memory::InMemoryRemote;
pub use remote::{RemoteEntry, RemoteStore};
pub use service::{CacheService, CacheServiceBuilder, Consistency, Lookup};

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn hybrid_service(store: Arc<InMemoryRemote>) -> CacheService {
        CacheService::builder()
            .config(CacheConfig::default())
            .store(store)
            .build()
    }

    fn key(raw: &str) -> CacheKey {
        CacheKey::new(raw).unwrap()
    }

    #[tokio::test]
    async fn miss_then_store_then_hit() {
        let store = Arc::new(InMemoryRemote::new());
        let cache = hybrid_service(Arc::clone(&store));
        let cancel = CancellationToken::new();
        let k = key("orders:one:42");

        let lookup = cache.get(&k, Consistency::Eventual, false, &cancel).await;
        let Lookup::Miss { version } = lookup else {
            panic!("expected a miss, got {lookup:?}");
        };

        cache
            .store(&k, Bytes::from_static(b"{}"), None, false, version, &cancel)
            .await;

        assert_eq!(
            cache.get(&k, Consistency::Eventual, false, &cancel).await,
            Lookup::Hit(Bytes::from_static(b"{}"))
        );
    }

    #[tokio::test]
    async fn store_is_skipped_when_a_write_raced_the_fill() {
        let store = Arc::new(InMemoryRemote::new());
        let cache = hybrid_service(Arc::clone(&store));
        let cancel = CancellationToken::new();
        let k = key("orders:all");

        let Lookup::Miss { version } = cache.get(&k, Consistency::Eventual, false, &cancel).await
        else {
            panic!("expected a miss");
        };

        // A write lands between the miss and the fill.
        store
            .set("rxserve:orders:all", Bytes::from_static(b"fresh"), None)
            .await
            .unwrap();

        cache
            .store(&k, Bytes::from_static(b"stale"), None, false, version, &cancel)
            .await;

        assert_eq!(
            cache.get(&k, Consistency::Eventual, false, &cancel).await,
            Lookup::Hit(Bytes::from_static(b"fresh"))
        );
    }

    #[tokio::test]
    async fn strong_readers_bypass_a_locked_key() {
        let store = Arc::new(InMemoryRemote::new());
        let cache = hybrid_service(Arc::clone(&store));
        let cancel = CancellationToken::new();
        let k = key("patient:P1");

        store
            .set("rxserve:patient:P1", Bytes::from_static(b"cached"), None)
            .await
            .unwrap();

        let lock = cache
            .lock_for_write(
                &[KeyPattern::parse("patient:P1").unwrap()],
                Consistency::Strong,
                &cancel,
            )
            .await
            .expect("lock should be acquired");

        assert_eq!(
            cache.get(&k, Consistency::Strong, false, &cancel).await,
            Lookup::Bypass
        );

        lock.release().await;
        assert_eq!(
            cache.get(&k, Consistency::Strong, false, &cancel).await,
            Lookup::Hit(Bytes::from_static(b"cached"))
        );
    }

    #[tokio::test]
    async fn serializable_readers_wait_for_the_release() {
        let store = Arc::new(InMemoryRemote::new());
        let cache = Arc::new(hybrid_service(Arc::clone(&store)));
        let cancel = CancellationToken::new();
        let k = key("patient:P1");

        let lock = cache
            .lock_for_write(
                &[KeyPattern::parse("patient:P1").unwrap()],
                Consistency::Serializable,
                &cancel,
            )
            .await
            .expect("lock should be acquired");

        // Writer commits the new value and releases shortly after the
        // reader starts waiting.
        let writer_store = Arc::clone(&store);
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            writer_store
                .set("rxserve:patient:P1", Bytes::from_static(b"post-write"), None)
                .await
                .unwrap();
            lock.release().await;
        });

        let started = std::time::Instant::now();
        let lookup = cache.get(&k, Consistency::Serializable, false, &cancel).await;
        writer.await.unwrap();

        assert_eq!(lookup, Lookup::Hit(Bytes::from_static(b"post-write")));
        assert!(started.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn serializable_wait_expiry_falls_through() {
        let store = Arc::new(InMemoryRemote::new());
        let mut config = CacheConfig::default();
        config.remote.lock_wait_timeout_ms = 80;
        config.remote.lock_retry_delay_ms = 10;
        let cache = CacheService::builder()
            .config(config)
            .store(Arc::clone(&store) as Arc<dyn RemoteStore>)
            .build();
        let cancel = CancellationToken::new();
        let k = key("patient:P1");

        let _lock = cache
            .lock_for_write(
                &[KeyPattern::parse("patient:P1").unwrap()],
                Consistency::Serializable,
                &cancel,
            )
            .await
            .expect("lock should be acquired");

        assert_eq!(
            cache.get(&k, Consistency::Serializable, false, &cancel).await,
            Lookup::Bypass
        );
    }

    #[tokio::test]
    async fn invalidation_expands_wildcards_and_spares_the_local_tier() {
        let store = Arc::new(InMemoryRemote::new());
        let cache = hybrid_service(Arc::clone(&store));
        let cancel = CancellationToken::new();

        // A locally cached static entry and two remote list pages.
        let static_key = key("reference:dose-units");
        let Lookup::Miss { version } = cache
            .get(&static_key, Consistency::Eventual, true, &cancel)
            .await
        else {
            panic!("expected a miss");
        };
        cache
            .store(
                &static_key,
                Bytes::from_static(b"[\"mg\"]"),
                None,
                true,
                version,
                &cancel,
            )
            .await;
        store
            .set("rxserve:orders:paged:0:10", Bytes::from_static(b"p0"), None)
            .await
            .unwrap();
        store
            .set("rxserve:orders:paged:10:10", Bytes::from_static(b"p1"), None)
            .await
            .unwrap();

        cache
            .invalidate(
                &[
                    KeyPattern::parse("orders:paged:*").unwrap(),
                    KeyPattern::parse("reference:dose-units").unwrap(),
                ],
                &cancel,
            )
            .await;

        assert!(store.get("rxserve:orders:paged:0:10").await.unwrap().is_none());
        assert!(store.get("rxserve:orders:paged:10:10").await.unwrap().is_none());
        // The remote copy of the static entry is gone, but the local
        // tier still answers: it holds static data by contract.
        assert_eq!(
            cache
                .get(&static_key, Consistency::Eventual, true, &cancel)
                .await,
            Lookup::Hit(Bytes::from_static(b"[\"mg\"]"))
        );
    }

    #[tokio::test]
    async fn remote_failures_degrade_to_misses() {
        let store = Arc::new(InMemoryRemote::new());
        let cache = hybrid_service(Arc::clone(&store));
        let cancel = CancellationToken::new();
        let k = key("orders:all");

        store
            .set("rxserve:orders:all", Bytes::from_static(b"[]"), None)
            .await
            .unwrap();
        store.set_failing(true);

        assert_eq!(
            cache.get(&k, Consistency::Eventual, false, &cancel).await,
            Lookup::Miss { version: None }
        );

        // Stores and invalidations must not error either.
        cache
            .store(&k, Bytes::from_static(b"x"), None, false, Some(0), &cancel)
            .await;
        cache
            .invalidate(&[KeyPattern::parse("orders:*").unwrap()], &cancel)
            .await;
    }

    #[tokio::test]
    async fn eventual_writes_take_no_locks() {
        let store = Arc::new(InMemoryRemote::new());
        let cache = hybrid_service(Arc::clone(&store));
        let cancel = CancellationToken::new();

        let lock = cache
            .lock_for_write(
                &[KeyPattern::parse("orders:all").unwrap()],
                Consistency::Eventual,
                &cancel,
            )
            .await;
        assert!(lock.is_none());
        assert!(!store.lock_held("rxserve:orders:all").await.unwrap());
    }

    #[tokio::test]
    async fn connect_fails_fast_when_the_remote_is_down() {
        let store = Arc::new(InMemoryRemote::new());
        store.set_failing(true);
        let cache = hybrid_service(Arc::clone(&store));

        let started = std::time::Instant::now();
        let outcome = cache.connect().await;
        assert!(outcome.is_err());
        // Bounded retries: well under the sum of unbounded backoff.
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn disabled_tiers_always_miss() {
        let cache = CacheService::builder()
            .config(CacheConfig::disabled())
            .build();
        let cancel = CancellationToken::new();

        assert_eq!(
            cache
                .get(&key("anything"), Consistency::Eventual, true, &cancel)
                .await,
            Lookup::Miss { version: None }
        );
        assert!(cache.connect().await.is_ok());
    }
}
