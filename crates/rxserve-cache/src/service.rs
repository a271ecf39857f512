//! The cache service facade.
//!
//! One interface over four tier shapes (null, local-only, remote-only,
//! hybrid), selected from configuration at construction. All remote
//! traffic goes through the resilient executor under the cache policy,
//! and no cache failure ever propagates to a handler: reads degrade to
//! misses, writes and invalidations log and continue.

use crate::config::CacheConfig;
use crate::events::CacheEvent;
use crate::key::{CacheKey, KeyPattern};
use crate::local::LocalTier;
use crate::lock::{mint_owner, LockToken, WriteLock};
use crate::remote::{RemoteEntry, RemoteStore};
use bytes::Bytes;
use metrics::counter;
use rxserve_core::{FailureKind, FnListener, Listeners};
use rxserve_resilience::{DependencyKind, ResilientExecutor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Per-operation policy governing concurrent readers and writers on a
/// cached key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    /// Readers may see a value up to its TTL stale; writers never lock.
    #[default]
    Eventual,
    /// Writers lock; readers of a locked key bypass the cache.
    Strong,
    /// Writers lock; readers of a locked key wait for the release and
    /// then re-read, falling back to the source if the wait expires.
    Serializable,
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// A cached payload was found.
    Hit(Bytes),
    /// Nothing cached. `version` is the key's stamp at miss time; a
    /// subsequent store is guarded on it so a racing write wins.
    Miss { version: Option<u64> },
    /// The key is write-locked (or the remote read was skipped); read
    /// the authoritative source and do not store the result.
    Bypass,
}

struct RemoteTier {
    store: Arc<dyn RemoteStore>,
    executor: Arc<ResilientExecutor>,
    default_ttl: Option<Duration>,
    lock_timeout: Duration,
    lock_wait_timeout: Duration,
    lock_retry_delay: Duration,
}

impl RemoteTier {
    async fn get(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<RemoteEntry>, FailureKind> {
        let store = Arc::clone(&self.store);
        let key = key.to_string();
        self.executor
            .execute(DependencyKind::Cache, cancel, move || {
                let store = Arc::clone(&store);
                let key = key.clone();
                async move { store.get(&key).await }
            })
            .await
    }

    async fn version(&self, key: &str, cancel: &CancellationToken) -> Result<u64, FailureKind> {
        let store = Arc::clone(&self.store);
        let key = key.to_string();
        self.executor
            .execute(DependencyKind::Cache, cancel, move || {
                let store = Arc::clone(&store);
                let key = key.clone();
                async move { store.version(&key).await }
            })
            .await
    }

    async fn set_if_version(
        &self,
        key: &str,
        payload: Bytes,
        ttl: Option<Duration>,
        expected_version: u64,
        cancel: &CancellationToken,
    ) -> Result<bool, FailureKind> {
        let store = Arc::clone(&self.store);
        let key = key.to_string();
        self.executor
            .execute(DependencyKind::Cache, cancel, move || {
                let store = Arc::clone(&store);
                let key = key.clone();
                let payload = payload.clone();
                async move { store.set_if_version(&key, payload, ttl, expected_version).await }
            })
            .await
    }

    async fn del(&self, key: &str, cancel: &CancellationToken) -> Result<u64, FailureKind> {
        let store = Arc::clone(&self.store);
        let key = key.to_string();
        self.executor
            .execute(DependencyKind::Cache, cancel, move || {
                let store = Arc::clone(&store);
                let key = key.clone();
                async move { store.del(&key).await.map(|()| 1u64) }
            })
            .await
    }

    async fn del_by_prefix(
        &self,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<u64, FailureKind> {
        let store = Arc::clone(&self.store);
        let prefix = prefix.to_string();
        self.executor
            .execute(DependencyKind::Cache, cancel, move || {
                let store = Arc::clone(&store);
                let prefix = prefix.clone();
                async move { store.del_by_prefix(&prefix).await }
            })
            .await
    }

    async fn lock_held(&self, key: &str, cancel: &CancellationToken) -> Result<bool, FailureKind> {
        let store = Arc::clone(&self.store);
        let key = key.to_string();
        self.executor
            .execute(DependencyKind::Cache, cancel, move || {
                let store = Arc::clone(&store);
                let key = key.clone();
                async move { store.lock_held(&key).await }
            })
            .await
    }

    async fn lock_acquire(
        &self,
        key: &str,
        owner: u128,
        cancel: &CancellationToken,
    ) -> Result<bool, FailureKind> {
        let store = Arc::clone(&self.store);
        let key = key.to_string();
        let ttl = self.lock_timeout;
        // Acquisition is not idempotent under retry: a lost success would
        // leave us re-acquiring against our own lock. One attempt only.
        self.executor
            .execute_once(DependencyKind::Cache, cancel, move || {
                let store = Arc::clone(&store);
                let key = key.clone();
                async move { store.lock_acquire(&key, owner, ttl).await }
            })
            .await
    }
}

enum Tier {
    Null,
    LocalOnly { local: LocalTier },
    RemoteOnly { remote: RemoteTier },
    Hybrid { local: LocalTier, remote: RemoteTier },
}

impl Tier {
    fn local(&self) -> Option<&LocalTier> {
        match self {
            Tier::LocalOnly { local } | Tier::Hybrid { local, .. } => Some(local),
            _ => None,
        }
    }

    fn remote(&self) -> Option<&RemoteTier> {
        match self {
            Tier::RemoteOnly { remote } | Tier::Hybrid { remote, .. } => Some(remote),
            _ => None,
        }
    }
}

/// Builder for [`CacheService`].
pub struct CacheServiceBuilder {
    config: CacheConfig,
    store: Option<Arc<dyn RemoteStore>>,
    executor: Option<Arc<ResilientExecutor>>,
    listeners: Listeners<CacheEvent>,
}

impl CacheServiceBuilder {
    fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            store: None,
            executor: None,
            listeners: Listeners::new(),
        }
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Supplies the remote-store adapter. Required when the remote tier
    /// is enabled.
    pub fn store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn executor(mut self, executor: Arc<ResilientExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Register a callback for every cache event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(f));
        self
    }

    /// Builds the service, selecting the tier shape from config.
    ///
    /// # Panics
    ///
    /// Panics when the remote tier is enabled without a store adapter;
    /// that is a wiring error the process must not start with.
    pub fn build(self) -> CacheService {
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(ResilientExecutor::default()));

        let remote = if self.config.remote.enabled {
            let store = self
                .store
                .expect("remote cache enabled but no store adapter supplied");
            Some(RemoteTier {
                store,
                executor,
                default_ttl: self.config.remote.default_ttl(),
                lock_timeout: self.config.remote.lock_timeout(),
                lock_wait_timeout: self.config.remote.lock_wait_timeout(),
                lock_retry_delay: self.config.remote.lock_retry_delay(),
            })
        } else {
            None
        };

        let local = self
            .config
            .local
            .enabled
            .then(|| LocalTier::new(self.config.local.max_items));

        let tier = match (local, remote) {
            (None, None) => Tier::Null,
            (Some(local), None) => Tier::LocalOnly { local },
            (None, Some(remote)) => Tier::RemoteOnly { remote },
            (Some(local), Some(remote)) => Tier::Hybrid { local, remote },
        };

        CacheService {
            tier,
            namespace: self.config.namespace,
            listeners: self.listeners,
        }
    }
}

/// Two-tier cache with per-operation consistency modes.
pub struct CacheService {
    tier: Tier,
    namespace: String,
    listeners: Listeners<CacheEvent>,
}

impl CacheService {
    pub fn builder() -> CacheServiceBuilder {
        CacheServiceBuilder::new()
    }

    /// A service that caches nothing; every lookup misses.
    pub fn null() -> Self {
        Self {
            tier: Tier::Null,
            namespace: String::new(),
            listeners: Listeners::new(),
        }
    }

    pub fn remote_enabled(&self) -> bool {
        self.tier.remote().is_some()
    }

    fn namespaced(&self, key: &str) -> String {
        if self.namespace.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.namespace, key)
        }
    }

    /// Fail-fast startup check: when the remote tier is enabled the
    /// process must not come up until the store answers.
    pub async fn connect(&self) -> Result<(), FailureKind> {
        let Some(remote) = self.tier.remote() else {
            return Ok(());
        };

        let mut delay = Duration::from_millis(200);
        let attempts = 5;
        for attempt in 1..=attempts {
            match remote.store.ping().await {
                Ok(()) => {
                    tracing::info!("remote cache reachable");
                    return Ok(());
                }
                Err(error) if attempt < attempts => {
                    tracing::warn!(%error, attempt, "remote cache not reachable yet; retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(error) => {
                    return Err(FailureKind::PermanentBackend(format!(
                        "remote cache unreachable: {error}"
                    )));
                }
            }
        }
        unreachable!("connect loop returns within the attempt budget")
    }

    /// Liveness of the remote tier for readiness reporting. A service
    /// without a remote tier is trivially ready.
    pub async fn ready(&self) -> bool {
        match self.tier.remote() {
            Some(remote) => remote.store.ping().await.is_ok(),
            None => true,
        }
    }

    /// Looks up a key under a consistency mode.
    ///
    /// `use_local` opts the key into the in-process tier; it is meant
    /// for static reference data only, since the local tier is not
    /// invalidated by writes.
    pub async fn get(
        &self,
        key: &CacheKey,
        mode: Consistency,
        use_local: bool,
        cancel: &CancellationToken,
    ) -> Lookup {
        let full_key = self.namespaced(key.as_str());

        if use_local {
            if let Some(local) = self.tier.local() {
                if let Some(payload) = local.get(&full_key) {
                    counter!("cache_lookups_total", "outcome" => "hit", "tier" => "local")
                        .increment(1);
                    self.listeners.emit(&CacheEvent::Hit {
                        key: key.to_string(),
                        tier: "local",
                    });
                    return Lookup::Hit(payload);
                }
            }
        }

        let Some(remote) = self.tier.remote() else {
            counter!("cache_lookups_total", "outcome" => "miss", "tier" => "none").increment(1);
            self.listeners.emit(&CacheEvent::Miss {
                key: key.to_string(),
            });
            return Lookup::Miss { version: None };
        };

        match mode {
            Consistency::Eventual => {}
            Consistency::Strong => {
                if remote.lock_held(&full_key, cancel).await.unwrap_or(false) {
                    counter!("cache_lookups_total", "outcome" => "bypass", "tier" => "remote")
                        .increment(1);
                    self.listeners.emit(&CacheEvent::ReadBypassed {
                        key: key.to_string(),
                    });
                    return Lookup::Bypass;
                }
            }
            Consistency::Serializable => {
                let started = Instant::now();
                let deadline = started + remote.lock_wait_timeout;
                let mut waited = false;
                while remote.lock_held(&full_key, cancel).await.unwrap_or(false) {
                    waited = true;
                    if Instant::now() >= deadline || cancel.is_cancelled() {
                        counter!("cache_lookups_total", "outcome" => "bypass", "tier" => "remote")
                            .increment(1);
                        self.listeners.emit(&CacheEvent::ReadBypassed {
                            key: key.to_string(),
                        });
                        return Lookup::Bypass;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Lookup::Bypass;
                        }
                        _ = tokio::time::sleep(remote.lock_retry_delay) => {}
                    }
                }
                if waited {
                    self.listeners.emit(&CacheEvent::ReaderWaited {
                        key: key.to_string(),
                        waited: started.elapsed(),
                    });
                }
            }
        }

        match remote.get(&full_key, cancel).await {
            Ok(Some(entry)) => {
                if use_local {
                    if let Some(local) = self.tier.local() {
                        local.insert(full_key, entry.payload.clone(), None);
                    }
                }
                counter!("cache_lookups_total", "outcome" => "hit", "tier" => "remote")
                    .increment(1);
                self.listeners.emit(&CacheEvent::Hit {
                    key: key.to_string(),
                    tier: "remote",
                });
                Lookup::Hit(entry.payload)
            }
            Ok(None) => {
                let version = remote.version(&full_key, cancel).await.ok();
                counter!("cache_lookups_total", "outcome" => "miss", "tier" => "remote")
                    .increment(1);
                self.listeners.emit(&CacheEvent::Miss {
                    key: key.to_string(),
                });
                Lookup::Miss { version }
            }
            Err(error) => {
                tracing::warn!(key = %key, %error, "cache read failed; treating as miss");
                counter!("cache_lookups_total", "outcome" => "miss", "tier" => "degraded")
                    .increment(1);
                Lookup::Miss { version: None }
            }
        }
    }

    /// Stores a handler result. `observed_version` must be the stamp from
    /// the miss that preceded the fill; a concurrent write bumps the key
    /// and the store is skipped. Failures log and degrade.
    pub async fn store(
        &self,
        key: &CacheKey,
        payload: Bytes,
        ttl: Option<Duration>,
        use_local: bool,
        observed_version: Option<u64>,
        cancel: &CancellationToken,
    ) {
        let full_key = self.namespaced(key.as_str());

        if use_local {
            if let Some(local) = self.tier.local() {
                local.insert(full_key.clone(), payload.clone(), ttl);
            }
        }

        let Some(remote) = self.tier.remote() else {
            return;
        };
        let Some(expected_version) = observed_version else {
            // No stamp means the miss itself was degraded; storing now
            // could resurrect data a concurrent write already removed.
            tracing::debug!(key = %key, "no version stamp observed; skipping cache store");
            return;
        };

        let ttl = ttl.or(remote.default_ttl);
        match remote
            .set_if_version(&full_key, payload, ttl, expected_version, cancel)
            .await
        {
            Ok(true) => {
                self.listeners.emit(&CacheEvent::Stored {
                    key: key.to_string(),
                });
            }
            Ok(false) => {
                tracing::debug!(key = %key, "concurrent write detected; skipping cache store");
                self.listeners.emit(&CacheEvent::StoreSkipped {
                    key: key.to_string(),
                });
            }
            Err(error) => {
                tracing::error!(key = %key, %error, "cache store failed; continuing");
            }
        }
    }

    /// Removes every remote entry matched by the patterns. The local
    /// tier holds static reference data and is deliberately untouched.
    pub async fn invalidate(&self, patterns: &[KeyPattern], cancel: &CancellationToken) {
        let Some(remote) = self.tier.remote() else {
            return;
        };

        for pattern in patterns {
            let outcome = match pattern {
                KeyPattern::Exact(key) => remote.del(&self.namespaced(key.as_str()), cancel).await,
                KeyPattern::Prefix(prefix) => {
                    remote.del_by_prefix(&self.namespaced(prefix), cancel).await
                }
            };
            match outcome {
                Ok(removed) => {
                    counter!("cache_invalidations_total").increment(1);
                    self.listeners.emit(&CacheEvent::Invalidated {
                        pattern: pattern.to_string(),
                        removed,
                    });
                }
                Err(error) => {
                    tracing::error!(pattern = %pattern, %error, "cache invalidation failed; continuing");
                }
            }
        }
    }

    /// Acquires write locks on the patterns a command will invalidate.
    ///
    /// `Eventual` writes never lock. A contended lock is waited on up to
    /// the configured wait budget; a lock that still cannot be acquired
    /// is skipped with an error log; the write must reach the
    /// authoritative store regardless.
    pub async fn lock_for_write(
        &self,
        patterns: &[KeyPattern],
        mode: Consistency,
        cancel: &CancellationToken,
    ) -> Option<WriteLock> {
        if mode == Consistency::Eventual || patterns.is_empty() {
            return None;
        }
        let remote = self.tier.remote()?;

        let mut tokens = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let lock_key = self.namespaced(&pattern.lock_key());
            let owner = mint_owner();
            let deadline = Instant::now() + remote.lock_wait_timeout;

            loop {
                match remote.lock_acquire(&lock_key, owner, cancel).await {
                    Ok(true) => {
                        let now = Instant::now();
                        tokens.push(LockToken {
                            key: lock_key.clone(),
                            owner,
                            acquired_at: now,
                            expires_at: now + remote.lock_timeout,
                        });
                        self.listeners.emit(&CacheEvent::LockAcquired {
                            key: lock_key.clone(),
                        });
                        break;
                    }
                    Ok(false) if Instant::now() < deadline && !cancel.is_cancelled() => {
                        tokio::time::sleep(remote.lock_retry_delay).await;
                    }
                    Ok(false) => {
                        tracing::error!(key = %lock_key, "write lock contended past wait budget; proceeding unlocked");
                        self.listeners.emit(&CacheEvent::LockContended {
                            key: lock_key.clone(),
                        });
                        break;
                    }
                    Err(error) => {
                        tracing::error!(key = %lock_key, %error, "write lock acquisition failed; proceeding unlocked");
                        break;
                    }
                }
            }
        }

        if tokens.is_empty() {
            None
        } else {
            Some(WriteLock::new(Arc::clone(&remote.store), tokens))
        }
    }
}
