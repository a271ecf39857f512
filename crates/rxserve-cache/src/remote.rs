//! Remote (distributed) store port.
//!
//! The cache core defines this interface; adapters implement it over a
//! concrete key/value product. The port assumes one logical instance:
//! a primary with replicas behind a single writer is fine, multi-primary
//! deployments break the lock guarantees and must be refused in wiring.

use async_trait::async_trait;
use bytes::Bytes;
use rxserve_resilience::BackendError;
use std::time::Duration;
use tokio::sync::broadcast;

/// A stored payload with its per-key version stamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub payload: Bytes,
    pub version: u64,
}

/// Distributed key/value store with versioned writes and per-key locks.
///
/// Every mutation (`set`, `del`, `del_by_prefix`) bumps a per-key
/// monotonic version; versions survive deletion, which lets readers
/// detect a write that raced their cache fill and skip the stale store.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Liveness check; used for startup fail-fast and readiness.
    async fn ping(&self) -> Result<(), BackendError>;

    /// Fetches a live entry, if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, BackendError>;

    /// Current version stamp of a key; 0 for keys never written.
    async fn version(&self, key: &str) -> Result<u64, BackendError>;

    /// Stores a payload. `ttl` of `None` means no expiry.
    async fn set(&self, key: &str, payload: Bytes, ttl: Option<Duration>)
        -> Result<(), BackendError>;

    /// Stores a payload only if the key's version still equals
    /// `expected_version`. Returns whether the store happened.
    async fn set_if_version(
        &self,
        key: &str,
        payload: Bytes,
        ttl: Option<Duration>,
        expected_version: u64,
    ) -> Result<bool, BackendError>;

    /// Removes one key.
    async fn del(&self, key: &str) -> Result<(), BackendError>;

    /// Removes every key starting with `prefix`; returns how many.
    async fn del_by_prefix(&self, prefix: &str) -> Result<u64, BackendError>;

    /// Publishes a message on a channel.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BackendError>;

    /// Subscribes to a channel.
    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<Bytes>, BackendError>;

    /// Atomic set-if-absent of a lock with expiry. Returns whether this
    /// owner now holds the lock.
    async fn lock_acquire(
        &self,
        key: &str,
        owner: u128,
        ttl: Duration,
    ) -> Result<bool, BackendError>;

    /// Releases a lock only when `owner` still holds it (compare-and-
    /// delete). Returns whether a release happened; a stale owner is a
    /// no-op.
    async fn lock_release(&self, key: &str, owner: u128) -> Result<bool, BackendError>;

    /// Whether any live lock covers `key`: an exact lock on the key or
    /// a wildcard lock whose prefix contains it.
    async fn lock_held(&self, key: &str) -> Result<bool, BackendError>;
}
