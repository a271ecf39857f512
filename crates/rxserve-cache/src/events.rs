//! Events emitted by the cache service.

use rxserve_core::Event;
use std::time::Duration;

/// Observable occurrences inside the cache service.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// A lookup was answered from a tier.
    Hit { key: String, tier: &'static str },
    /// A lookup found nothing cached.
    Miss { key: String },
    /// A reader skipped the cache because the key was write-locked.
    ReadBypassed { key: String },
    /// A serializable reader waited for a lock before re-reading.
    ReaderWaited { key: String, waited: Duration },
    /// A handler result was cached.
    Stored { key: String },
    /// A store was skipped because a concurrent write bumped the key.
    StoreSkipped { key: String },
    /// Keys matching a pattern were invalidated.
    Invalidated { pattern: String, removed: u64 },
    /// A write lock was acquired.
    LockAcquired { key: String },
    /// A write lock could not be acquired before the wait budget ran out.
    LockContended { key: String },
}

impl Event for CacheEvent {
    fn kind(&self) -> &'static str {
        match self {
            CacheEvent::Hit { .. } => "hit",
            CacheEvent::Miss { .. } => "miss",
            CacheEvent::ReadBypassed { .. } => "read_bypassed",
            CacheEvent::ReaderWaited { .. } => "reader_waited",
            CacheEvent::Stored { .. } => "stored",
            CacheEvent::StoreSkipped { .. } => "store_skipped",
            CacheEvent::Invalidated { .. } => "invalidated",
            CacheEvent::LockAcquired { .. } => "lock_acquired",
            CacheEvent::LockContended { .. } => "lock_contended",
        }
    }

    fn component(&self) -> &str {
        "cache"
    }
}
