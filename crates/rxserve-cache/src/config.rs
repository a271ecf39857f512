//! Cache configuration sections.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Local (in-process) tier knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct LocalCacheConfig {
    pub enabled: bool,
    /// LRU bound.
    pub max_items: usize,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_items: 1024,
        }
    }
}

/// Remote (distributed) tier knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct RemoteCacheConfig {
    pub enabled: bool,
    /// Default entry TTL; 0 means entries never expire.
    pub ttl_seconds: u64,
    /// Expiry stamped on acquired write locks. Must exceed the slowest
    /// handler with margin; expiry is the crash-recovery path.
    pub lock_timeout_seconds: u64,
    /// How long serializable readers and contending writers wait on a
    /// held lock.
    pub lock_wait_timeout_ms: u64,
    /// Poll interval while waiting on a held lock.
    pub lock_retry_delay_ms: u64,
}

impl Default for RemoteCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 300,
            lock_timeout_seconds: 30,
            lock_wait_timeout_ms: 500,
            lock_retry_delay_ms: 50,
        }
    }
}

impl RemoteCacheConfig {
    pub fn default_ttl(&self) -> Option<Duration> {
        (self.ttl_seconds > 0).then(|| Duration::from_secs(self.ttl_seconds))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_seconds)
    }

    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }

    pub fn lock_retry_delay(&self) -> Duration {
        Duration::from_millis(self.lock_retry_delay_ms)
    }
}

/// Full cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct CacheConfig {
    /// Deployment namespace prefixed onto every key and lock.
    pub namespace: String,
    pub local: LocalCacheConfig,
    pub remote: RemoteCacheConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "rxserve".to_string(),
            local: LocalCacheConfig::default(),
            remote: RemoteCacheConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Config with both tiers disabled; lookups always miss.
    pub fn disabled() -> Self {
        Self {
            namespace: String::new(),
            local: LocalCacheConfig {
                enabled: false,
                ..LocalCacheConfig::default()
            },
            remote: RemoteCacheConfig {
                enabled: false,
                ..RemoteCacheConfig::default()
            },
        }
    }
}
