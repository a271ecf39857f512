//! Service configuration.
//!
//! One serde-deserializable document aggregating every knob the runtime
//! core consumes, each section carrying its production defaults. How the
//! document reaches the process (file, env, flags) is the deployment's
//! business; the binary accepts an optional JSON override.

use rxserve_admission::AdmissionConfig;
use rxserve_cache::CacheConfig;
use rxserve_lifecycle::{ShutdownConfig, TimeoutConfig};
use rxserve_paging::PagingConfig;
use rxserve_resilience::{BreakerSettings, ExecutorPolicy, RetrySettings};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry/breaker/timeout knobs for one dependency kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct PolicyConfig {
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub circuit_minimum_throughput: usize,
    pub circuit_open_seconds: u64,
    pub timeout_seconds: u64,
}

impl PolicyConfig {
    fn to_policy(&self) -> ExecutorPolicy {
        ExecutorPolicy {
            retry: RetrySettings {
                max_attempts: self.retry_max_attempts,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
                jitter: 0.25,
            },
            breaker: BreakerSettings {
                window: Duration::from_secs(10),
                minimum_throughput: self.circuit_minimum_throughput,
                failure_ratio: 0.5,
                open_duration: Duration::from_secs(self.circuit_open_seconds),
            },
            op_timeout: Duration::from_secs(self.timeout_seconds),
        }
    }

    fn primary_store_defaults() -> Self {
        Self {
            retry_max_attempts: 3,
            retry_base_delay_ms: 200,
            circuit_minimum_throughput: 10,
            circuit_open_seconds: 30,
            timeout_seconds: 30,
        }
    }

    fn cache_defaults() -> Self {
        Self {
            retry_max_attempts: 2,
            retry_base_delay_ms: 100,
            circuit_minimum_throughput: 20,
            circuit_open_seconds: 15,
            timeout_seconds: 5,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::primary_store_defaults()
    }
}

/// Per-kind executor policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ResilienceConfig {
    pub primary_store: PolicyConfig,
    pub cache: PolicyConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            primary_store: PolicyConfig::primary_store_defaults(),
            cache: PolicyConfig::cache_defaults(),
        }
    }
}

impl ResilienceConfig {
    pub fn primary_store_policy(&self) -> ExecutorPolicy {
        self.primary_store.to_policy()
    }

    pub fn cache_policy(&self) -> ExecutorPolicy {
        self.cache.to_policy()
    }
}

/// The full service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct AppConfig {
    pub listen: ListenConfig,
    pub pagination: PagingConfig,
    pub cache: CacheConfig,
    pub rate_limiting: AdmissionConfig,
    pub request_timeout: TimeoutConfig,
    pub graceful_shutdown: ShutdownConfig,
    pub resilience: ResilienceConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ListenConfig {
    pub address: String,
    /// Heap budget the admission sampler divides usage by, in megabytes.
    pub heap_budget_mb: u64,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
            heap_budget_mb: 512,
        }
    }
}

/// API-key collaborator configuration. An empty key set disables the
/// check (development mode); any configured key enables it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct AuthConfig {
    pub api_keys: Vec<String>,
}

impl AppConfig {
    /// Parses a JSON override document over the defaults.
    pub fn from_json(document: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(document)
    }
}
