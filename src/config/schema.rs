//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the session layer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the session layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SessionConfig {
    /// Backend location and transport timeouts.
    pub backend: BackendConfig,

    /// Credential refresh policy.
    pub refresh: RefreshPolicy,

    /// Derived user state cache.
    pub cache: CacheConfig,

    /// Request coalescing.
    pub dedup: DedupConfig,

    /// Transport retry configuration.
    pub retries: RetryConfig,

    /// Durable store location.
    pub storage: StorageConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the API (e.g., "http://localhost:8080").
    pub base_url: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Honour HTTP(S)_PROXY environment variables.
    pub use_system_proxy: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_secs: 10,
            use_system_proxy: true,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Attempt cap and cooldown for credential refresh.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RefreshPolicy {
    /// Consecutive failed refreshes before the coordinator gives up.
    pub max_attempts: u32,

    /// Minimum spacing between a failed refresh and the next attempt.
    pub cooldown_ms: u64,

    /// How long new callers are rejected once the cap is reached.
    pub exhausted_lockout_ms: u64,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            cooldown_ms: 5_000,
            exhausted_lockout_ms: 300_000,
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Time-to-live of a cached entity in seconds.
    pub ttl_secs: u64,

    /// Background heal attempts before healing pauses.
    pub heal_max_attempts: u32,

    /// Minimum spacing between a failed heal and the next.
    pub heal_cooldown_ms: u64,

    /// Pause after `heal_max_attempts` consecutive failures.
    pub heal_lockout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 15 * 60,
            heal_max_attempts: 3,
            heal_cooldown_ms: 5_000,
            heal_lockout_ms: 60_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// The heal gate expressed in the same shape as the refresh policy.
    pub fn heal_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            max_attempts: self.heal_max_attempts,
            cooldown_ms: self.heal_cooldown_ms,
            exhausted_lockout_ms: self.heal_lockout_ms,
        }
    }
}

/// Request coalescing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DedupConfig {
    /// How long a settled call keeps answering identical requests.
    pub grace_ms: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { grace_ms: 1_000 }
    }
}

/// Retry configuration for idempotent requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Base delay for exponential backoff.
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff delay.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 2,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

/// Durable store configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file backing the store. In-memory when absent.
    pub path: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
