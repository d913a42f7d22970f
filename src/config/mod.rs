// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::algorithms::AlgorithmKind;
use crate::error::{RateLimiterError, Result};

/// What to do when the storage backend fails during a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Propagate the failure as `BackendUnavailable`
    #[default]
    Closed,
    /// Log the failure and allow the request
    Open,
}

impl FromStr for FailurePolicy {
    type Err = RateLimiterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "closed" | "fail_closed" => Ok(FailurePolicy::Closed),
            "open" | "fail_open" => Ok(FailurePolicy::Open),
            other => Err(RateLimiterError::Configuration(format!(
                "unknown failure policy: {}",
                other
            ))),
        }
    }
}

/// Common configuration for all rate limiters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Key prefix to use for all keys in storage
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Algorithm bound to the engine for its whole lifetime
    #[serde(default)]
    pub algorithm: AlgorithmKind,

    /// Behavior when the backend cannot answer
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_key_prefix() -> String {
    "ratelimit".to_string()
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            algorithm: AlgorithmKind::default(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl RateLimiterConfig {
    /// Builds a configuration from `QUOTA_GUARD_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(algorithm) = std::env::var("QUOTA_GUARD_ALGORITHM") {
            config.algorithm = algorithm.parse()?;
        }
        if let Ok(prefix) = std::env::var("QUOTA_GUARD_KEY_PREFIX") {
            if prefix.is_empty() {
                return Err(RateLimiterError::Configuration(
                    "QUOTA_GUARD_KEY_PREFIX must not be empty".to_string(),
                ));
            }
            config.key_prefix = prefix;
        }
        if let Ok(policy) = std::env::var("QUOTA_GUARD_FAILURE_POLICY") {
            config.failure_policy = policy.parse()?;
        }

        Ok(config)
    }
}

/// Configuration for Redis storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection timeout
    #[serde(default = "default_conn_timeout", with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Upper bound on a single script round trip
    #[serde(default = "default_command_timeout", with = "duration_serde")]
    pub command_timeout: Duration,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_conn_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(1)
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            connection_timeout: default_conn_timeout(),
            command_timeout: default_command_timeout(),
        }
    }
}

/// Configuration for in-memory storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Maximum number of entries to store
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Whether to use a background task for expiration
    #[serde(default = "default_use_background_task")]
    pub use_background_task: bool,

    /// How often to run the background expiration task
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,
}

fn default_max_entries() -> usize {
    100_000
}

fn default_use_background_task() -> bool {
    true
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            use_background_task: default_use_background_task(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
