// src/test_utils.rs

use super::algorithms::AlgorithmKind;
use super::clock::{Clock, ManualClock};
use super::config::{InMemoryConfig, RateLimiterConfig, RedisConfig};
use super::error::{Result, StorageError};
use super::limiter::RateLimiter;
use super::storage::{MemoryStorage, RedisStorage, StorageBackend, Transition};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fixed start instant for deterministic tests: 2024-01-01T00:00:00Z
pub const T0: i64 = 1_704_067_200_000;

/// Storage whose every operation fails as if Redis were unreachable
#[derive(Debug, Clone, Default)]
pub struct FailingStorage {
    pub calls: Arc<AtomicUsize>,
}

impl FailingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn fail<T>(&self) -> Result<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::RedisConnection("connection refused".to_string()).into())
    }
}

#[async_trait]
impl StorageBackend for FailingStorage {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn load<S>(&self, _key: &str) -> Result<Option<S>>
    where
        S: DeserializeOwned + Send + 'static,
    {
        self.fail()
    }

    async fn atomic_update<T>(&self, _key: &str, _ttl: Duration, _transition: &T) -> Result<T::Outcome>
    where
        T: Transition + 'static,
    {
        self.fail()
    }

    async fn health_check(&self) -> Result<()> {
        self.fail()
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Memory storage without the background sweeper, on the given clock
pub fn create_test_memory(clock: &ManualClock) -> MemoryStorage {
    let config = InMemoryConfig {
        max_entries: 1000,
        use_background_task: false,
        cleanup_interval: Duration::from_secs(1),
    };
    MemoryStorage::with_clock(config, Arc::new(clock.clone()))
}

/// In-memory limiter for `kind` whose time is driven by the returned clock
pub async fn create_test_rate_limiter(kind: AlgorithmKind) -> (RateLimiter, ManualClock) {
    let clock = ManualClock::new(T0);
    let limiter = RateLimiter::builder()
        .config(RateLimiterConfig {
            algorithm: kind,
            ..RateLimiterConfig::default()
        })
        .memory_config(InMemoryConfig {
            use_background_task: false,
            ..InMemoryConfig::default()
        })
        .clock(Arc::new(clock.clone()) as Arc<dyn Clock>)
        .build()
        .await
        .expect("in-memory limiter always builds");
    (limiter, clock)
}

pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

/// Connects to the test Redis, or `None` so the caller can skip
pub async fn try_redis() -> Option<RedisStorage> {
    let config = RedisConfig {
        url: redis_url(),
        connection_timeout: Duration::from_millis(500),
        command_timeout: Duration::from_millis(500),
    };
    let storage = RedisStorage::new(config).await.ok()?;
    storage.ping().await.ok()?;
    Some(storage)
}

/// Unique key prefix so parallel test runs against one Redis never collide
pub fn unique_prefix(test: &str) -> String {
    format!("quota_guard_test:{}:{}", test, uuid::Uuid::new_v4())
}
