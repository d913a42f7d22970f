// src/limiter.rs

//! Facade that owns the backend and the engine.
//!
//! There is no global instance: the application builds one `RateLimiter` in
//! its composition root and hands out `Arc` clones to whoever needs it.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use tracing::info;

use crate::algorithms::{AlgorithmKind, RateLimitResult};
use crate::clock::{Clock, SystemClock};
use crate::config::{InMemoryConfig, RateLimiterConfig, RedisConfig};
use crate::engine::Engine;
use crate::error::{RateLimiterError, Result};
use crate::storage::redis::sanitize_url;
use crate::storage::{Backend, MemoryStorage, RedisStorage, StorageBackend};

/// URL schemes the Redis backend accepts
const REDIS_SCHEMES: [&str; 4] = ["redis", "rediss", "redis+unix", "unix"];

/// Rate limiter bound to one algorithm and one backend
#[derive(Debug)]
pub struct RateLimiter {
    engine: Engine,
    backend: Backend,
}

impl RateLimiter {
    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::default()
    }

    /// In-process limiter with default settings
    pub fn in_memory(algorithm: AlgorithmKind) -> Self {
        let config = RateLimiterConfig {
            algorithm,
            ..RateLimiterConfig::default()
        };
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let backend = Backend::Memory(MemoryStorage::with_clock(
            InMemoryConfig::default(),
            Arc::clone(&clock),
        ));
        Self::assemble(backend, &config, clock)
    }

    fn assemble(backend: Backend, config: &RateLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        let engine = Engine::new(backend.clone(), config, clock);
        info!(
            algorithm = %engine.algorithm(),
            backend = backend.name(),
            "Rate limiter ready"
        );
        Self { engine, backend }
    }

    /// Decides whether one more event for `key` fits in `limit` per `window`
    pub async fn execute(&self, key: &str, limit: u64, window: Duration) -> Result<RateLimitResult> {
        self.engine.execute(key, limit, window).await
    }

    pub fn algorithm(&self) -> AlgorithmKind {
        self.engine.algorithm()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn health_check(&self) -> Result<()> {
        self.backend.health_check().await
    }

    /// Stops background work and releases the backend
    pub async fn shutdown(self) -> Result<()> {
        info!(backend = self.backend.name(), "Shutting down rate limiter");
        self.backend.shutdown().await
    }
}

/// Collects construction parameters; `build` validates all of them before any
/// backend state is created.
#[derive(Default)]
pub struct RateLimiterBuilder {
    algorithm: Option<String>,
    config: RateLimiterConfig,
    memory_config: InMemoryConfig,
    redis_config: RedisConfig,
    clock: Option<Arc<dyn Clock>>,
    redis_connection: Option<ConnectionManager>,
    redis_client: Option<redis::Client>,
    redis_url: Option<String>,
}

impl RateLimiterBuilder {
    /// Algorithm by name; overrides `config.algorithm`
    pub fn algorithm(mut self, name: impl Into<String>) -> Self {
        self.algorithm = Some(name.into());
        self
    }

    pub fn config(mut self, config: RateLimiterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn memory_config(mut self, config: InMemoryConfig) -> Self {
        self.memory_config = config;
        self
    }

    /// Timeouts for the Redis backend; its `url` is only used by `redis_url`
    pub fn redis_config(mut self, config: RedisConfig) -> Self {
        self.redis_config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use an already-connected Redis client
    pub fn redis_connection(mut self, connection: ConnectionManager) -> Self {
        self.redis_connection = Some(connection);
        self
    }

    /// Use a Redis client handle to open a managed connection
    pub fn redis_client(mut self, client: redis::Client) -> Self {
        self.redis_client = Some(client);
        self
    }

    /// Connect to Redis by URL
    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    pub async fn build(self) -> Result<RateLimiter> {
        let mut config = self.config;
        if let Some(name) = &self.algorithm {
            config.algorithm = name.parse()?;
        }

        let sources = [
            self.redis_connection.is_some(),
            self.redis_client.is_some(),
            self.redis_url.is_some(),
        ]
        .into_iter()
        .filter(|supplied| *supplied)
        .count();
        if sources > 1 {
            return Err(RateLimiterError::Configuration(
                "choose only one of redis connection, redis client or redis url".to_string(),
            ));
        }
        if let Some(url) = &self.redis_url {
            check_redis_scheme(url)?;
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let backend = if let Some(connection) = self.redis_connection {
            Backend::Redis(RedisStorage::from_connection(connection, self.redis_config))
        } else if let Some(client) = self.redis_client {
            Backend::Redis(RedisStorage::from_client(client, self.redis_config).await?)
        } else if let Some(url) = self.redis_url {
            let redis_config = RedisConfig {
                url,
                ..self.redis_config
            };
            Backend::Redis(RedisStorage::new(redis_config).await?)
        } else {
            Backend::Memory(MemoryStorage::with_clock(
                self.memory_config,
                Arc::clone(&clock),
            ))
        };

        Ok(RateLimiter::assemble(backend, &config, clock))
    }
}

/// Rejects connection strings whose scheme no backend understands
pub fn check_redis_scheme(raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw).map_err(|e| {
        RateLimiterError::UnsupportedStorage(format!("not a connection string ({}): {}", e, raw))
    })?;

    if REDIS_SCHEMES.contains(&parsed.scheme()) {
        Ok(())
    } else {
        Err(RateLimiterError::UnsupportedStorage(format!(
            "unsupported scheme {:?} in {}",
            parsed.scheme(),
            sanitize_url(raw)
        )))
    }
}
