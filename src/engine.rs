// src/engine.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, warn};

use crate::algorithms::{
    window_millis, AlgorithmKind, RateLimitAlgorithm, RateLimitResult, SlidingWindowCounter,
    SlidingWindowLog, TokenBucket,
};
use crate::clock::Clock;
use crate::config::{FailurePolicy, RateLimiterConfig};
use crate::error::{RateLimiterError, Result};
use crate::rate_limit_event;
use crate::storage::StorageBackend;

/// Largest accepted `limit`. Every count the Redis scripts hand back must stay
/// below 10^14, the widest integer cjson prints without an exponent.
pub const MAX_LIMIT: u64 = 1_000_000_000_000;

/// Longest accepted window, about 317 years; `now + 2 * window` stays below
/// 10^14 ms for any current clock.
pub const MAX_WINDOW: Duration = Duration::from_millis(10_000_000_000_000);

/// Binds one algorithm to a storage backend.
///
/// Holds no mutable state, so one engine can serve any number of concurrent
/// callers; all coordination happens in the backend's atomic update.
#[derive(Debug)]
pub struct Engine {
    algorithm: Box<dyn RateLimitAlgorithm>,
    failure_policy: FailurePolicy,
    clock: Arc<dyn Clock>,
}

impl Engine {
    /// Builds the engine for `config.algorithm` over `storage`
    pub fn new<S>(storage: S, config: &RateLimiterConfig, clock: Arc<dyn Clock>) -> Self
    where
        S: StorageBackend + Clone + 'static,
    {
        let prefix = config.key_prefix.clone();
        let algorithm: Box<dyn RateLimitAlgorithm> = match config.algorithm {
            AlgorithmKind::SlidingWindowCounter => Box::new(SlidingWindowCounter::new(
                storage,
                Arc::clone(&clock),
                prefix,
            )),
            AlgorithmKind::SlidingWindowLog => {
                Box::new(SlidingWindowLog::new(storage, Arc::clone(&clock), prefix))
            }
            AlgorithmKind::TokenBucket => {
                Box::new(TokenBucket::new(storage, Arc::clone(&clock), prefix))
            }
        };

        Self {
            algorithm,
            failure_policy: config.failure_policy,
            clock,
        }
    }

    pub fn algorithm(&self) -> AlgorithmKind {
        self.algorithm.kind()
    }

    /// Decides whether one more event for `key` is permitted and records it.
    ///
    /// Fails with `Configuration` for an empty key, a limit outside
    /// `1..=MAX_LIMIT` or a window outside `1ms..=MAX_WINDOW`, and with
    /// `BackendUnavailable` when storage fails under the fail-closed policy.
    pub async fn execute(&self, key: &str, limit: u64, window: Duration) -> Result<RateLimitResult> {
        validate(key, limit, window)?;

        match self.algorithm.is_allowed(key, limit, window).await {
            Ok(result) => {
                rate_limit_event!(
                    self.algorithm.kind().as_str(),
                    key,
                    result.allowed,
                    limit,
                    window_millis(window)
                );
                Ok(result)
            }
            Err(err) if err.is_backend_failure() => self.on_backend_failure(key, limit, window, err),
            Err(err) => Err(err),
        }
    }

    fn on_backend_failure(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        err: RateLimiterError,
    ) -> Result<RateLimitResult> {
        match self.failure_policy {
            FailurePolicy::Closed => {
                error!(key, error = %err, "Rate limit backend failed; failing closed");
                Err(err)
            }
            FailurePolicy::Open => {
                warn!(key, error = %err, "Rate limit backend failed; failing open");
                let now = self.clock.now_millis();
                let reset_at = DateTime::<Utc>::from_timestamp_millis(now + window_millis(window))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                Ok(RateLimitResult {
                    allowed: true,
                    limit,
                    remaining: limit.saturating_sub(1),
                    reset_at,
                    retry_after: None,
                })
            }
        }
    }
}

fn validate(key: &str, limit: u64, window: Duration) -> Result<()> {
    if key.is_empty() {
        return Err(RateLimiterError::Configuration(
            "key must not be empty".to_string(),
        ));
    }
    if limit == 0 {
        return Err(RateLimiterError::Configuration(
            "limit must be positive".to_string(),
        ));
    }
    if limit > MAX_LIMIT {
        return Err(RateLimiterError::Configuration(format!(
            "limit must be at most {}, got {}",
            MAX_LIMIT, limit
        )));
    }
    if window.as_millis() == 0 {
        return Err(RateLimiterError::Configuration(format!(
            "window must be at least 1ms, got {:?}",
            window
        )));
    }
    if window > MAX_WINDOW {
        return Err(RateLimiterError::Configuration(format!(
            "window must be at most {:?}, got {:?}",
            MAX_WINDOW, window
        )));
    }
    Ok(())
}
