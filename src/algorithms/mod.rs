// src/algorithms/mod.rs

pub mod sliding_window_counter;
pub mod sliding_window_log;
pub mod token_bucket;

#[cfg(test)]
mod tests;

pub use sliding_window_counter::SlidingWindowCounter;
pub use sliding_window_log::SlidingWindowLog;
pub use token_bucket::TokenBucket;

use super::error::{RateLimiterError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::str::FromStr;
use std::time::Duration;

/// Outcome of one rate limiting decision
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitResult {
    /// Whether the request was allowed
    pub allowed: bool,

    /// Maximum events per window
    pub limit: u64,

    /// Requests still available before the next denial
    pub remaining: u64,

    /// When the subject's state next meaningfully improves
    pub reset_at: DateTime<Utc>,

    /// How long to wait before retrying; present only on denial
    pub retry_after: Option<Duration>,
}

impl RateLimitResult {
    pub(crate) fn from_decision(limit: u64, decision: Decision) -> Self {
        let reset_at = DateTime::<Utc>::from_timestamp_millis(decision.reset_at_ms)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let retry_after = if decision.allowed {
            None
        } else {
            Some(Duration::from_millis(decision.retry_after_ms.unwrap_or(0)))
        };

        Self {
            allowed: decision.allowed,
            limit,
            remaining: if decision.allowed { decision.remaining } else { 0 },
            reset_at,
            retry_after,
        }
    }

    /// Turns a denial into `RateLimitExceeded`, for callers that prefer `?`
    /// over branching on `allowed`.
    pub fn check(&self) -> Result<()> {
        if self.allowed {
            Ok(())
        } else {
            Err(RateLimiterError::RateLimitExceeded {
                limit: self.limit,
                retry_after: self.retry_after.unwrap_or_default(),
            })
        }
    }

    /// Seconds until `reset_at`, rounded up, for header-style reporting
    pub fn reset_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000)
    }
}

/// Wire form of a decision, produced identically by the Rust transitions and
/// the Lua scripts, all times in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_at_ms: i64,
    #[serde(default)]
    pub retry_after_ms: Option<u64>,
}

impl Decision {
    pub(crate) fn allow(remaining: u64, reset_at_ms: i64) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_at_ms,
            retry_after_ms: None,
        }
    }

    pub(crate) fn deny(reset_at_ms: i64, retry_after_ms: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_at_ms,
            retry_after_ms: Some(retry_after_ms),
        }
    }
}

/// Core trait that all rate limiting algorithms must implement
#[async_trait]
pub trait RateLimitAlgorithm: Send + Sync + Debug {
    /// Which variant this is
    fn kind(&self) -> AlgorithmKind;

    /// Decides whether one more event for `key` fits in `limit` per `window`
    /// and records it if so. Arguments are already validated by the engine.
    async fn is_allowed(&self, key: &str, limit: u64, window: Duration) -> Result<RateLimitResult>;
}

/// The recognized algorithm names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    /// Approximate sliding window from two fixed-window counters
    #[default]
    #[serde(alias = "slidingwindow_counter")]
    SlidingWindowCounter,
    /// Exact sliding window from a log of event times
    #[serde(alias = "slidingwindow_log")]
    SlidingWindowLog,
    /// Continuously refilled token bucket
    TokenBucket,
}

impl AlgorithmKind {
    pub const ALL: [AlgorithmKind; 3] = [
        AlgorithmKind::SlidingWindowCounter,
        AlgorithmKind::SlidingWindowLog,
        AlgorithmKind::TokenBucket,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmKind::SlidingWindowCounter => "sliding_window_counter",
            AlgorithmKind::SlidingWindowLog => "sliding_window_log",
            AlgorithmKind::TokenBucket => "token_bucket",
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmKind {
    type Err = RateLimiterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "sliding_window_counter" | "slidingwindow_counter" => {
                Ok(AlgorithmKind::SlidingWindowCounter)
            }
            "sliding_window_log" | "slidingwindow_log" => Ok(AlgorithmKind::SlidingWindowLog),
            "token_bucket" => Ok(AlgorithmKind::TokenBucket),
            other => Err(RateLimiterError::Configuration(format!(
                "unknown algorithm: {:?} (expected one of sliding_window_counter, sliding_window_log, token_bucket)",
                other
            ))),
        }
    }
}

/// Physical storage key for a subject under one algorithm
pub(crate) fn storage_key(prefix: &str, kind: AlgorithmKind, key: &str) -> String {
    format!("{}:{}:{}", prefix, kind.as_str(), key)
}

/// Window length in whole milliseconds; the engine guarantees at least 1
pub(crate) fn window_millis(window: Duration) -> i64 {
    window.as_millis().min(i64::MAX as u128) as i64
}
