// src/algorithms/token_bucket.rs

use crate::algorithms::{storage_key, window_millis, AlgorithmKind, Decision};
use crate::algorithms::{RateLimitAlgorithm, RateLimitResult};
use crate::clock::Clock;
use crate::error::Result;
use crate::storage::{transition_script, StorageBackend, Transition};
use async_trait::async_trait;
use redis::Script;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// Absorbs float error when a caller waits exactly `retry_after`
const TOKEN_EPSILON: f64 = 1e-9;

/// Token Bucket rate limiting algorithm
///
/// The token bucket algorithm works by maintaining a "bucket" of tokens that are
/// replenished at a constant rate. Each request consumes a token, and if there
/// are no tokens available, the request is rejected.
///
/// Capacity is `limit` and the bucket refills completely over one `window`,
/// i.e. at `limit / window` tokens per second.
#[derive(Debug, Clone)]
pub struct TokenBucket<S>
where
    S: StorageBackend,
{
    /// Storage backend for persisting bucket state
    storage: S,
    clock: Arc<dyn Clock>,
    key_prefix: String,
}

/// Bucket contents as of the last refill
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    #[serde(with = "exact_float")]
    pub tokens: f64,
    pub last_refill_ms: i64,
}

/// Stores a float as its shortest round-trip decimal text. cjson writes
/// numbers with 14 significant digits, which would let the two backends drift
/// apart on fractional token counts.
mod exact_float {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BucketStep {
    pub now_ms: i64,
    pub window_ms: i64,
    pub limit: u64,
}

static BUCKET_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    transition_script(
        r#"
local now = tonumber(ARGV[2])
local window = tonumber(ARGV[3])
local limit = tonumber(ARGV[4])
local epsilon = 1e-9
local tokens, last = limit, now
if state then
    tokens = tonumber(state.tokens)
    last = state.last_refill_ms
end
local elapsed = now - last
if elapsed < 0 then
    elapsed = 0
end
local available = math.min(limit, tokens + elapsed * limit / window)
local left
local outcome
if available >= 1 - epsilon then
    left = math.max(0, available - 1)
    outcome = {
        allowed = true,
        remaining = math.floor(left),
        reset_at_ms = now + math.ceil((limit - left) * window / limit),
    }
else
    left = available
    local retry = math.max(1, math.ceil((1 - available) * window / limit))
    outcome = { allowed = false, remaining = 0, reset_at_ms = now + retry, retry_after_ms = retry }
end
store({ tokens = string.format('%.17g', left), last_refill_ms = now })
return cjson.encode(outcome)
"#,
    )
});

impl BucketStep {
    /// Milliseconds to accumulate `tokens` more tokens, rounded up
    fn millis_for(&self, tokens: f64) -> i64 {
        (tokens * self.window_ms as f64 / self.limit as f64).ceil() as i64
    }
}

impl Transition for BucketStep {
    type State = BucketState;
    type Outcome = Decision;

    fn apply(&self, current: Option<BucketState>) -> (BucketState, Decision) {
        let capacity = self.limit as f64;
        let (tokens, last_refill) = current
            .map(|s| (s.tokens, s.last_refill_ms))
            .unwrap_or((capacity, self.now_ms));

        // clock skew between cooperating processes must never drain the bucket
        let elapsed = (self.now_ms - last_refill).max(0) as f64;
        // multiply before dividing so whole-token refills come out exact
        let available = (tokens + elapsed * capacity / self.window_ms as f64).min(capacity);

        if available >= 1.0 - TOKEN_EPSILON {
            let left = (available - 1.0).max(0.0);
            let reset_at = self.now_ms + self.millis_for(capacity - left);
            let state = BucketState {
                tokens: left,
                last_refill_ms: self.now_ms,
            };
            (state, Decision::allow(left.floor() as u64, reset_at))
        } else {
            let retry = self.millis_for(1.0 - available).max(1);
            // the partial refill is still recorded
            let state = BucketState {
                tokens: available,
                last_refill_ms: self.now_ms,
            };
            (state, Decision::deny(self.now_ms + retry, retry as u64))
        }
    }

    fn script(&self) -> &'static Script {
        &BUCKET_SCRIPT
    }

    fn script_args(&self) -> Vec<i64> {
        vec![self.now_ms, self.window_ms, self.limit as i64]
    }
}

impl<S> TokenBucket<S>
where
    S: StorageBackend,
{
    /// Creates a new token bucket with the given storage
    pub fn new(storage: S, clock: Arc<dyn Clock>, key_prefix: impl Into<String>) -> Self {
        Self {
            storage,
            clock,
            key_prefix: key_prefix.into(),
        }
    }
}

#[async_trait]
impl<S> RateLimitAlgorithm for TokenBucket<S>
where
    S: StorageBackend + 'static,
{
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::TokenBucket
    }

    async fn is_allowed(&self, key: &str, limit: u64, window: Duration) -> Result<RateLimitResult> {
        let step = BucketStep {
            now_ms: self.clock.now_millis(),
            window_ms: window_millis(window),
            limit,
        };
        let key = storage_key(&self.key_prefix, self.kind(), key);

        // an untouched bucket is full again after one window, same as absent
        let decision = self.storage.atomic_update(&key, window, &step).await?;
        Ok(RateLimitResult::from_decision(limit, decision))
    }
}
