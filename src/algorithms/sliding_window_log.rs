// src/algorithms/sliding_window_log.rs

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

/// Sliding Window Log rate limiting algorithm
///
/// Keeps the time of every accepted event inside the window and counts them
/// exactly. After trimming, a key never holds more than `limit` timestamps.
#[derive(Debug, Clone)]
pub struct SlidingWindowLog<S>
where
    S: StorageBackend,
{
    storage: S,
    clock: Arc<dyn Clock>,
    key_prefix: String,
}

/// Accepted event times in epoch milliseconds, oldest first
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogState {
    pub timestamps: Vec<i64>,
}

#[derive(Debug, Clone, Copy)]
pub struct LogStep {
    pub now_ms: i64,
    pub window_ms: i64,
    pub limit: u64,
}

// The stored log is never empty: an allow appends and a deny needs at least
// `limit` entries, so cjson never has to encode an empty table.
static LOG_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    transition_script(
        r#"
local now = tonumber(ARGV[2])
local window = tonumber(ARGV[3])
local limit = tonumber(ARGV[4])
local cutoff = now - window
local kept = {}
if state and state.timestamps then
    for _, ts in ipairs(state.timestamps) do
        if ts > cutoff then
            kept[#kept + 1] = ts
        end
    end
end
while #kept > limit do
    table.remove(kept, 1)
end
local count = #kept
local outcome
if count < limit then
    local oldest = kept[1] or now
    kept[#kept + 1] = now
    outcome = { allowed = true, remaining = limit - count - 1, reset_at_ms = oldest + window }
else
    local expires = kept[1] + window
    outcome = { allowed = false, remaining = 0, reset_at_ms = expires, retry_after_ms = expires - now }
end
store({ timestamps = kept })
return cjson.encode(outcome)
"#,
    )
});

impl Transition for LogStep {
    type State = LogState;
    type Outcome = Decision;

    fn apply(&self, current: Option<LogState>) -> (LogState, Decision) {
        let cutoff = self.now_ms - self.window_ms;
        let mut timestamps = current.map(|s| s.timestamps).unwrap_or_default();
        timestamps.retain(|&ts| ts > cutoff);

        // a lowered limit leaves surplus entries; only the newest `limit` matter
        let limit = self.limit as usize;
        if timestamps.len() > limit {
            timestamps.drain(..timestamps.len() - limit);
        }

        let count = timestamps.len();
        let decision = if count < limit {
            let oldest = timestamps.first().copied().unwrap_or(self.now_ms);
            timestamps.push(self.now_ms);
            Decision::allow((limit - count - 1) as u64, oldest + self.window_ms)
        } else {
            let expires = timestamps[0] + self.window_ms;
            Decision::deny(expires, (expires - self.now_ms) as u64)
        };

        (LogState { timestamps }, decision)
    }

    fn script(&self) -> &'static Script {
        &LOG_SCRIPT
    }

    fn script_args(&self) -> Vec<i64> {
        vec![self.now_ms, self.window_ms, self.limit as i64]
    }
}

impl<S> SlidingWindowLog<S>
where
    S: StorageBackend,
{
    pub fn new(storage: S, clock: Arc<dyn Clock>, key_prefix: impl Into<String>) -> Self {
        Self {
            storage,
            clock,
            key_prefix: key_prefix.into(),
        }
    }
}

#[async_trait]
impl<S> RateLimitAlgorithm for SlidingWindowLog<S>
where
    S: StorageBackend + 'static,
{
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::SlidingWindowLog
    }

    async fn is_allowed(&self, key: &str, limit: u64, window: Duration) -> Result<RateLimitResult> {
        let step = LogStep {
            now_ms: self.clock.now_millis(),
            window_ms: window_millis(window),
            limit,
        };
        let key = storage_key(&self.key_prefix, self.kind(), key);

        let decision = self.storage.atomic_update(&key, window, &step).await?;
        Ok(RateLimitResult::from_decision(limit, decision))
    }
}
