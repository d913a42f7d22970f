// src/algorithms/sliding_window_counter.rs

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

/// Sliding Window Counter rate limiting algorithm
///
/// Time is cut into fixed windows aligned to the UNIX epoch. Only the counts
/// of the current and the previous window are kept; the previous one is
/// weighted by how much of it still overlaps the sliding window ending now.
/// Constant space per key, at the cost of assuming the previous window's
/// events were spread evenly.
#[derive(Debug, Clone)]
pub struct SlidingWindowCounter<S>
where
    S: StorageBackend,
{
    /// Storage backend for persisting window counters
    storage: S,
    clock: Arc<dyn Clock>,
    key_prefix: String,
}

/// Per-key counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterState {
    pub current: u64,
    pub previous: u64,
    pub window_index: i64,
}

/// One counter step at a fixed instant
#[derive(Debug, Clone, Copy)]
pub struct CounterStep {
    pub now_ms: i64,
    pub window_ms: i64,
    pub limit: u64,
}

static COUNTER_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    transition_script(
        r#"
local now = tonumber(ARGV[2])
local window = tonumber(ARGV[3])
local limit = tonumber(ARGV[4])
local idx = math.floor(now / window)
local cur, prev = 0, 0
if state then
    if state.window_index == idx then
        cur = state.current
        prev = state.previous
    elseif state.window_index + 1 == idx then
        prev = state.current
    end
end
local fraction = (now - idx * window) / window
local weighted = prev * (1 - fraction) + cur
local reset_at = (idx + 1) * window
local outcome
if weighted + 1 <= limit then
    cur = cur + 1
    local remaining = math.floor(limit - weighted - 1)
    if remaining < 0 then
        remaining = 0
    end
    outcome = { allowed = true, remaining = remaining, reset_at_ms = reset_at }
else
    outcome = { allowed = false, remaining = 0, reset_at_ms = reset_at, retry_after_ms = reset_at - now }
end
store({ current = cur, previous = prev, window_index = idx })
return cjson.encode(outcome)
"#,
    )
});

impl Transition for CounterStep {
    type State = CounterState;
    type Outcome = Decision;

    fn apply(&self, current: Option<CounterState>) -> (CounterState, Decision) {
        let idx = self.now_ms.div_euclid(self.window_ms);

        // roll forward: same window keeps both, next window shifts, anything else starts over
        let (mut cur, prev) = match current {
            Some(state) if state.window_index == idx => (state.current, state.previous),
            Some(state) if state.window_index + 1 == idx => (0, state.current),
            _ => (0, 0),
        };

        let fraction = self.now_ms.rem_euclid(self.window_ms) as f64 / self.window_ms as f64;
        let weighted = prev as f64 * (1.0 - fraction) + cur as f64;
        let limit = self.limit as f64;
        let reset_at = (idx + 1) * self.window_ms;

        let decision = if weighted + 1.0 <= limit {
            cur += 1;
            let remaining = (limit - weighted - 1.0).floor().max(0.0) as u64;
            Decision::allow(remaining, reset_at)
        } else {
            Decision::deny(reset_at, (reset_at - self.now_ms) as u64)
        };

        let state = CounterState {
            current: cur,
            previous: prev,
            window_index: idx,
        };
        (state, decision)
    }

    fn script(&self) -> &'static Script {
        &COUNTER_SCRIPT
    }

    fn script_args(&self) -> Vec<i64> {
        vec![self.now_ms, self.window_ms, self.limit as i64]
    }
}

impl<S> SlidingWindowCounter<S>
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
impl<S> RateLimitAlgorithm for SlidingWindowCounter<S>
where
    S: StorageBackend + 'static,
{
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::SlidingWindowCounter
    }

    async fn is_allowed(&self, key: &str, limit: u64, window: Duration) -> Result<RateLimitResult> {
        let step = CounterStep {
            now_ms: self.clock.now_millis(),
            window_ms: window_millis(window),
            limit,
        };
        // the previous bucket must outlive the current one
        let ttl = window.saturating_mul(2);
        let key = storage_key(&self.key_prefix, self.kind(), key);

        let decision = self.storage.atomic_update(&key, ttl, &step).await?;
        Ok(RateLimitResult::from_decision(limit, decision))
    }
}
