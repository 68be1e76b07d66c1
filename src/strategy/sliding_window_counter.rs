//! Sliding Window Counter strategy
//!
//! A hybrid of Fixed Window and Sliding Window Log: two counters (previous
//! and current window) approximate a sliding window by weighting the
//! previous count with the unexpired fraction of it:
//!
//! `weighted = prev_count × (1 − elapsed_fraction) + curr_count`
//!
//! Memory per identifier stays O(1) and the fixed-window boundary burst is
//! smoothed away by the interpolation. The estimator assumes arrivals were
//! evenly spread over the previous window; in practice the error is
//! negligible, which makes this the default choice.

use crate::strategy::{namespace_key, nth, Strategy};
use crate::{
    Algorithm, RateLimitDecision, RateLimitError, RateLimitMetadata, ScriptExecutor,
};
use crate::decision::epoch_secs;
use async_trait::async_trait;
use std::sync::Arc;

const SLIDING_WINDOW_COUNTER_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])

local time = redis.call('TIME')
local now = tonumber(time[1]) + tonumber(time[2]) / 1000000

local current_window = math.floor(now / window)
local prev_window = current_window - 1

local curr_key = key .. ":" .. current_window
local prev_key = key .. ":" .. prev_window

local prev_count = tonumber(redis.call("GET", prev_key)) or 0
local curr_count = tonumber(redis.call("GET", curr_key)) or 0

local window_start = current_window * window
local elapsed_percent = (now - window_start) / window

local weighted_count = prev_count * (1 - elapsed_percent) + curr_count

local allowed = weighted_count < limit

if allowed then
    curr_count = redis.call("INCR", curr_key)
    redis.call("EXPIRE", curr_key, window * 2)
    weighted_count = prev_count * (1 - elapsed_percent) + curr_count
end

local next_window_start = (current_window + 1) * window

return {
    allowed and 1 or 0,
    math.floor(weighted_count),
    limit,
    next_window_start,
    prev_count,
    curr_count
}
"#;

/// See the [module docs](self).
pub struct SlidingWindowCounterStrategy {
    executor: Arc<dyn ScriptExecutor>,
    limit: u32,
    window_size: u64,
}

impl std::fmt::Debug for SlidingWindowCounterStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowCounterStrategy")
            .field("limit", &self.limit)
            .field("window_size", &self.window_size)
            .finish()
    }
}

impl SlidingWindowCounterStrategy {
    pub fn new(
        executor: Arc<dyn ScriptExecutor>,
        limit: u32,
        window_size: u64,
    ) -> Result<Self, RateLimitError> {
        if limit == 0 {
            return Err(RateLimitError::validation(format!("Limit must be positive: {}", limit)));
        }
        if window_size == 0 {
            return Err(RateLimitError::validation(format!(
                "Window size must be positive: {}",
                window_size
            )));
        }
        Ok(Self { executor, limit, window_size })
    }
}

#[async_trait]
impl Strategy for SlidingWindowCounterStrategy {
    async fn check(&self, identifier: &str) -> Result<RateLimitDecision, RateLimitError> {
        let key = namespace_key(self.algorithm(), identifier);
        let reply = self
            .executor
            .execute_script(
                SLIDING_WINDOW_COUNTER_SCRIPT,
                &[key],
                &[self.limit.to_string(), self.window_size.to_string()],
            )
            .await?;

        let allowed = nth(&reply, 0, self.algorithm())? == 1;
        let weighted = nth(&reply, 1, self.algorithm())?.max(0) as u64;
        let limit = nth(&reply, 2, self.algorithm())? as u64;
        let next_window_start = nth(&reply, 3, self.algorithm())?.max(0) as u64;
        let prev_count = nth(&reply, 4, self.algorithm())?.max(0) as u64;
        let curr_count = nth(&reply, 5, self.algorithm())?.max(0) as u64;

        let window_start = next_window_start.saturating_sub(self.window_size);
        let reset_at = Some(epoch_secs(next_window_start));
        let decision = if allowed {
            RateLimitDecision::allowed(self.algorithm(), weighted, limit, reset_at)
        } else {
            RateLimitDecision::denied(self.algorithm(), weighted, limit, reset_at)
        };
        Ok(decision.with_metadata(RateLimitMetadata::for_sliding_window_counter(
            prev_count,
            curr_count,
            window_start,
        )))
    }

    /// Per-window keys carry the window id, so reset scans the
    /// identifier's namespace and deletes what it finds. One residual key
    /// from a concurrent admission is acceptable; its TTL clears it.
    async fn reset(&self, identifier: &str) -> Result<(), RateLimitError> {
        let key = namespace_key(self.algorithm(), identifier);
        let keys = self.executor.find_keys(&format!("{}:*", key)).await?;
        if keys.is_empty() {
            return Ok(());
        }
        self.executor.delete_keys(&keys).await
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindowCounter
    }

    fn describe(&self) -> String {
        format!(
            "Sliding Window Counter (limit={} per {} seconds)",
            self.limit, self.window_size
        )
    }
}
