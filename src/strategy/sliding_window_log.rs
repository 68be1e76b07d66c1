//! Sliding Window Log strategy
//!
//! Every admitted request is recorded in a sorted set scored by its
//! arrival time; a check evicts entries older than the window and counts
//! what remains. Exact at the cost of one stored member per request.
//!
//! Member uniqueness is load-bearing: a sorted-set insert with an existing
//! member updates its score in place, so two requests in the same
//! microsecond would collapse into one entry and undercount if members
//! were derived from time alone. An atomically incremented per-identifier
//! sequence suffix makes every member unique without leaning on
//! randomness.

use crate::strategy::{namespace_key, nth, Strategy};
use crate::{
    Algorithm, RateLimitDecision, RateLimitError, RateLimitMetadata, ScriptExecutor,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const SLIDING_WINDOW_LOG_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])

local time = redis.call('TIME')
local now = tonumber(time[1]) + tonumber(time[2]) / 1000000

local log_key = key .. ":log"
local seq_key = key .. ":seq"

local window_start = now - window
redis.call("ZREMRANGEBYSCORE", log_key, 0, window_start)

local current = redis.call("ZCARD", log_key)

local allowed = current < limit

if allowed then
    local seq = redis.call("INCR", seq_key)
    redis.call("EXPIRE", seq_key, window * 2)
    local member = time[1] .. ":" .. time[2] .. ":" .. seq
    redis.call("ZADD", log_key, now, member)
    redis.call("EXPIRE", log_key, window * 2)
    current = current + 1
end

return {
    allowed and 1 or 0,
    current,
    limit,
    window_start
}
"#;

/// See the [module docs](self).
pub struct SlidingWindowLogStrategy {
    executor: Arc<dyn ScriptExecutor>,
    limit: u32,
    window_size: u64,
}

impl std::fmt::Debug for SlidingWindowLogStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLogStrategy")
            .field("limit", &self.limit)
            .field("window_size", &self.window_size)
            .finish()
    }
}

impl SlidingWindowLogStrategy {
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
impl Strategy for SlidingWindowLogStrategy {
    async fn check(&self, identifier: &str) -> Result<RateLimitDecision, RateLimitError> {
        let key = namespace_key(self.algorithm(), identifier);
        let reply = self
            .executor
            .execute_script(
                SLIDING_WINDOW_LOG_SCRIPT,
                &[key],
                &[self.limit.to_string(), self.window_size.to_string()],
            )
            .await?;

        let allowed = nth(&reply, 0, self.algorithm())? == 1;
        let current = nth(&reply, 1, self.algorithm())?.max(0) as u64;
        let limit = nth(&reply, 2, self.algorithm())? as u64;
        let window_start = nth(&reply, 3, self.algorithm())?.max(0) as u64;

        // The window keeps sliding, so there is no exact reset instant;
        // the hint is when the current window has fully rolled over.
        let reset_at = Some(SystemTime::now() + Duration::from_secs(self.window_size));
        let decision = if allowed {
            RateLimitDecision::allowed(self.algorithm(), current, limit, reset_at)
        } else {
            RateLimitDecision::denied(self.algorithm(), current, limit, reset_at)
        };
        Ok(decision.with_metadata(RateLimitMetadata::for_sliding_window_log(window_start)))
    }

    async fn reset(&self, identifier: &str) -> Result<(), RateLimitError> {
        let key = namespace_key(self.algorithm(), identifier);
        self.executor.delete_keys(&[format!("{}:log", key), format!("{}:seq", key)]).await
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindowLog
    }

    fn describe(&self) -> String {
        format!("Sliding Window Log (limit={} per {} seconds)", self.limit, self.window_size)
    }
}
