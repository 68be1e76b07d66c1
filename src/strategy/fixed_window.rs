//! Fixed Window strategy
//!
//! Time is cut into windows of `window_size` seconds, identified by
//! `⌊now / window_size⌋`, and each window gets its own counter capped at
//! `limit`. Cheapest of the five algorithms, with the known boundary
//! artifact: a client can land up to `2 × limit` requests in a short span
//! straddling two windows. That trade-off is inherent and reported
//! transparently.

use crate::strategy::{namespace_key, nth, Strategy};
use crate::{Algorithm, RateLimitDecision, RateLimitError, ScriptExecutor};
use crate::decision::epoch_secs;
use async_trait::async_trait;
use std::sync::Arc;

const FIXED_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])

local time = redis.call('TIME')
local now = tonumber(time[1])

local window_id = math.floor(now / window)
local window_key = key .. ":" .. window_id

local current = tonumber(redis.call("GET", window_key))

if current == nil then
    current = 0
end

local allowed = current < limit

if allowed then
    current = redis.call("INCR", window_key)
    redis.call("EXPIRE", window_key, window * 2)
end

local reset_at = (window_id + 1) * window

return {
    allowed and 1 or 0,
    current,
    limit,
    reset_at
}
"#;

/// See the [module docs](self).
pub struct FixedWindowStrategy {
    executor: Arc<dyn ScriptExecutor>,
    limit: u32,
    window_size: u64,
}

impl std::fmt::Debug for FixedWindowStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowStrategy")
            .field("limit", &self.limit)
            .field("window_size", &self.window_size)
            .finish()
    }
}

impl FixedWindowStrategy {
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
impl Strategy for FixedWindowStrategy {
    async fn check(&self, identifier: &str) -> Result<RateLimitDecision, RateLimitError> {
        let key = namespace_key(self.algorithm(), identifier);
        let reply = self
            .executor
            .execute_script(
                FIXED_WINDOW_SCRIPT,
                &[key],
                &[self.limit.to_string(), self.window_size.to_string()],
            )
            .await?;

        let allowed = nth(&reply, 0, self.algorithm())? == 1;
        let current = nth(&reply, 1, self.algorithm())?.max(0) as u64;
        let limit = nth(&reply, 2, self.algorithm())? as u64;
        let reset_at = nth(&reply, 3, self.algorithm())?.max(0) as u64;

        let decision = if allowed {
            RateLimitDecision::allowed(self.algorithm(), current, limit, Some(epoch_secs(reset_at)))
        } else {
            RateLimitDecision::denied(self.algorithm(), current, limit, Some(epoch_secs(reset_at)))
        };
        Ok(decision)
    }

    /// Window counters carry the window id in the key, so reset scans the
    /// identifier's namespace and deletes whatever it finds. A request
    /// admitted between scan and delete may leave one residual window key;
    /// it expires with its TTL.
    async fn reset(&self, identifier: &str) -> Result<(), RateLimitError> {
        let key = namespace_key(self.algorithm(), identifier);
        let keys = self.executor.find_keys(&format!("{}:*", key)).await?;
        if keys.is_empty() {
            return Ok(());
        }
        self.executor.delete_keys(&keys).await
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::FixedWindow
    }

    fn describe(&self) -> String {
        format!("Fixed Window (limit={} per {} seconds)", self.limit, self.window_size)
    }
}
