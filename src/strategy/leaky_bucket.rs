//! Leaky Bucket strategy
//!
//! Requests join a queue of depth up to `capacity`; the queue drains at
//! `leak_rate` items per second. A full queue rejects new arrivals, so the
//! observed output rate is smooth regardless of how bursty the input is.
//!
//! The script drains whole items only and carries the sub-item remainder
//! forward by advancing `last_leak` with the inverse calculation
//! (`last_leak + leaked / leak_rate`) instead of snapping it to now.
//! Snapping would discard the fractional-time credit smaller than one leak
//! period on every call and under-drain by up to one item per invocation.

use crate::strategy::{namespace_key, nth, Strategy, BUCKET_TTL_SECS};
use crate::{
    Algorithm, RateLimitDecision, RateLimitError, RateLimitMetadata, ScriptExecutor,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const LEAKY_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local leak_rate = tonumber(ARGV[2])
local ttl = tonumber(ARGV[3])

local time = redis.call('TIME')
local now = tonumber(time[1]) + tonumber(time[2]) / 1000000

local queue_key = key .. ":queue"
local timestamp_key = key .. ":timestamp"

local queue_size = tonumber(redis.call("GET", queue_key))
local last_leak = tonumber(redis.call("GET", timestamp_key))

if queue_size == nil then
    queue_size = 0
end

if last_leak == nil then
    last_leak = now
end

local elapsed = math.max(0, now - last_leak)
local leaked = math.floor(elapsed * leak_rate)

if leaked > 0 then
    queue_size = math.max(0, queue_size - leaked)
    last_leak = last_leak + leaked / leak_rate
end

local allowed = queue_size < capacity

if allowed then
    queue_size = queue_size + 1
end

redis.call("SETEX", queue_key, ttl, queue_size)
redis.call("SETEX", timestamp_key, ttl, string.format("%.17g", last_leak))

return {
    allowed and 1 or 0,
    queue_size,
    capacity
}
"#;

/// See the [module docs](self).
pub struct LeakyBucketStrategy {
    executor: Arc<dyn ScriptExecutor>,
    capacity: u32,
    leak_rate: f64,
}

impl std::fmt::Debug for LeakyBucketStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeakyBucketStrategy")
            .field("capacity", &self.capacity)
            .field("leak_rate", &self.leak_rate)
            .finish()
    }
}

impl LeakyBucketStrategy {
    pub fn new(
        executor: Arc<dyn ScriptExecutor>,
        capacity: u32,
        leak_rate: f64,
    ) -> Result<Self, RateLimitError> {
        if capacity == 0 {
            return Err(RateLimitError::validation(format!(
                "Capacity must be positive: {}",
                capacity
            )));
        }
        if !(leak_rate.is_finite() && leak_rate > 0.0) {
            return Err(RateLimitError::validation(format!(
                "Leak rate must be positive: {}",
                leak_rate
            )));
        }
        Ok(Self { executor, capacity, leak_rate })
    }

    /// When the queue will have fully drained, assuming no new arrivals.
    fn reset_hint(&self, queue_size: u64) -> SystemTime {
        let now = SystemTime::now();
        if queue_size == 0 {
            return now;
        }
        let seconds = (queue_size as f64 / self.leak_rate).ceil() as u64;
        now + Duration::from_secs(seconds)
    }
}

#[async_trait]
impl Strategy for LeakyBucketStrategy {
    async fn check(&self, identifier: &str) -> Result<RateLimitDecision, RateLimitError> {
        let key = namespace_key(self.algorithm(), identifier);
        let reply = self
            .executor
            .execute_script(
                LEAKY_BUCKET_SCRIPT,
                &[key],
                &[
                    self.capacity.to_string(),
                    self.leak_rate.to_string(),
                    BUCKET_TTL_SECS.to_string(),
                ],
            )
            .await?;

        let allowed = nth(&reply, 0, self.algorithm())? == 1;
        let queue_size = nth(&reply, 1, self.algorithm())?.max(0) as u64;
        let limit = nth(&reply, 2, self.algorithm())? as u64;

        let reset_at = Some(self.reset_hint(queue_size));
        let decision = if allowed {
            RateLimitDecision::allowed(self.algorithm(), queue_size, limit, reset_at)
        } else {
            RateLimitDecision::denied(self.algorithm(), queue_size, limit, reset_at)
        };
        Ok(decision.with_metadata(RateLimitMetadata::for_leaky_bucket(queue_size)))
    }

    async fn reset(&self, identifier: &str) -> Result<(), RateLimitError> {
        let key = namespace_key(self.algorithm(), identifier);
        self.executor
            .delete_keys(&[format!("{}:queue", key), format!("{}:timestamp", key)])
            .await
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::LeakyBucket
    }

    fn describe(&self) -> String {
        format!(
            "Leaky Bucket (capacity={}, leakRate={:.2}/sec)",
            self.capacity, self.leak_rate
        )
    }
}
