//! Token Bucket strategy
//!
//! A bucket holds up to `capacity` tokens and refills continuously at
//! `refill_rate` tokens per second; each admitted request consumes one.
//! Bursts up to the full capacity are allowed, while the long-run admission
//! rate converges on the refill rate.
//!
//! Token counts are fractional, and Lua numbers returned to the server are
//! truncated to integers, so the script moves the count across the wire as
//! a `%.17g`-formatted string and the decoder re-parses it as a double.
//! The persisted values use the same encoding, which round-trips an IEEE
//! double exactly.

use crate::strategy::{f64_field, int_field, namespace_key, Strategy, BUCKET_TTL_SECS};
use crate::{
    Algorithm, RateLimitDecision, RateLimitError, RateLimitMetadata, ScriptExecutor,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local requested = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local time = redis.call('TIME')
local now = tonumber(time[1]) + tonumber(time[2]) / 1000000

local tokens_key = key .. ":tokens"
local timestamp_key = key .. ":timestamp"

local last_tokens = tonumber(redis.call("GET", tokens_key))
local last_refreshed = tonumber(redis.call("GET", timestamp_key))

if last_tokens == nil then
    last_tokens = capacity
end

if last_refreshed == nil then
    last_refreshed = now
end

local delta = math.max(0, now - last_refreshed)
local filled_tokens = math.min(capacity, last_tokens + (delta * rate))

local allowed = filled_tokens >= requested
local new_tokens = filled_tokens

if allowed then
    new_tokens = filled_tokens - requested
end

redis.call("SETEX", tokens_key, ttl, string.format("%.17g", new_tokens))
redis.call("SETEX", timestamp_key, ttl, string.format("%.17g", now))

return {
    allowed and 1 or 0,
    string.format("%.17g", new_tokens),
    capacity
}
"#;

/// See the [module docs](self).
pub struct TokenBucketStrategy {
    executor: Arc<dyn ScriptExecutor>,
    capacity: u32,
    refill_rate: f64,
}

impl std::fmt::Debug for TokenBucketStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucketStrategy")
            .field("capacity", &self.capacity)
            .field("refill_rate", &self.refill_rate)
            .finish()
    }
}

impl TokenBucketStrategy {
    pub fn new(
        executor: Arc<dyn ScriptExecutor>,
        capacity: u32,
        refill_rate: f64,
    ) -> Result<Self, RateLimitError> {
        if capacity == 0 {
            return Err(RateLimitError::validation(format!(
                "Capacity must be positive: {}",
                capacity
            )));
        }
        if !(refill_rate.is_finite() && refill_rate > 0.0) {
            return Err(RateLimitError::validation(format!(
                "Refill rate must be positive: {}",
                refill_rate
            )));
        }
        Ok(Self { executor, capacity, refill_rate })
    }

    /// When the bucket will be full again, assuming no further admissions.
    fn reset_hint(&self, tokens: f64) -> SystemTime {
        let now = SystemTime::now();
        if tokens >= self.capacity as f64 {
            return now;
        }
        let needed = self.capacity as f64 - tokens;
        let seconds = (needed / self.refill_rate).ceil() as u64;
        now + Duration::from_secs(seconds)
    }
}

#[async_trait]
impl Strategy for TokenBucketStrategy {
    async fn check(&self, identifier: &str) -> Result<RateLimitDecision, RateLimitError> {
        let key = namespace_key(self.algorithm(), identifier);
        let reply = self
            .executor
            .execute_script_raw(
                TOKEN_BUCKET_SCRIPT,
                &[key],
                &[
                    self.capacity.to_string(),
                    self.refill_rate.to_string(),
                    "1".to_owned(),
                    BUCKET_TTL_SECS.to_string(),
                ],
            )
            .await?;

        let allowed = int_field(&reply, 0, self.algorithm())? == 1;
        let tokens = f64_field(&reply, 1, self.algorithm())?;
        let limit = int_field(&reply, 2, self.algorithm())? as u64;

        // Consumed tokens, floored, is the reported count; a denied request
        // left the (decayed) count untouched and reports a full bucket.
        let current = if allowed {
            (self.capacity as f64 - tokens).max(0.0).floor() as u64
        } else {
            self.capacity as u64
        };
        let reset_at = Some(self.reset_hint(tokens));

        let decision = if allowed {
            RateLimitDecision::allowed(self.algorithm(), current, limit, reset_at)
        } else {
            RateLimitDecision::denied(self.algorithm(), current, limit, reset_at)
        };
        Ok(decision.with_metadata(RateLimitMetadata::for_token_bucket(tokens)))
    }

    async fn reset(&self, identifier: &str) -> Result<(), RateLimitError> {
        let key = namespace_key(self.algorithm(), identifier);
        self.executor
            .delete_keys(&[format!("{}:tokens", key), format!("{}:timestamp", key)])
            .await
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::TokenBucket
    }

    fn describe(&self) -> String {
        format!(
            "Token Bucket (capacity={}, refillRate={:.2}/sec)",
            self.capacity, self.refill_rate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testing::{int, text, Call, StubExecutor};

    fn strategy(executor: Arc<StubExecutor>) -> TokenBucketStrategy {
        TokenBucketStrategy::new(executor, 10, 1.0).unwrap()
    }

    #[test]
    fn rejects_non_positive_parameters() {
        let executor = StubExecutor::new();
        assert!(TokenBucketStrategy::new(executor.clone(), 0, 1.0).unwrap_err().is_validation());
        assert!(TokenBucketStrategy::new(executor.clone(), 10, 0.0).unwrap_err().is_validation());
        assert!(TokenBucketStrategy::new(executor, 10, f64::NAN).unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn admitted_check_decodes_fractional_tokens() {
        let executor = StubExecutor::new();
        executor.push_reply(vec![int(1), text("8.5"), int(10)]);

        let decision = strategy(executor.clone()).check("alice").await.unwrap();
        assert!(decision.is_allowed());
        assert_eq!(decision.current(), 1); // floor(10 - 8.5)
        assert_eq!(decision.limit(), 10);
        assert_eq!(decision.remaining(), 9);
        assert_eq!(decision.metadata().unwrap().tokens, Some(8.5));
        assert!(decision.reset_at().is_some());
    }

    #[tokio::test]
    async fn denied_check_reports_a_full_count() {
        let executor = StubExecutor::new();
        executor.push_reply(vec![int(0), text("0.25"), int(10)]);

        let decision = strategy(executor).check("alice").await.unwrap();
        assert!(decision.is_limit_reached());
        assert_eq!(decision.current(), 10);
        assert_eq!(decision.remaining(), 0);
        assert_eq!(decision.metadata().unwrap().tokens, Some(0.25));
    }

    #[tokio::test]
    async fn script_receives_namespaced_key_and_parameters() {
        let executor = StubExecutor::new();
        executor.push_reply(vec![int(1), text("9"), int(10)]);

        strategy(executor.clone()).check("alice").await.unwrap();

        match &executor.script_calls()[0] {
            Call::Script { script, keys, args } => {
                assert!(script.contains("redis.call('TIME')"));
                assert!(script.contains("%.17g"));
                assert_eq!(keys, &["rate_limit:token_bucket:alice".to_owned()]);
                assert_eq!(args, &["10", "1", "1", "3600"]);
            }
            other => panic!("unexpected call: {:?}", other),
        }
    }

    #[tokio::test]
    async fn tokens_survive_the_wire_as_text() {
        // 17 significant digits, the exact %.17g encoding.
        let executor = StubExecutor::new();
        executor.push_reply(vec![int(1), text("7.1234567890123459"), int(10)]);

        let decision = strategy(executor).check("alice").await.unwrap();
        assert_eq!(decision.metadata().unwrap().tokens, Some(7.1234567890123459_f64));
    }

    #[tokio::test]
    async fn malformed_reply_is_a_storage_error() {
        let executor = StubExecutor::new();
        executor.push_reply(vec![int(1)]);

        let err = strategy(executor).check("alice").await.unwrap_err();
        assert!(err.is_storage());
    }

    #[tokio::test]
    async fn reset_deletes_both_state_keys() {
        let executor = StubExecutor::new();
        strategy(executor.clone()).reset("alice").await.unwrap();

        assert_eq!(
            executor.deleted(),
            vec![vec![
                "rate_limit:token_bucket:alice:tokens".to_owned(),
                "rate_limit:token_bucket:alice:timestamp".to_owned(),
            ]]
        );
    }

    #[test]
    fn describe_names_the_parameters() {
        let executor = StubExecutor::new();
        let strategy = TokenBucketStrategy::new(executor, 25, 2.5).unwrap();
        assert_eq!(strategy.describe(), "Token Bucket (capacity=25, refillRate=2.50/sec)");
    }
}
