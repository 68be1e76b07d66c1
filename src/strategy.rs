//! Rate-limiting strategies
//!
//! Each strategy encapsulates one algorithm: a key layout under the shared
//! `rate_limit:` namespace, one atomic Lua script, parameter validation and
//! the contract for decoding the script's reply into a decision. The whole
//! read-decide-write sequence of an admission check runs inside the script;
//! no strategy performs multi-step logic from the application side, and
//! every script takes "now" from the store's own clock so application
//! instances never need synchronized clocks.

use crate::{Algorithm, RateLimitDecision, RateLimitError, ScriptValue};
use async_trait::async_trait;

pub mod fixed_window;
pub mod leaky_bucket;
pub mod sliding_window_counter;
pub mod sliding_window_log;
pub mod token_bucket;

pub use fixed_window::FixedWindowStrategy;
pub use leaky_bucket::LeakyBucketStrategy;
pub use sliding_window_counter::SlidingWindowCounterStrategy;
pub use sliding_window_log::SlidingWindowLogStrategy;
pub use token_bucket::TokenBucketStrategy;

/// Time-to-live for bucket-algorithm state keys. Windowed algorithms use
/// `window × 2` instead, set inside their scripts.
pub(crate) const BUCKET_TTL_SECS: u64 = 3600;

/// One rate-limiting algorithm, bound to its parameters and an executor.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Decide whether one request from `identifier` is admitted, mutating
    /// counter state atomically when it is.
    async fn check(&self, identifier: &str) -> Result<RateLimitDecision, RateLimitError>;

    /// Discard all counter state for `identifier`. A subsequent check sees
    /// the identifier as never seen.
    async fn reset(&self, identifier: &str) -> Result<(), RateLimitError>;

    /// The algorithm this strategy implements.
    fn algorithm(&self) -> Algorithm;

    /// One-line human description including the configured parameters.
    fn describe(&self) -> String;
}

/// Base key for one (algorithm, identifier) pair:
/// `rate_limit:<algorithm_snake>:<identifier>`.
pub(crate) fn namespace_key(algorithm: Algorithm, identifier: &str) -> String {
    format!("rate_limit:{}:{}", algorithm.key_segment(), identifier)
}

/// Positional integer field of a script reply.
pub(crate) fn int_field(
    reply: &[ScriptValue],
    index: usize,
    algorithm: Algorithm,
) -> Result<i64, RateLimitError> {
    reply.get(index).and_then(ScriptValue::as_int).ok_or_else(|| {
        RateLimitError::storage(format!(
            "malformed {} script reply: expected integer at position {}",
            algorithm.key_segment(),
            index
        ))
    })
}

/// Positional element of an integer-only script reply.
pub(crate) fn nth(
    reply: &[i64],
    index: usize,
    algorithm: Algorithm,
) -> Result<i64, RateLimitError> {
    reply.get(index).copied().ok_or_else(|| {
        RateLimitError::storage(format!(
            "malformed {} script reply: expected integer at position {}",
            algorithm.key_segment(),
            index
        ))
    })
}

/// Positional real-valued field of a script reply (integer or text).
pub(crate) fn f64_field(
    reply: &[ScriptValue],
    index: usize,
    algorithm: Algorithm,
) -> Result<f64, RateLimitError> {
    reply.get(index).and_then(ScriptValue::as_f64).ok_or_else(|| {
        RateLimitError::storage(format!(
            "malformed {} script reply: expected number at position {}",
            algorithm.key_segment(),
            index
        ))
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Canned-reply executor shared by the strategy and limiter tests.

    use crate::{RateLimitError, ScriptExecutor, ScriptValue};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// A recorded executor call, in arrival order.
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Call {
        Script { script: String, keys: Vec<String>, args: Vec<String> },
        Delete(Vec<String>),
        Find(String),
    }

    /// Plays back queued replies and records every call.
    #[derive(Default)]
    pub(crate) struct StubExecutor {
        replies: Mutex<VecDeque<Result<Vec<ScriptValue>, RateLimitError>>>,
        found: Mutex<VecDeque<Vec<String>>>,
        delete_errors: Mutex<VecDeque<RateLimitError>>,
        calls: Mutex<Vec<Call>>,
    }

    impl StubExecutor {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub(crate) fn push_reply(&self, reply: Vec<ScriptValue>) {
            self.replies.lock().unwrap().push_back(Ok(reply));
        }

        pub(crate) fn push_error(&self, error: RateLimitError) {
            self.replies.lock().unwrap().push_back(Err(error));
        }

        pub(crate) fn push_found(&self, keys: Vec<String>) {
            self.found.lock().unwrap().push_back(keys);
        }

        pub(crate) fn push_delete_error(&self, error: RateLimitError) {
            self.delete_errors.lock().unwrap().push_back(error);
        }

        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        /// The script calls only, in order.
        pub(crate) fn script_calls(&self) -> Vec<Call> {
            self.calls()
                .into_iter()
                .filter(|call| matches!(call, Call::Script { .. }))
                .collect()
        }

        pub(crate) fn deleted(&self) -> Vec<Vec<String>> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Delete(keys) => Some(keys),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ScriptExecutor for StubExecutor {
        async fn execute_script_raw(
            &self,
            script: &str,
            keys: &[String],
            args: &[String],
        ) -> Result<Vec<ScriptValue>, RateLimitError> {
            self.calls.lock().unwrap().push(Call::Script {
                script: script.to_owned(),
                keys: keys.to_vec(),
                args: args.to_vec(),
            });
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RateLimitError::storage("no scripted reply queued")))
        }

        async fn delete_keys(&self, keys: &[String]) -> Result<(), RateLimitError> {
            self.calls.lock().unwrap().push(Call::Delete(keys.to_vec()));
            match self.delete_errors.lock().unwrap().pop_front() {
                Some(error) => Err(error),
                None => Ok(()),
            }
        }

        async fn find_keys(&self, pattern: &str) -> Result<Vec<String>, RateLimitError> {
            self.calls.lock().unwrap().push(Call::Find(pattern.to_owned()));
            Ok(self.found.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    /// Reply element shorthand used across the strategy tests.
    pub(crate) fn int(n: i64) -> ScriptValue {
        ScriptValue::Int(n)
    }

    pub(crate) fn text(s: &str) -> ScriptValue {
        ScriptValue::Text(s.to_owned())
    }
}
