//! The limiter service
//!
//! [`RateLimiter`] is the entry point host applications hold: it caches one
//! strategy instance per algorithm, dispatches checks and resets, and
//! applies fail-open semantics when storage misbehaves: availability over
//! correctness, a limiter outage must never become an API outage.

use crate::factory::StrategyFactory;
use crate::strategy::Strategy;
use crate::{Algorithm, RateLimitDecision, RateLimitError, ScriptExecutor, StrategyConfig};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Shared, concurrency-safe rate limiter over all five algorithms.
///
/// Strategies are constructed lazily on first use of an algorithm kind and
/// cached for the life of the process; the cache guarantees at most one
/// construction per kind even under concurrent first use, and lookups for
/// already-constructed kinds take no exclusive lock.
///
/// ```rust,no_run
/// use spillway::{Algorithm, RateLimiter, RedisScriptExecutor};
/// use std::sync::Arc;
///
/// # async fn demo() -> Result<(), spillway::RateLimitError> {
/// let executor = Arc::new(RedisScriptExecutor::connect("redis://127.0.0.1/").await?);
/// let limiter = RateLimiter::new(executor);
///
/// let decision = limiter.check(Algorithm::TokenBucket, "client-7").await?;
/// if decision.is_allowed() {
///     // serve the request
/// }
/// # Ok(())
/// # }
/// ```
pub struct RateLimiter {
    factory: StrategyFactory,
    strategies: DashMap<Algorithm, Arc<dyn Strategy>>,
    configs: HashMap<Algorithm, StrategyConfig>,
}

impl RateLimiter {
    /// A limiter using the per-algorithm default configuration.
    pub fn new(executor: Arc<dyn ScriptExecutor>) -> Self {
        Self {
            factory: StrategyFactory::new(executor),
            strategies: DashMap::new(),
            configs: HashMap::new(),
        }
    }

    /// Override the configuration used when `algorithm` is first
    /// constructed. Has no effect on a strategy that was already built.
    pub fn with_config(mut self, algorithm: Algorithm, config: StrategyConfig) -> Self {
        self.configs.insert(algorithm, config);
        self
    }

    /// Decide whether one request from `identifier` is admitted under
    /// `algorithm`.
    ///
    /// Storage failures are logged and converted into an admitted
    /// fail-open decision; the only error this returns is a
    /// [`Validation`](RateLimitError::Validation) raised while lazily
    /// constructing the strategy. Panics (programming errors, memory
    /// exhaustion) propagate unchanged.
    pub async fn check(
        &self,
        algorithm: Algorithm,
        identifier: &str,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let strategy = self.strategy(algorithm)?;
        match strategy.check(identifier).await {
            Ok(decision) => {
                debug!(
                    %algorithm,
                    identifier,
                    allowed = decision.is_allowed(),
                    current = decision.current(),
                    "rate limit check"
                );
                Ok(decision)
            }
            Err(cause) => {
                error!(%algorithm, identifier, %cause, "rate limit check failed, admitting");
                Ok(RateLimitDecision::fail_open(algorithm))
            }
        }
    }

    /// Discard all counter state for `(algorithm, identifier)`.
    ///
    /// Storage failures are logged and swallowed; a failed reset must not
    /// cascade to the caller. Idempotent: resetting a never-seen
    /// identifier is a no-op.
    pub async fn reset(
        &self,
        algorithm: Algorithm,
        identifier: &str,
    ) -> Result<(), RateLimitError> {
        let strategy = self.strategy(algorithm)?;
        match strategy.reset(identifier).await {
            Ok(()) => {
                info!(%algorithm, identifier, "rate limit reset");
                Ok(())
            }
            Err(cause) => {
                error!(%algorithm, identifier, %cause, "rate limit reset failed");
                Ok(())
            }
        }
    }

    /// Human description of the strategy serving `algorithm`, constructing
    /// it if needed.
    pub fn describe(&self, algorithm: Algorithm) -> Result<String, RateLimitError> {
        Ok(self.strategy(algorithm)?.describe())
    }

    /// Look up the cached strategy or construct it exactly once.
    pub(crate) fn strategy(
        &self,
        algorithm: Algorithm,
    ) -> Result<Arc<dyn Strategy>, RateLimitError> {
        if let Some(strategy) = self.strategies.get(&algorithm) {
            return Ok(Arc::clone(&strategy));
        }
        // Entry holds the shard writer, so losers of the race wait here
        // and then take the Occupied arm. Construction is pure (no I/O).
        match self.strategies.entry(algorithm) {
            Entry::Occupied(occupied) => Ok(Arc::clone(occupied.get())),
            Entry::Vacant(vacant) => {
                let config = self.configs.get(&algorithm).cloned().unwrap_or_default();
                let strategy = self.factory.create(algorithm, &config)?;
                vacant.insert(Arc::clone(&strategy));
                Ok(strategy)
            }
        }
    }
}
