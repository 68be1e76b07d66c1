//! Strategy construction

use crate::strategy::{
    FixedWindowStrategy, LeakyBucketStrategy, SlidingWindowCounterStrategy,
    SlidingWindowLogStrategy, Strategy, TokenBucketStrategy,
};
use crate::{Algorithm, RateLimitError, ScriptExecutor, StrategyConfig};
use std::sync::Arc;

/// Builds strategies for the closed algorithm family.
///
/// The factory picks the config fields the requested kind needs and hands
/// them to the concrete constructor; constructor validation errors come
/// back unchanged as [`RateLimitError::Validation`].
#[derive(Clone)]
pub struct StrategyFactory {
    executor: Arc<dyn ScriptExecutor>,
}

impl StrategyFactory {
    pub fn new(executor: Arc<dyn ScriptExecutor>) -> Self {
        Self { executor }
    }

    pub fn create(
        &self,
        algorithm: Algorithm,
        config: &StrategyConfig,
    ) -> Result<Arc<dyn Strategy>, RateLimitError> {
        let executor = Arc::clone(&self.executor);
        let strategy: Arc<dyn Strategy> = match algorithm {
            Algorithm::TokenBucket => Arc::new(TokenBucketStrategy::new(
                executor,
                config.get_capacity(),
                config.get_refill_rate(),
            )?),
            Algorithm::LeakyBucket => Arc::new(LeakyBucketStrategy::new(
                executor,
                config.get_capacity(),
                config.get_leak_rate(),
            )?),
            Algorithm::FixedWindow => Arc::new(FixedWindowStrategy::new(
                executor,
                config.get_limit(),
                config.get_window_size(),
            )?),
            Algorithm::SlidingWindowLog => Arc::new(SlidingWindowLogStrategy::new(
                executor,
                config.get_limit(),
                config.get_window_size(),
            )?),
            Algorithm::SlidingWindowCounter => Arc::new(SlidingWindowCounterStrategy::new(
                executor,
                config.get_limit(),
                config.get_window_size(),
            )?),
        };
        Ok(strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testing::StubExecutor;

    #[test]
    fn creates_every_kind_from_defaults() {
        let factory = StrategyFactory::new(StubExecutor::new());
        let config = StrategyConfig::default();
        for algorithm in Algorithm::ALL {
            let strategy = factory.create(algorithm, &config).unwrap();
            assert_eq!(strategy.algorithm(), algorithm);
            assert!(!strategy.describe().is_empty());
        }
    }

    #[test]
    fn created_strategies_reflect_their_config() {
        let factory = StrategyFactory::new(StubExecutor::new());
        let config = StrategyConfig::default()
            .capacity(42)
            .unwrap()
            .limit(7)
            .unwrap()
            .window_size(15)
            .unwrap();

        let bucket = factory.create(Algorithm::TokenBucket, &config).unwrap();
        assert!(bucket.describe().contains("capacity=42"));

        let window = factory.create(Algorithm::FixedWindow, &config).unwrap();
        assert!(window.describe().contains("limit=7 per 15 seconds"));
    }
}
