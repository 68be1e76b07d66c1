//! Convenient re-exports for common Spillway types.
pub use crate::{
    middleware::{HeaderIdentifier, IdentifierExtractor, RateLimitLayer},
    strategy::Strategy,
    Algorithm, RateLimitDecision, RateLimitError, RateLimitMetadata, RateLimiter,
    RedisScriptExecutor, ScriptExecutor, StrategyConfig,
};
