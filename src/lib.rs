#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Spillway
//!
//! Distributed rate limiting for horizontally scaled services: five
//! interchangeable algorithms whose counter state lives in a shared Redis
//! instance, with every read-decide-write step executed atomically as a
//! server-side Lua script. Application instances share one source of truth
//! without cross-instance locks, and without synchronized clocks: every
//! script takes "now" from the store's own clock.
//!
//! ## Features
//!
//! - **Five algorithms**: Token Bucket, Leaky Bucket, Fixed Window,
//!   Sliding Window Log, Sliding Window Counter
//! - **Atomic decisions** via cached server-side scripts; one round trip
//!   per check
//! - **Fail-open**: a storage outage admits traffic instead of serving 500s
//! - **Tower middleware** emitting the standard `X-RateLimit-*` headers
//! - **Non-blocking key management**: cursor-based SCAN, never a full
//!   keyspace sweep
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use spillway::{Algorithm, RateLimiter, RedisScriptExecutor, StrategyConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), spillway::RateLimitError> {
//!     let executor = Arc::new(RedisScriptExecutor::connect("redis://127.0.0.1/").await?);
//!
//!     let limiter = RateLimiter::new(executor).with_config(
//!         Algorithm::TokenBucket,
//!         StrategyConfig::default().capacity(100)?.refill_rate(50.0)?,
//!     );
//!
//!     let decision = limiter.check(Algorithm::TokenBucket, "client-7").await?;
//!     if decision.is_allowed() {
//!         println!("admitted, {} remaining", decision.remaining());
//!     } else {
//!         println!("denied, retry at {:?}", decision.reset_at());
//!     }
//!     Ok(())
//! }
//! ```

pub mod algorithm;
pub mod config;
pub mod decision;
pub mod error;
pub mod executor;
pub mod factory;
pub mod limiter;
pub mod middleware;
pub mod prelude;
pub mod strategy;

// Re-exports
pub use algorithm::Algorithm;
pub use config::StrategyConfig;
pub use decision::{RateLimitDecision, RateLimitMetadata};
pub use error::RateLimitError;
pub use executor::{RedisScriptExecutor, ScriptExecutor, ScriptValue};
pub use factory::StrategyFactory;
pub use limiter::RateLimiter;
pub use middleware::{HeaderIdentifier, IdentifierExtractor, RateLimitLayer, RateLimitService};
