//! Rate limit decisions and per-algorithm metadata
//!
//! Both types are immutable value objects: every constructor returns a
//! finished value and there are no mutating accessors. `with_metadata`
//! consumes the decision and hands back a new one.

use crate::Algorithm;
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Algorithm-specific details attached to a [`RateLimitDecision`].
///
/// Every field is optional; a field an algorithm does not produce stays
/// `None` and serializes as absent, never as zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RateLimitMetadata {
    /// Token Bucket: tokens left after this decision (fractional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<f64>,
    /// Leaky Bucket: queue depth after this decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_size: Option<u64>,
    /// Windowed algorithms: start of the observed window, seconds since
    /// the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_start: Option<u64>,
    /// Sliding Window Counter: requests counted in the previous window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_window_count: Option<u64>,
    /// Sliding Window Counter: requests counted in the current window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_window_count: Option<u64>,
}

impl RateLimitMetadata {
    /// Metadata for a Token Bucket decision.
    pub fn for_token_bucket(tokens: f64) -> Self {
        Self { tokens: Some(tokens), ..Self::default() }
    }

    /// Metadata for a Leaky Bucket decision.
    pub fn for_leaky_bucket(queue_size: u64) -> Self {
        Self { queue_size: Some(queue_size), ..Self::default() }
    }

    /// Metadata for a Sliding Window Log decision.
    pub fn for_sliding_window_log(window_start: u64) -> Self {
        Self { window_start: Some(window_start), ..Self::default() }
    }

    /// Metadata for a Sliding Window Counter decision.
    pub fn for_sliding_window_counter(
        previous_window_count: u64,
        current_window_count: u64,
        window_start: u64,
    ) -> Self {
        Self {
            previous_window_count: Some(previous_window_count),
            current_window_count: Some(current_window_count),
            window_start: Some(window_start),
            ..Self::default()
        }
    }
}

/// The outcome of one admission check.
///
/// `current` is the count representation meaningful to the algorithm that
/// produced the decision (consumed tokens, queue depth, window count or
/// weighted count); `remaining` is always derived as
/// `max(0, limit - current)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitDecision {
    allowed: bool,
    algorithm: Algorithm,
    current: u64,
    limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    reset_at: Option<SystemTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<RateLimitMetadata>,
}

impl RateLimitDecision {
    /// An admitted request.
    pub fn allowed(
        algorithm: Algorithm,
        current: u64,
        limit: u64,
        reset_at: Option<SystemTime>,
    ) -> Self {
        Self { allowed: true, algorithm, current, limit, reset_at, metadata: None }
    }

    /// A denied request.
    pub fn denied(
        algorithm: Algorithm,
        current: u64,
        limit: u64,
        reset_at: Option<SystemTime>,
    ) -> Self {
        Self { allowed: false, algorithm, current, limit, reset_at, metadata: None }
    }

    /// The decision the limiter substitutes when storage is unreachable:
    /// admitted, nothing counted, effectively no limit, no reset hint.
    pub fn fail_open(algorithm: Algorithm) -> Self {
        Self::allowed(algorithm, 0, u64::MAX, None)
    }

    /// Attach algorithm-specific metadata, returning a new decision.
    pub fn with_metadata(self, metadata: RateLimitMetadata) -> Self {
        Self { metadata: Some(metadata), ..self }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn is_limit_reached(&self) -> bool {
        !self.allowed
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Requests still available before the limit bites.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.current)
    }

    /// Advisory instant at which capacity is fully restored, when the
    /// algorithm can estimate one.
    pub fn reset_at(&self) -> Option<SystemTime> {
        self.reset_at
    }

    /// `reset_at` as whole seconds since the Unix epoch, the form the
    /// `X-RateLimit-Reset` header carries.
    pub fn reset_at_epoch_secs(&self) -> Option<u64> {
        self.reset_at
            .and_then(|at| at.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
    }

    pub fn metadata(&self) -> Option<&RateLimitMetadata> {
        self.metadata.as_ref()
    }
}

/// An absolute instant `seconds` past the Unix epoch.
pub(crate) fn epoch_secs(seconds: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(seconds)
}
