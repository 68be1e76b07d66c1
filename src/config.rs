//! Strategy configuration with fail-fast validation

use crate::RateLimitError;

/// Validated configuration consumed by the strategy factory.
///
/// Every setter rejects invalid values at the point of assignment and
/// returns a [`RateLimitError::Validation`], so a config that reaches the
/// factory is known-good. Fields not relevant to an algorithm are simply
/// ignored by it (a token bucket never reads `limit`).
///
/// ```rust
/// use spillway::StrategyConfig;
///
/// let config = StrategyConfig::default()
///     .capacity(100)?
///     .refill_rate(25.0)?;
/// assert_eq!(config.get_capacity(), 100);
/// # Ok::<(), spillway::RateLimitError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyConfig {
    capacity: u32,
    refill_rate: f64,
    leak_rate: f64,
    limit: u32,
    window_size: u64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_rate: 1.0,
            leak_rate: 1.0,
            limit: 10,
            window_size: 60,
        }
    }
}

impl StrategyConfig {
    /// Maximum bucket capacity (Token Bucket and Leaky Bucket).
    pub fn capacity(mut self, capacity: u32) -> Result<Self, RateLimitError> {
        if capacity == 0 {
            return Err(RateLimitError::validation(format!(
                "Capacity must be positive: {}",
                capacity
            )));
        }
        self.capacity = capacity;
        Ok(self)
    }

    /// Tokens refilled per second (Token Bucket).
    pub fn refill_rate(mut self, refill_rate: f64) -> Result<Self, RateLimitError> {
        if !(refill_rate.is_finite() && refill_rate > 0.0) {
            return Err(RateLimitError::validation(format!(
                "Refill rate must be positive: {}",
                refill_rate
            )));
        }
        self.refill_rate = refill_rate;
        Ok(self)
    }

    /// Items drained per second (Leaky Bucket).
    pub fn leak_rate(mut self, leak_rate: f64) -> Result<Self, RateLimitError> {
        if !(leak_rate.is_finite() && leak_rate > 0.0) {
            return Err(RateLimitError::validation(format!(
                "Leak rate must be positive: {}",
                leak_rate
            )));
        }
        self.leak_rate = leak_rate;
        Ok(self)
    }

    /// Maximum requests per window (the windowed algorithms).
    pub fn limit(mut self, limit: u32) -> Result<Self, RateLimitError> {
        if limit == 0 {
            return Err(RateLimitError::validation(format!("Limit must be positive: {}", limit)));
        }
        self.limit = limit;
        Ok(self)
    }

    /// Window length in seconds (the windowed algorithms).
    pub fn window_size(mut self, window_size: u64) -> Result<Self, RateLimitError> {
        if window_size == 0 {
            return Err(RateLimitError::validation(format!(
                "Window size must be positive: {}",
                window_size
            )));
        }
        self.window_size = window_size;
        Ok(self)
    }

    pub fn get_capacity(&self) -> u32 {
        self.capacity
    }

    pub fn get_refill_rate(&self) -> f64 {
        self.refill_rate
    }

    pub fn get_leak_rate(&self) -> f64 {
        self.leak_rate
    }

    pub fn get_limit(&self) -> u32 {
        self.limit
    }

    pub fn get_window_size(&self) -> u64 {
        self.window_size
    }
}
