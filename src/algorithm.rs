//! The closed set of rate-limiting algorithms

use crate::RateLimitError;
use serde::Serialize;
use std::str::FromStr;

/// The five interchangeable rate-limiting algorithms.
///
/// The family is closed: adding a kind means adding a variant here, a
/// strategy module, and a factory arm. No open extension point exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Algorithm {
    TokenBucket,
    LeakyBucket,
    FixedWindow,
    SlidingWindowLog,
    SlidingWindowCounter,
}

impl Algorithm {
    /// Every algorithm, in a stable order.
    pub const ALL: [Algorithm; 5] = [
        Algorithm::TokenBucket,
        Algorithm::LeakyBucket,
        Algorithm::FixedWindow,
        Algorithm::SlidingWindowLog,
        Algorithm::SlidingWindowCounter,
    ];

    /// Wire tag, as carried in decisions and the `X-RateLimit-Algorithm`
    /// header.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "TOKEN_BUCKET",
            Algorithm::LeakyBucket => "LEAKY_BUCKET",
            Algorithm::FixedWindow => "FIXED_WINDOW",
            Algorithm::SlidingWindowLog => "SLIDING_WINDOW_LOG",
            Algorithm::SlidingWindowCounter => "SLIDING_WINDOW_COUNTER",
        }
    }

    /// Segment used in the persisted key namespace
    /// (`rate_limit:<segment>:<identifier>:<suffix>`). Stable; changing it
    /// orphans live counter state.
    pub const fn key_segment(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::LeakyBucket => "leaky_bucket",
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::SlidingWindowLog => "sliding_window_log",
            Algorithm::SlidingWindowCounter => "sliding_window_counter",
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = RateLimitError;

    /// Parse either the wire tag or the key segment.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TOKEN_BUCKET" | "token_bucket" => Ok(Algorithm::TokenBucket),
            "LEAKY_BUCKET" | "leaky_bucket" => Ok(Algorithm::LeakyBucket),
            "FIXED_WINDOW" | "fixed_window" => Ok(Algorithm::FixedWindow),
            "SLIDING_WINDOW_LOG" | "sliding_window_log" => Ok(Algorithm::SlidingWindowLog),
            "SLIDING_WINDOW_COUNTER" | "sliding_window_counter" => {
                Ok(Algorithm::SlidingWindowCounter)
            }
            other => Err(RateLimitError::validation(format!(
                "Unknown rate limit algorithm: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tags_are_screaming_snake() {
        assert_eq!(Algorithm::TokenBucket.as_str(), "TOKEN_BUCKET");
        assert_eq!(Algorithm::SlidingWindowCounter.as_str(), "SLIDING_WINDOW_COUNTER");
    }

    #[test]
    fn key_segments_are_snake() {
        assert_eq!(Algorithm::LeakyBucket.key_segment(), "leaky_bucket");
        assert_eq!(Algorithm::SlidingWindowLog.key_segment(), "sliding_window_log");
    }

    #[test]
    fn parses_both_spellings() {
        assert_eq!("FIXED_WINDOW".parse::<Algorithm>().unwrap(), Algorithm::FixedWindow);
        assert_eq!("fixed_window".parse::<Algorithm>().unwrap(), Algorithm::FixedWindow);
    }

    #[test]
    fn rejects_unknown_names_as_validation() {
        let err = "gcra".parse::<Algorithm>().unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("gcra"));
    }

    #[test]
    fn all_is_exhaustive_and_distinct() {
        let mut segments: Vec<_> = Algorithm::ALL.iter().map(|a| a.key_segment()).collect();
        segments.sort_unstable();
        segments.dedup();
        assert_eq!(segments.len(), 5);
    }

    #[test]
    fn serializes_as_wire_tag() {
        let json = serde_json::to_string(&Algorithm::TokenBucket).unwrap();
        assert_eq!(json, "\"TOKEN_BUCKET\"");
    }
}
