//! Error types for the rate-limiting core
use std::fmt;
use std::sync::Arc;

/// Unified error type for the rate-limiting core.
///
/// Exactly two kinds flow through the crate:
///
/// - [`Validation`](RateLimitError::Validation): invalid configuration or
///   strategy parameters, raised at the point of assignment. Messages are
///   fixed strings produced by this crate and are safe to surface to
///   clients.
/// - [`Storage`](RateLimitError::Storage): any failure on the key-value
///   store path (connection, script execution, scan, deadline). The limiter
///   recovers from these locally (fail-open); callers only see one when they
///   talk to the executor directly.
#[derive(Debug, Clone)]
pub enum RateLimitError {
    /// A parameter failed validation. The message is the complete,
    /// client-safe description.
    Validation(String),
    /// A storage operation failed. `source` carries the underlying driver
    /// error when there is one.
    Storage {
        message: String,
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },
}

impl RateLimitError {
    /// Construct a validation error from a client-safe message.
    pub fn validation(message: impl Into<String>) -> Self {
        RateLimitError::Validation(message.into())
    }

    /// Construct a storage error with no underlying cause.
    pub fn storage(message: impl Into<String>) -> Self {
        RateLimitError::Storage { message: message.into(), source: None }
    }

    /// Construct a storage error wrapping the original cause.
    pub fn storage_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        RateLimitError::Storage { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Check if this error is a validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this error is a storage failure.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(message) => write!(f, "{}", message),
            Self::Storage { message, source: Some(source) } => {
                write!(f, "storage failure: {}: {}", message, source)
            }
            Self::Storage { message, source: None } => {
                write!(f, "storage failure: {}", message)
            }
        }
    }
}

impl std::error::Error for RateLimitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage { source: Some(source), .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}
