//! Error types for pool operations
use std::time::Duration;

use thiserror::Error;

use crate::aggregate::AggregateError;

/// Type-erased error produced by a [`Factory`](crate::Factory).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// An operation did not complete within its allotted time.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Operation timed out after {}ms", .timeout.as_millis())]
pub struct TimeoutError {
    timeout: Duration,
}

impl TimeoutError {
    /// Create a timeout error for the given budget.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The budget that was exceeded.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Errors surfaced by the pool
#[derive(Error, Debug)]
pub enum Error {
    /// Pool or factory configuration is invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },

    /// Acquire did not complete within `acquire_timeout`
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// The factory failed to create a resource
    #[error("Resource creation failed for pool '{pool}': {source}")]
    Create {
        /// Pool name, or `"unnamed"`
        pool: String,
        /// The factory's error, untouched
        #[source]
        source: BoxError,
    },

    /// Acquire attempted after `drain` started
    #[error("pool is draining and cannot accept work")]
    Draining,

    /// One or more destroy calls failed during `destroy_all_now`
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// The request was abandoned by the pool before it could be served
    #[error("pool abandoned the request before it could be served")]
    Closed,
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Wrap a factory creation error.
    pub(crate) fn create(pool: Option<&str>, source: BoxError) -> Self {
        Self::Create {
            pool: pool.unwrap_or("unnamed").to_string(),
            source,
        }
    }

    /// Check if retrying the operation may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Create { .. })
    }

    /// Whether this is an acquire timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
