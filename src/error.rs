//! Error types for the Turnstile service.

use thiserror::Error;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors, raised at load time
    #[error("Configuration error: {0}")]
    Config(String),

    /// The caller has no free slot left for the resolved policy
    #[error("Too many requests, retry after {reset_secs}s")]
    ThrottlingExceeded {
        /// Seconds until the earliest live slot frees up
        reset_secs: u64,
    },

    /// The backing store could not be read or written
    #[error("Throttle store unavailable: {0}")]
    StoreUnavailable(String),

    /// Malformed decision request on the wire
    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TurnstileError {
    /// Whether this error is a throttling rejection rather than a failure.
    pub fn is_throttled(&self) -> bool {
        matches!(self, TurnstileError::ThrottlingExceeded { .. })
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttling_exceeded_message() {
        let err = TurnstileError::ThrottlingExceeded { reset_secs: 42 };
        assert!(err.is_throttled());
        assert_eq!(err.to_string(), "Too many requests, retry after 42s");
    }

    #[test]
    fn test_store_unavailable_is_not_throttled() {
        let err = TurnstileError::StoreUnavailable("connection refused".to_string());
        assert!(!err.is_throttled());
    }
}
