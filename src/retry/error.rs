//! Error types for retry operations.

use std::time::Duration;

/// Error returned when the retry policy stops retrying an operation.
///
/// Contains the final error along with metadata about the retry sequence.
/// This is the payload of [`QueueError::Rejected`](crate::QueueError::Rejected).
///
/// # Examples
///
/// ```rust
/// use tidewater::{OperationError, RetryExhausted};
/// use std::time::Duration;
///
/// let exhausted = RetryExhausted::new(OperationError::from("boom"), 4, Duration::from_secs(6));
///
/// assert_eq!(exhausted.error().message(), "boom");
/// assert_eq!(exhausted.attempts, 4); // 1 initial + 3 retries
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted<E> {
    /// The error from the final attempt.
    pub final_error: E,
    /// Total number of attempts made (initial + retries).
    pub attempts: u32,
    /// Time from submission to rejection.
    pub total_duration: Duration,
}

impl<E> RetryExhausted<E> {
    /// Create a new RetryExhausted error.
    pub fn new(final_error: E, attempts: u32, total_duration: Duration) -> Self {
        Self {
            final_error,
            attempts,
            total_duration,
        }
    }

    /// Extract the final error, discarding metadata.
    pub fn into_error(self) -> E {
        self.final_error
    }

    /// Get a reference to the final error.
    pub fn error(&self) -> &E {
        &self.final_error
    }
}

impl<E: std::fmt::Display> std::fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "retry exhausted after {} attempts ({:?}): {}",
            self.attempts, self.total_duration, self.final_error
        )
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryExhausted<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.final_error)
    }
}
