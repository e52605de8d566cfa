//! Configuration for the queue and the recovery manager.
//!
//! Both configs are plain data with `with_*` builders. With the `serde`
//! feature they can be loaded from whatever format the application already
//! uses for its settings.
//!
//! ```rust
//! use std::time::Duration;
//! use tidewater::{QueueConfig, RecoveryConfig, RetryPolicy};
//!
//! let queue = QueueConfig::default()
//!     .with_retry_policy(RetryPolicy::linear(Duration::from_millis(250)).with_max_retries(5))
//!     .with_attempt_timeout(Duration::from_secs(10));
//! assert_eq!(queue.retry.max_retries(), 5);
//!
//! let recovery = RecoveryConfig::default().with_max_error_log_size(20);
//! assert_eq!(recovery.max_recovery_attempts, 3);
//! assert_eq!(recovery.max_error_log_size, 20);
//! ```

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Recovery attempts allowed per key by default.
pub const DEFAULT_MAX_RECOVERY_ATTEMPTS: u32 = 3;

/// Error records kept by default.
pub const DEFAULT_MAX_ERROR_LOG_SIZE: usize = 100;

/// Settings for an [`OperationQueue`](crate::OperationQueue).
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct QueueConfig {
    /// How failed attempts are retried.
    pub retry: RetryPolicy,
    /// Upper bound on a single attempt. `None` means attempts may run
    /// forever, and a hung operation blocks every item behind it.
    pub attempt_timeout: Option<Duration>,
}

impl QueueConfig {
    /// Default settings: [`RetryPolicy::default`], no attempt timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Fail any attempt that runs longer than `timeout` with a `Timeout` error.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }
}

/// Settings for a [`RecoveryManager`](crate::RecoveryManager).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RecoveryConfig {
    /// Recovery attempts allowed per `(operation type, identity)` key.
    pub max_recovery_attempts: u32,
    /// Error records retained before the oldest is evicted.
    pub max_error_log_size: usize,
    /// Context keys consulted, in order, for the identity part of a
    /// recovery key. The first one present wins; `"unknown"` otherwise.
    pub identity_fields: Vec<String>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            max_recovery_attempts: DEFAULT_MAX_RECOVERY_ATTEMPTS,
            max_error_log_size: DEFAULT_MAX_ERROR_LOG_SIZE,
            identity_fields: vec!["config_id".to_string(), "nickname".to_string()],
        }
    }
}

impl RecoveryConfig {
    /// Default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-key recovery budget.
    pub fn with_max_recovery_attempts(mut self, n: u32) -> Self {
        self.max_recovery_attempts = n;
        self
    }

    /// Set the error journal capacity.
    pub fn with_max_error_log_size(mut self, n: usize) -> Self {
        self.max_error_log_size = n;
        self
    }

    /// Replace the identity fields.
    pub fn with_identity_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identity_fields = fields.into_iter().map(Into::into).collect();
        self
    }
}
