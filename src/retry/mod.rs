//! Retry decisions for queued operations.
//!
//! A [`RetryPolicy`] is pure data. Given how many retries an operation has
//! already used and the error it just failed with, [`RetryPolicy::decide`]
//! answers "retry after this delay" or "give up". The queue does the
//! sleeping; the policy never does.
//!
//! # Quick Start
//!
//! ```rust
//! use tidewater::{OperationError, RetryDecision, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::linear(Duration::from_millis(100)).with_max_retries(2);
//! let err = OperationError::from("write failed");
//!
//! assert_eq!(policy.decide(0, &err), RetryDecision::Retry { delay: Duration::from_millis(100) });
//! assert_eq!(policy.decide(1, &err), RetryDecision::Retry { delay: Duration::from_millis(200) });
//! assert_eq!(policy.decide(2, &err), RetryDecision::GiveUp);
//! ```
//!
//! # Retry Strategies
//!
//! - **Constant**: Fixed delay between retries
//! - **Linear**: Delay increases linearly (100ms, 200ms, 300ms, ...), the default
//! - **Exponential**: Delay doubles each retry (100ms, 200ms, 400ms, ...)
//! - **Fibonacci**: Delay follows Fibonacci sequence
//!
//! # Jitter Support
//!
//! Enable the `jitter` feature to randomize delays:
//!
//! ```toml
//! tidewater = { version = "...", features = ["jitter"] }
//! ```
//!
//! # Which errors are retried
//!
//! By default every failure is retried until the bound is reached.
//! [`RetryPolicy::transient_only`] limits retries to `Network` and `Timeout`
//! errors, so validation failures are rejected immediately.

mod error;
mod policy;

pub use error::RetryExhausted;
pub use policy::{
    JitterStrategy, RetryDecision, RetryOn, RetryPolicy, RetryStrategy, DEFAULT_BASE_DELAY,
    DEFAULT_MAX_RETRIES,
};

#[cfg(test)]
mod tests;
