//! Testing utilities for code built on the queue.
//!
//! This module provides instrumentation for asserting ordering and
//! concurrency properties, plus assertion macros for completions.
//!
//! # Examples
//!
//! ## Recording events in order
//!
//! ```rust
//! use tidewater::testing::CallLog;
//!
//! let log = CallLog::new();
//! log.record("start A");
//! log.record("end A");
//! assert_eq!(log.entries(), vec!["start A", "end A"]);
//! assert_eq!(log.position("end A"), Some(1));
//! ```
//!
//! ## Measuring concurrency
//!
//! ```rust
//! use tidewater::testing::ConcurrencyGauge;
//!
//! let gauge = ConcurrencyGauge::new();
//! {
//!     let _guard = gauge.enter();
//!     assert_eq!(gauge.active(), 1);
//! }
//! assert_eq!(gauge.active(), 0);
//! assert_eq!(gauge.max_observed(), 1);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// A shared, ordered list of string events.
///
/// Cloning is cheap; all clones append to the same list.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.into());
    }

    /// Snapshot of all events so far.
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of events equal to `entry`.
    pub fn count(&self, entry: &str) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.as_str() == entry)
            .count()
    }

    /// Index of the first event equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .position(|e| e.as_str() == entry)
    }

    /// Number of events recorded.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tracks how many sections are executing at once.
///
/// Wrap the body of an operation in [`enter`](Self::enter); afterwards
/// [`max_observed`](Self::max_observed) reports the peak overlap.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyGauge {
    active: Arc<AtomicUsize>,
    max: Arc<AtomicUsize>,
}

/// Marks one active section; leaving scope ends it.
#[derive(Debug)]
pub struct GaugeGuard {
    active: Arc<AtomicUsize>,
}

impl ConcurrencyGauge {
    /// Create a gauge with nothing active.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an active section.
    pub fn enter(&self) -> GaugeGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        GaugeGuard {
            active: self.active.clone(),
        }
    }

    /// Sections currently active.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously active sections seen.
    pub fn max_observed(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Assert that a completion result is `Ok`, yielding the value.
///
/// # Example
///
/// ```rust
/// use tidewater::{assert_resolved, QueueError};
///
/// let result: Result<i32, QueueError> = Ok(42);
/// assert_eq!(assert_resolved!(result), 42);
/// ```
#[macro_export]
macro_rules! assert_resolved {
    ($result:expr) => {
        match $result {
            ::std::result::Result::Ok(value) => value,
            ::std::result::Result::Err(e) => {
                panic!("Expected resolved completion, got error: {}", e);
            }
        }
    };
}

/// Assert that a completion result was rejected by the retry policy with
/// the given message, yielding the [`QueueError`](crate::QueueError).
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tidewater::{assert_rejected, OperationError, QueueError, RetryExhausted};
///
/// let result: Result<i32, QueueError> = Err(QueueError::Rejected(
///     RetryExhausted::new(OperationError::from("boom"), 4, Duration::ZERO),
/// ));
/// let err = assert_rejected!(result, "boom");
/// assert_eq!(err.attempts(), Some(4));
/// ```
#[macro_export]
macro_rules! assert_rejected {
    ($result:expr, $message:expr) => {
        match $result {
            ::std::result::Result::Err(e) => {
                match e.operation_error() {
                    ::std::option::Option::Some(op) => assert_eq!(op.message(), $message),
                    ::std::option::Option::None => {
                        panic!("Expected rejection with {:?}, got: {}", $message, e)
                    }
                }
                e
            }
            ::std::result::Result::Ok(v) => {
                panic!("Expected rejection with {:?}, got value: {:?}", $message, v);
            }
        }
    };
}
