//! Error types for queued operations.
//!
//! Every failure that flows through the queue or the recovery manager is an
//! [`OperationError`]: a closed [`ErrorKind`] assigned where the error is
//! constructed, a message, and a context trail that records what was being
//! attempted as the error propagated outward.
//!
//! # Examples
//!
//! ```
//! use tidewater::{ErrorKind, OperationError, Severity};
//!
//! let err = OperationError::new(ErrorKind::Network, "connection reset")
//!     .context("writing user config")
//!     .context("saving profile");
//!
//! assert_eq!(err.message(), "connection reset");
//! assert_eq!(err.context_trail().len(), 2);
//! assert_eq!(err.severity(), Severity::Medium);
//! assert!(err.is_transient());
//! ```

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::io;

use crate::retry::RetryExhausted;

/// Classification of an operation failure.
///
/// The kind is chosen by whoever constructs the error. Severity and
/// retryability are derived from it, never from the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ErrorKind {
    /// Unrecoverable failure; the store may be in a bad state.
    Fatal,
    /// Input rejected by the store.
    Validation,
    /// Stored data is missing or malformed.
    Data,
    /// Transport-level failure.
    Network,
    /// The operation did not finish in time.
    Timeout,
    /// The operation was withdrawn before it could finish.
    Cancelled,
    /// Anything else.
    Other,
}

impl ErrorKind {
    /// Severity assigned to errors of this kind.
    pub fn severity(self) -> Severity {
        match self {
            ErrorKind::Fatal => Severity::Critical,
            ErrorKind::Validation | ErrorKind::Data => Severity::High,
            ErrorKind::Network | ErrorKind::Timeout => Severity::Medium,
            ErrorKind::Cancelled | ErrorKind::Other => Severity::Low,
        }
    }

    /// Returns true for kinds that may succeed if simply tried again.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::Timeout)
    }

    /// Stable lowercase name, used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Fatal => "fatal",
            ErrorKind::Validation => "validation",
            ErrorKind::Data => "data",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How serious a logged error is.
///
/// Ordered from least to most severe, so `Severity::High > Severity::Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Severity {
    /// Cosmetic or expected failures.
    Low,
    /// Usually transient failures.
    Medium,
    /// Failures that indicate bad input or bad data.
    High,
    /// Failures that need immediate attention.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// A failed operation: kind, message and a trail of context.
///
/// The context trail is ordered inner to outer and doubles as the cause
/// chain reported in the error journal.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OperationError {
    kind: ErrorKind,
    message: String,
    context: Vec<String>,
}

impl OperationError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        OperationError {
            kind,
            message: message.into(),
            context: Vec::new(),
        }
    }

    /// Create an error whose kind is inferred from its message.
    ///
    /// Intended for adapting untyped errors (plain strings coming out of a
    /// third-party store) at the point they enter the queue. Matching is
    /// case-insensitive and checks, in order: "critical"/"fatal",
    /// "validation"/"data", "network"/"timeout".
    ///
    /// ```
    /// use tidewater::{ErrorKind, OperationError};
    ///
    /// assert_eq!(OperationError::classified("fatal: disk gone").kind(), ErrorKind::Fatal);
    /// assert_eq!(OperationError::classified("bad data in row 3").kind(), ErrorKind::Data);
    /// assert_eq!(OperationError::classified("request timeout").kind(), ErrorKind::Timeout);
    /// assert_eq!(OperationError::classified("boom").kind(), ErrorKind::Other);
    /// ```
    pub fn classified(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let kind = if lower.contains("critical") || lower.contains("fatal") {
            ErrorKind::Fatal
        } else if lower.contains("validation") {
            ErrorKind::Validation
        } else if lower.contains("data") {
            ErrorKind::Data
        } else if lower.contains("network") {
            ErrorKind::Network
        } else if lower.contains("timeout") {
            ErrorKind::Timeout
        } else {
            ErrorKind::Other
        };
        Self::new(kind, message)
    }

    /// Add a context layer.
    pub fn context(mut self, msg: impl Into<String>) -> Self {
        self.context.push(msg.into());
        self
    }

    /// The error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The original message, without context.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Context messages in the order they were added.
    pub fn context_trail(&self) -> &[String] {
        &self.context
    }

    /// Shorthand for `self.kind().severity()`.
    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }

    /// Shorthand for `self.kind().is_transient()`.
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// A `Fatal` error describing a caught panic in `what`.
    pub(crate) fn from_panic(what: &str, payload: Box<dyn Any + Send>) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        OperationError::new(ErrorKind::Fatal, format!("{} panicked: {}", what, detail))
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)?;

        for ctx in &self.context {
            write!(f, "\n  -> {}", ctx)?;
        }

        Ok(())
    }
}

impl StdError for OperationError {}

impl From<&str> for OperationError {
    fn from(message: &str) -> Self {
        OperationError::new(ErrorKind::Other, message)
    }
}

impl From<String> for OperationError {
    fn from(message: String) -> Self {
        OperationError::new(ErrorKind::Other, message)
    }
}

impl From<io::Error> for OperationError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::Timeout,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::AddrNotAvailable => ErrorKind::Network,
            io::ErrorKind::InvalidInput => ErrorKind::Validation,
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof | io::ErrorKind::NotFound => {
                ErrorKind::Data
            }
            _ => ErrorKind::Other,
        };
        OperationError::new(kind, err.to_string())
    }
}

/// Why a [`Completion`](crate::Completion) did not yield a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The operation failed and the retry policy gave up.
    Rejected(RetryExhausted<OperationError>),
    /// The item was still pending when the queue was cleared.
    Cleared,
    /// The queue's worker went away before settling the item.
    Closed,
}

impl QueueError {
    /// The operation's final error, if the item was rejected by the policy.
    pub fn operation_error(&self) -> Option<&OperationError> {
        match self {
            QueueError::Rejected(exhausted) => Some(exhausted.error()),
            QueueError::Cleared | QueueError::Closed => None,
        }
    }

    /// Number of attempts made before rejection, if any were made.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            QueueError::Rejected(exhausted) => Some(exhausted.attempts),
            QueueError::Cleared | QueueError::Closed => None,
        }
    }

    /// Returns true if the item was dropped by `clear`.
    pub fn is_cleared(&self) -> bool {
        matches!(self, QueueError::Cleared)
    }

    /// Returns true if the worker disappeared.
    pub fn is_closed(&self) -> bool {
        matches!(self, QueueError::Closed)
    }

    /// Convert into an [`OperationError`], e.g. to hand to the recovery manager.
    pub fn into_operation_error(self) -> OperationError {
        match self {
            QueueError::Rejected(exhausted) => exhausted.into_error(),
            QueueError::Cleared => OperationError::new(ErrorKind::Cancelled, "queue cleared"),
            QueueError::Closed => OperationError::new(ErrorKind::Cancelled, "queue closed"),
        }
    }
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Rejected(exhausted) => write!(f, "{}", exhausted),
            QueueError::Cleared => f.write_str("queue cleared"),
            QueueError::Closed => {
                f.write_str("queue worker stopped before the operation was settled")
            }
        }
    }
}

impl StdError for QueueError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            QueueError::Rejected(exhausted) => Some(exhausted),
            QueueError::Cleared | QueueError::Closed => None,
        }
    }
}
