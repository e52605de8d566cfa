//! The error journal: records and the bounded buffer that holds them.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{OperationError, Severity};

/// Free-form key/value context attached to an [`ErrorRecord`].
///
/// Keys are kept sorted so records print the same way every time.
///
/// ```
/// use tidewater::ErrorContext;
///
/// let ctx = ErrorContext::new()
///     .with("config_id", "cfg-42")
///     .with("nickname", "alice");
///
/// assert_eq!(ctx.get("config_id"), Some("cfg-42"));
/// assert_eq!(ctx.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ErrorContext {
    entries: BTreeMap<String, String>,
}

impl ErrorContext {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.entries.insert(key.into(), value.to_string());
    }

    /// The value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for ErrorContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ctx = ErrorContext::new();
        for (k, v) in iter {
            ctx.insert(k, v);
        }
        ctx
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        f.write_str("}")
    }
}

/// One entry in the error journal.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorRecord {
    /// Random identifier.
    pub id: Uuid,
    /// When the error was logged.
    pub timestamp: DateTime<Utc>,
    /// Label of the operation that failed.
    pub operation_type: String,
    /// The failure, including its context trail.
    pub error: OperationError,
    /// Caller-supplied context.
    pub context: ErrorContext,
    /// Derived from the error's kind.
    pub severity: Severity,
}

impl ErrorRecord {
    pub(crate) fn new(operation_type: String, error: OperationError, context: ErrorContext) -> Self {
        ErrorRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity: error.severity(),
            operation_type,
            error,
            context,
        }
    }
}

/// Bounded journal, newest first.
#[derive(Debug)]
pub(crate) struct ErrorLog {
    records: VecDeque<ErrorRecord>,
    capacity: usize,
}

impl ErrorLog {
    pub(crate) fn new(capacity: usize) -> Self {
        ErrorLog {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Prepend `record`, evicting the oldest records beyond capacity.
    pub(crate) fn push(&mut self, record: ErrorRecord) {
        self.records.push_front(record);
        self.records.truncate(self.capacity);
    }

    pub(crate) fn recent(&self, limit: usize) -> Vec<ErrorRecord> {
        self.records.iter().take(limit).cloned().collect()
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}
