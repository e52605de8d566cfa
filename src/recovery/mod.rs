//! Bounded recovery attempts and an error journal.
//!
//! The [`RecoveryManager`] is used by callers after the queue has given up
//! on an operation. It keeps two pieces of state behind one lock:
//!
//! - a counter per [`RecoveryKey`], so an alternate strategy for the same
//!   record is tried at most `max_recovery_attempts` times until one
//!   succeeds;
//! - a bounded journal of [`ErrorRecord`]s, newest first.
//!
//! Nothing here returns an error or panics outward. Failures are reported
//! as `false` / [`RecoveryOutcome`] and written to the journal. A recovery
//! function signals success through [`RecoveryResult`], so one returning
//! `Ok(false)` is a failed attempt.
//!
//! # Example
//!
//! ```rust
//! use tidewater::{ErrorContext, OperationError, RecoveryManager};
//!
//! # tokio_test::block_on(async {
//! let manager = RecoveryManager::default();
//! let ctx = ErrorContext::new().with("config_id", "cfg-7");
//!
//! let recovered = manager
//!     .attempt_recovery("save-config", &ctx, || async {
//!         Err::<(), _>(OperationError::from("backup store unavailable"))
//!     })
//!     .await;
//!
//! assert!(!recovered);
//! assert_eq!(manager.recovery_attempts("save-config", &ctx), 1);
//! assert_eq!(manager.error_log(10)[0].operation_type, "recovery-save-config");
//! # });
//! ```

mod log;

#[cfg(test)]
mod tests;

pub use self::log::{ErrorContext, ErrorRecord};

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::FutureExt;

use crate::config::RecoveryConfig;
use crate::error::{ErrorKind, OperationError};

use self::log::ErrorLog;

/// Number of records [`RecoveryManager::recent_errors`] returns.
pub const DEFAULT_ERROR_LOG_LIMIT: usize = 10;

/// Identity used when the context has none of the identity fields.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Identifies whose recovery budget an attempt counts against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecoveryKey {
    /// Label of the failed operation.
    pub operation_type: String,
    /// Identity of the record it touched.
    pub identity: String,
}

impl fmt::Display for RecoveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.operation_type, self.identity)
    }
}

/// Result of [`RecoveryManager::try_recovery`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// The recovery ran and succeeded; the key's budget was reset.
    Recovered,
    /// The recovery ran and failed; the journal entry is attached.
    Failed(ErrorRecord),
    /// The key's budget was used up, so nothing ran.
    Exhausted,
}

impl RecoveryOutcome {
    /// Returns true for [`RecoveryOutcome::Recovered`].
    pub fn is_recovered(&self) -> bool {
        matches!(self, RecoveryOutcome::Recovered)
    }

    /// Returns true for [`RecoveryOutcome::Exhausted`].
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RecoveryOutcome::Exhausted)
    }
}

/// Success flag produced by a recovery function.
///
/// A recovery reports success with `true`, `Ok(true)` or `Ok(())`.
/// `false` and `Ok(false)` are failed attempts, the same as `Err`.
pub trait RecoveryResult {
    /// `Ok(())` if the recovery succeeded.
    fn into_recovery(self) -> Result<(), OperationError>;
}

impl RecoveryResult for bool {
    fn into_recovery(self) -> Result<(), OperationError> {
        if self {
            Ok(())
        } else {
            Err(reported_failure())
        }
    }
}

impl<E: Into<OperationError>> RecoveryResult for Result<bool, E> {
    fn into_recovery(self) -> Result<(), OperationError> {
        self.map_err(Into::into)?.into_recovery()
    }
}

impl<E: Into<OperationError>> RecoveryResult for Result<(), E> {
    fn into_recovery(self) -> Result<(), OperationError> {
        self.map_err(Into::into)
    }
}

fn reported_failure() -> OperationError {
    OperationError::new(ErrorKind::Other, "recovery reported failure")
}

/// Sanitizes a possibly malformed value.
///
/// Implementations replace missing or invalid fields with safe defaults.
/// [`RecoveryManager::validate_and_repair`] survives a panicking
/// implementation, but `repair` should not rely on that.
pub trait Repair: Sized {
    /// Return a usable version of `self`.
    fn repair(self) -> Self;
}

/// Tracks recovery budgets and the error journal.
///
/// Shared by reference (wrap it in an `Arc` to share across tasks); all
/// methods take `&self`.
pub struct RecoveryManager {
    config: RecoveryConfig,
    state: Mutex<RecoveryState>,
}

struct RecoveryState {
    attempts: HashMap<RecoveryKey, u32>,
    log: ErrorLog,
}

impl RecoveryManager {
    /// Create a manager with `config`.
    pub fn new(config: RecoveryConfig) -> Self {
        let log = ErrorLog::new(config.max_error_log_size);
        RecoveryManager {
            config,
            state: Mutex::new(RecoveryState {
                attempts: HashMap::new(),
                log,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RecoveryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The manager's configuration.
    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Key for `operation_type` in `context`.
    ///
    /// The identity is the first configured identity field with a non-empty
    /// value in `context`, or [`UNKNOWN_IDENTITY`].
    pub fn key_for(&self, operation_type: &str, context: &ErrorContext) -> RecoveryKey {
        let identity = self
            .config
            .identity_fields
            .iter()
            .filter_map(|field| context.get(field))
            .find(|value| !value.is_empty())
            .unwrap_or(UNKNOWN_IDENTITY);

        RecoveryKey {
            operation_type: operation_type.to_string(),
            identity: identity.to_string(),
        }
    }

    /// Record an error in the journal and return the stored record.
    pub fn log_error(
        &self,
        operation_type: &str,
        error: &OperationError,
        context: ErrorContext,
    ) -> ErrorRecord {
        let record = ErrorRecord::new(operation_type.to_string(), error.clone(), context);

        tracing::error!(
            id = %record.id,
            operation_type,
            severity = %record.severity,
            context = %record.context,
            "{}",
            error
        );

        self.lock().log.push(record.clone());
        record
    }

    /// Run `recovery` if the key's budget allows, reporting only success.
    ///
    /// See [`try_recovery`](Self::try_recovery).
    pub async fn attempt_recovery<F, Fut>(
        &self,
        operation_type: &str,
        context: &ErrorContext,
        recovery: F,
    ) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future,
        Fut::Output: RecoveryResult,
    {
        self.try_recovery(operation_type, context, recovery)
            .await
            .is_recovered()
    }

    /// Run `recovery` if the key's budget allows.
    ///
    /// Returns [`RecoveryOutcome::Exhausted`] without calling `recovery`
    /// once `max_recovery_attempts` attempts have failed for this key.
    /// Otherwise the attempt is counted before `recovery` runs. Success
    /// (see [`RecoveryResult`]) resets the key's budget. Failure, whether
    /// `Err`, `false`, `Ok(false)` or a panic, is logged under
    /// `"recovery-" + operation_type`, with the attempt number added to
    /// the context as `recovery_attempt`.
    pub async fn try_recovery<F, Fut>(
        &self,
        operation_type: &str,
        context: &ErrorContext,
        recovery: F,
    ) -> RecoveryOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future,
        Fut::Output: RecoveryResult,
    {
        let key = self.key_for(operation_type, context);

        let attempt = {
            let mut state = self.lock();
            let count = state.attempts.entry(key.clone()).or_insert(0);
            if *count >= self.config.max_recovery_attempts {
                None
            } else {
                *count += 1;
                Some(*count)
            }
        };

        let Some(attempt) = attempt else {
            tracing::warn!(key = %key, "max recovery attempts reached, no further recovery possible");
            return RecoveryOutcome::Exhausted;
        };

        tracing::info!(key = %key, attempt, "attempting recovery");

        let result = match panic::catch_unwind(AssertUnwindSafe(recovery)) {
            Ok(fut) => match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(outcome) => outcome.into_recovery(),
                Err(payload) => Err(OperationError::from_panic("recovery", payload)),
            },
            Err(payload) => Err(OperationError::from_panic("recovery", payload)),
        };

        match result {
            Ok(()) => {
                self.lock().attempts.remove(&key);
                tracing::info!(key = %key, attempt, "recovery succeeded");
                RecoveryOutcome::Recovered
            }
            Err(error) => {
                let mut failure_context = context.clone();
                failure_context.insert("recovery_attempt", attempt);
                let record = self.log_error(
                    &format!("recovery-{}", operation_type),
                    &error.context(format!("recovering {}", key)),
                    failure_context,
                );
                RecoveryOutcome::Failed(record)
            }
        }
    }

    /// Attempts counted against the key for `operation_type` in `context`.
    pub fn recovery_attempts(&self, operation_type: &str, context: &ErrorContext) -> u32 {
        let key = self.key_for(operation_type, context);
        self.lock().attempts.get(&key).copied().unwrap_or(0)
    }

    /// Turn a possibly missing or malformed value into a usable one.
    ///
    /// `None` yields `T::default()`. Otherwise the value is repaired; if
    /// [`Repair::repair`] panics, the panic is logged and `T::default()`
    /// is returned.
    ///
    /// ```
    /// use tidewater::{RecoveryManager, Repair};
    ///
    /// #[derive(Debug, Default, PartialEq)]
    /// struct Profile {
    ///     nickname: String,
    /// }
    ///
    /// impl Repair for Profile {
    ///     fn repair(mut self) -> Self {
    ///         if self.nickname.trim().is_empty() {
    ///             self.nickname = "guest".to_string();
    ///         }
    ///         self
    ///     }
    /// }
    ///
    /// let manager = RecoveryManager::default();
    /// let fixed = manager.validate_and_repair(Some(Profile { nickname: " ".into() }));
    /// assert_eq!(fixed.nickname, "guest");
    /// assert_eq!(manager.validate_and_repair::<Profile>(None), Profile::default());
    /// ```
    pub fn validate_and_repair<T: Repair + Default>(&self, data: Option<T>) -> T {
        let Some(data) = data else {
            return T::default();
        };

        match panic::catch_unwind(AssertUnwindSafe(|| data.repair())) {
            Ok(repaired) => repaired,
            Err(payload) => {
                let error = OperationError::from_panic("repair", payload);
                tracing::warn!(%error, "repair failed, falling back to defaults");
                self.log_error("validate-and-repair", &error, ErrorContext::new());
                T::default()
            }
        }
    }

    /// Up to `limit` journal records, newest first.
    pub fn error_log(&self, limit: usize) -> Vec<ErrorRecord> {
        self.lock().log.recent(limit)
    }

    /// The [`DEFAULT_ERROR_LOG_LIMIT`] most recent records.
    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.error_log(DEFAULT_ERROR_LOG_LIMIT)
    }

    /// Number of records in the journal.
    pub fn error_log_len(&self) -> usize {
        self.lock().log.len()
    }

    /// Empty the journal. Recovery budgets are untouched.
    pub fn clear_error_log(&self) {
        self.lock().log.clear();
    }
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self::new(RecoveryConfig::default())
    }
}

impl fmt::Debug for RecoveryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("RecoveryManager")
            .field("config", &self.config)
            .field("tracked_keys", &state.attempts.len())
            .field("logged_errors", &state.log.len())
            .finish()
    }
}
