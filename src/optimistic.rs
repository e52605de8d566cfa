//! Optimistic updates: apply early, then finalize or roll back.
//!
//! An operation may carry a *delta*, a description of the change it is
//! expected to make. The queue hands the delta to an [`OptimisticApplier`]
//! before the first attempt so the rest of the application sees the effect
//! immediately. When the operation finally succeeds the [`SuccessHandler`]
//! runs; when it is finally rejected the [`RollbackHandler`] undoes the
//! delta.
//!
//! Per item, regardless of how many attempts it takes:
//!
//! - `apply` runs at most once, before the first attempt;
//! - exactly one of `on_success` / `rollback` runs after the delta was applied;
//! - items without a delta get neither.
//!
//! Handlers run synchronously on the queue's worker and must not block.
//! A panicking handler is caught and logged: a panic in `apply` fails the
//! attempt with a `Fatal` error, a panic in `on_success` or `rollback`
//! does not stop the item from settling.
//! Closures with the matching shape implement each trait:
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use tidewater::OperationQueue;
//!
//! # tokio_test::block_on(async {
//! let shown = Arc::new(Mutex::new(0i64));
//!
//! let queue: OperationQueue<(), i64, ()> = OperationQueue::builder()
//!     .on_apply({
//!         let shown = shown.clone();
//!         move |_: &str, delta: &i64| *shown.lock().unwrap() += delta
//!     })
//!     .on_rollback({
//!         let shown = shown.clone();
//!         move |_: &str, delta: &i64, _: &tidewater::OperationError| {
//!             *shown.lock().unwrap() -= delta
//!         }
//!     })
//!     .build();
//!
//! let done = queue.enqueue(|_| async { Ok::<_, tidewater::OperationError>(()) }, "credit", (), Some(5));
//! done.await.unwrap();
//! assert_eq!(*shown.lock().unwrap(), 5);
//! # });
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::OperationError;

/// Applies a tentative change before the operation runs.
pub trait OptimisticApplier<Delta>: Send + Sync {
    /// Make `delta` visible.
    fn apply(&self, operation_type: &str, delta: &Delta);
}

/// Notified once an operation carrying a delta has succeeded.
pub trait SuccessHandler<Data, Output>: Send + Sync {
    /// Finalize the change made by `data`, which produced `result`.
    fn on_success(&self, operation_type: &str, data: &Data, result: &Output);
}

/// Reverts a tentative change after the operation was rejected for good.
pub trait RollbackHandler<Delta>: Send + Sync {
    /// Undo `delta`; `error` is the reason the operation was rejected.
    fn rollback(&self, operation_type: &str, delta: &Delta, error: &OperationError);
}

impl<Delta, F> OptimisticApplier<Delta> for F
where
    F: Fn(&str, &Delta) + Send + Sync,
{
    fn apply(&self, operation_type: &str, delta: &Delta) {
        self(operation_type, delta)
    }
}

impl<Data, Output, F> SuccessHandler<Data, Output> for F
where
    F: Fn(&str, &Data, &Output) + Send + Sync,
{
    fn on_success(&self, operation_type: &str, data: &Data, result: &Output) {
        self(operation_type, data, result)
    }
}

impl<Delta, F> RollbackHandler<Delta> for F
where
    F: Fn(&str, &Delta, &OperationError) + Send + Sync,
{
    fn rollback(&self, operation_type: &str, delta: &Delta, error: &OperationError) {
        self(operation_type, delta, error)
    }
}

/// A delta and whether it has been applied yet.
///
/// Owned by a queue item for its whole lifetime, so retries see the
/// `applied` flag set by the first attempt.
#[derive(Debug)]
pub(crate) struct PendingDelta<Delta> {
    delta: Option<Delta>,
    applied: bool,
}

impl<Delta> PendingDelta<Delta> {
    pub(crate) fn new(delta: Option<Delta>) -> Self {
        PendingDelta {
            delta,
            applied: false,
        }
    }

    pub(crate) fn is_applied(&self) -> bool {
        self.applied
    }
}

/// Runs the optimistic handlers for the queue.
///
/// Either assembled by [`QueueBuilder`](crate::QueueBuilder)'s `on_*`
/// methods or built here and handed over with
/// [`QueueBuilder::coordinator`](crate::QueueBuilder::coordinator).
/// Cloning shares the handlers. Handlers cannot be swapped while the queue
/// is running.
pub struct Coordinator<Data, Delta, Output> {
    applier: Option<Arc<dyn OptimisticApplier<Delta>>>,
    success: Option<Arc<dyn SuccessHandler<Data, Output>>>,
    rollback: Option<Arc<dyn RollbackHandler<Delta>>>,
}

impl<Data, Delta, Output> Coordinator<Data, Delta, Output> {
    /// A coordinator with no handlers; every call is a no-op.
    pub fn new() -> Self {
        Coordinator {
            applier: None,
            success: None,
            rollback: None,
        }
    }

    /// Set the handler that applies deltas.
    pub fn with_applier(mut self, applier: impl OptimisticApplier<Delta> + 'static) -> Self {
        self.applier = Some(Arc::new(applier));
        self
    }

    /// Set the handler that finalizes successful operations.
    pub fn with_success(mut self, success: impl SuccessHandler<Data, Output> + 'static) -> Self {
        self.success = Some(Arc::new(success));
        self
    }

    /// Set the handler that reverts rejected operations.
    pub fn with_rollback(mut self, rollback: impl RollbackHandler<Delta> + 'static) -> Self {
        self.rollback = Some(Arc::new(rollback));
        self
    }

    /// Apply the delta if there is one and it has not been applied yet.
    ///
    /// Returns true if this call applied it. A panicking applier still
    /// counts as applied, so the delta is rolled back if the item is
    /// finally rejected; the panic is returned as a `Fatal` error that
    /// fails the current attempt.
    pub(crate) fn apply(
        &self,
        operation_type: &str,
        pending: &mut PendingDelta<Delta>,
    ) -> Result<bool, OperationError> {
        if pending.applied {
            return Ok(false);
        }
        let Some(delta) = pending.delta.as_ref() else {
            return Ok(false);
        };
        pending.applied = true;

        match &self.applier {
            Some(applier) => {
                guarded("apply handler", operation_type, || applier.apply(operation_type, delta))
                    .map(|()| true)
            }
            None => Ok(true),
        }
    }

    /// Finalize an applied delta after success.
    ///
    /// A panicking handler is logged; the item still settles.
    pub(crate) fn finalize(
        &self,
        operation_type: &str,
        pending: &PendingDelta<Delta>,
        data: &Data,
        result: &Output,
    ) {
        if !pending.applied {
            return;
        }
        if let Some(success) = &self.success {
            let _ = guarded("success handler", operation_type, || {
                success.on_success(operation_type, data, result)
            });
        }
    }

    /// Revert an applied delta after terminal failure.
    ///
    /// A panicking handler is logged; the item still settles.
    pub(crate) fn revert(
        &self,
        operation_type: &str,
        pending: &PendingDelta<Delta>,
        error: &OperationError,
    ) {
        if !pending.applied {
            return;
        }
        let (Some(rollback), Some(delta)) = (&self.rollback, pending.delta.as_ref()) else {
            return;
        };
        let _ = guarded("rollback handler", operation_type, || {
            rollback.rollback(operation_type, delta, error)
        });
    }
}

/// Run a user handler, turning a panic into a logged `Fatal` error.
fn guarded<R>(
    handler: &str,
    operation_type: &str,
    f: impl FnOnce() -> R,
) -> Result<R, OperationError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let error = OperationError::from_panic(handler, payload);
        tracing::error!(operation_type, %error, "optimistic handler panicked");
        error
    })
}

impl<Data, Delta, Output> Clone for Coordinator<Data, Delta, Output> {
    fn clone(&self) -> Self {
        Coordinator {
            applier: self.applier.clone(),
            success: self.success.clone(),
            rollback: self.rollback.clone(),
        }
    }
}

impl<Data, Delta, Output> Default for Coordinator<Data, Delta, Output> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Data, Delta, Output> fmt::Debug for Coordinator<Data, Delta, Output> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("applier", &self.applier.is_some())
            .field("success", &self.success.is_some())
            .field("rollback", &self.rollback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CallLog;

    fn recording(log: &CallLog) -> Coordinator<&'static str, i32, u32> {
        Coordinator::new()
            .with_applier({
                let log = log.clone();
                move |ty: &str, delta: &i32| log.record(format!("apply {} {}", ty, delta))
            })
            .with_success({
                let log = log.clone();
                move |ty: &str, data: &&'static str, result: &u32| {
                    log.record(format!("success {} {} {}", ty, data, result))
                }
            })
            .with_rollback({
                let log = log.clone();
                move |ty: &str, delta: &i32, err: &OperationError| {
                    log.record(format!("rollback {} {} {}", ty, delta, err.message()))
                }
            })
    }

    #[test]
    fn test_apply_runs_once() {
        let log = CallLog::new();
        let coordinator = recording(&log);
        let mut pending = PendingDelta::new(Some(7));

        assert_eq!(coordinator.apply("save", &mut pending), Ok(true));
        assert_eq!(coordinator.apply("save", &mut pending), Ok(false));
        assert!(pending.is_applied());

        assert_eq!(log.entries(), vec!["apply save 7"]);
    }

    #[test]
    fn test_finalize_after_apply() {
        let log = CallLog::new();
        let coordinator = recording(&log);
        let mut pending = PendingDelta::new(Some(1));

        coordinator.apply("save", &mut pending).unwrap();
        coordinator.finalize("save", &pending, &"cfg", &99);

        assert_eq!(log.entries(), vec!["apply save 1", "success save cfg 99"]);
    }

    #[test]
    fn test_revert_after_apply() {
        let log = CallLog::new();
        let coordinator = recording(&log);
        let mut pending = PendingDelta::new(Some(3));

        coordinator.apply("delete", &mut pending).unwrap();
        coordinator.revert("delete", &pending, &OperationError::from("boom"));

        assert_eq!(log.entries(), vec!["apply delete 3", "rollback delete 3 boom"]);
    }

    #[test]
    fn test_no_delta_gets_no_calls() {
        let log = CallLog::new();
        let coordinator = recording(&log);

        let mut pending = PendingDelta::new(None);
        assert_eq!(coordinator.apply("save", &mut pending), Ok(false));
        coordinator.finalize("save", &pending, &"cfg", &1);

        let mut pending = PendingDelta::new(None);
        coordinator.apply("save", &mut pending).unwrap();
        coordinator.revert("save", &pending, &OperationError::from("boom"));

        assert!(log.is_empty());
    }

    #[test]
    fn test_unapplied_delta_is_not_reverted() {
        let log = CallLog::new();
        let coordinator = recording(&log);

        coordinator.revert("save", &PendingDelta::new(Some(2)), &OperationError::from("x"));

        assert!(log.is_empty());
    }

    #[test]
    fn test_missing_handlers_are_noops() {
        let coordinator: Coordinator<(), i32, ()> = Coordinator::default();
        let mut pending = PendingDelta::new(Some(1));

        assert_eq!(coordinator.apply("save", &mut pending), Ok(true));
        coordinator.finalize("save", &pending, &(), &());
    }

    #[test]
    fn test_panicking_applier_fails_once() {
        let coordinator: Coordinator<(), i32, ()> =
            Coordinator::new().with_applier(|_: &str, delta: &i32| {
                if *delta < 0 {
                    panic!("negative delta");
                }
            });
        let mut pending = PendingDelta::new(Some(-1));

        let err = coordinator.apply("save", &mut pending).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Fatal);
        assert_eq!(err.message(), "apply handler panicked: negative delta");

        // The delta counts as applied; a retry does not call the applier again.
        assert!(pending.is_applied());
        assert_eq!(coordinator.apply("save", &mut pending), Ok(false));
    }

    #[test]
    fn test_panicking_success_and_rollback_are_contained() {
        let coordinator: Coordinator<(), i32, ()> = Coordinator::new()
            .with_success(|_: &str, _: &(), _: &()| panic!("success exploded"))
            .with_rollback(|_: &str, _: &i32, _: &OperationError| panic!("rollback exploded"));
        let mut pending = PendingDelta::new(Some(1));
        coordinator.apply("save", &mut pending).unwrap();

        coordinator.finalize("save", &pending, &(), &());
        coordinator.revert("save", &pending, &OperationError::from("boom"));
    }

    #[test]
    fn test_debug_shows_configured_handlers() {
        let coordinator: Coordinator<(), i32, ()> =
            Coordinator::new().with_applier(|_: &str, _: &i32| {});
        let debug = format!("{:?}", coordinator);
        assert!(debug.contains("applier: true"));
        assert!(debug.contains("rollback: false"));
    }
}
