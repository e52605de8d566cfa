//! The single consumer that drains a queue.
//!
//! One `drain` task exists per queue while it has work. It takes the head
//! item, runs one attempt, and either settles the item or parks it back at
//! the head and sleeps for the retry delay. When the queue is empty the task
//! clears the `processing` flag under the queue lock and exits; the next
//! `enqueue` starts a new one.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::Instrument;

use super::item::QueueItem;
use super::Shared;
use crate::error::{ErrorKind, OperationError, QueueError};
use crate::retry::{RetryDecision, RetryExhausted};

pub(crate) async fn drain<Data, Delta, Output>(shared: Arc<Shared<Data, Delta, Output>>)
where
    Data: Clone + Send + 'static,
    Delta: Send + 'static,
    Output: Send + 'static,
{
    let mut guard = DrainGuard {
        shared: &shared,
        armed: true,
    };

    while let Some(item) = shared.take_next() {
        let span = tracing::debug_span!(
            "queue_item",
            id = %item.id,
            operation_type = %item.operation_type,
            attempt = item.attempts(),
        );

        if let Some((item, delay)) = process(&shared, item).instrument(span).await {
            shared.park(item);
            tokio::time::sleep(delay).await;
        }
    }

    // take_next already marked the worker idle under the lock.
    guard.armed = false;
}

/// Marks the worker idle if the drain task stops without draining the
/// queue (a panic escaping `process`, or the runtime dropping the task), so
/// the next `enqueue` starts a fresh worker.
struct DrainGuard<'a, Data, Delta, Output> {
    shared: &'a Shared<Data, Delta, Output>,
    armed: bool,
}

impl<Data, Delta, Output> Drop for DrainGuard<'_, Data, Delta, Output> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.abandon();
        }
    }
}

/// Run one attempt of `item`.
///
/// Returns the item and its backoff delay if it should be retried; otherwise
/// the item has been settled.
async fn process<Data, Delta, Output>(
    shared: &Shared<Data, Delta, Output>,
    mut item: QueueItem<Data, Delta, Output>,
) -> Option<(QueueItem<Data, Delta, Output>, Duration)>
where
    Data: Clone + Send + 'static,
    Delta: Send + 'static,
    Output: Send + 'static,
{
    let outcome = match shared.coordinator.apply(&item.operation_type, &mut item.delta) {
        Ok(applied) => {
            if applied {
                tracing::debug!("optimistic delta applied");
            }
            let attempt = start_attempt(&item);
            run_attempt(attempt, shared.config.attempt_timeout).await
        }
        Err(error) => Err(error),
    };

    let error = match outcome {
        Ok(value) => {
            tracing::debug!(attempts = item.attempts(), "operation succeeded");
            shared.release();
            let settling = item.into_settlement();
            shared.coordinator.finalize(
                &settling.operation_type,
                &settling.delta,
                &settling.data,
                &value,
            );
            settling.settle(Ok(value));
            return None;
        }
        Err(error) => error,
    };

    match shared
        .config
        .retry
        .decide_after(item.retry_count, &error, item.prev_delay)
    {
        RetryDecision::Retry { delay } => {
            tracing::warn!(%error, ?delay, "operation failed, retrying");
            item.retry_count += 1;
            item.prev_delay = Some(delay);
            Some((item, delay))
        }
        RetryDecision::GiveUp => {
            let attempts = item.attempts();
            let elapsed = item.submitted_at.elapsed();
            tracing::error!(%error, attempts, ?elapsed, "operation rejected");
            shared.release();
            let settling = item.into_settlement();
            shared
                .coordinator
                .revert(&settling.operation_type, &settling.delta, &error);
            settling.settle(Err(QueueError::Rejected(RetryExhausted::new(
                error, attempts, elapsed,
            ))));
            None
        }
    }
}

/// Start an attempt, catching a panic raised before the first poll.
fn start_attempt<Data: Clone, Delta, Output>(
    item: &QueueItem<Data, Delta, Output>,
) -> Result<BoxFuture<'static, Result<Output, OperationError>>, OperationError> {
    panic::catch_unwind(AssertUnwindSafe(|| item.start_attempt())).map_err(|_| panicked())
}

/// Drive one attempt, converting panics and timeouts into errors.
async fn run_attempt<Output>(
    attempt: Result<BoxFuture<'static, Result<Output, OperationError>>, OperationError>,
    timeout: Option<Duration>,
) -> Result<Output, OperationError> {
    let attempt = AssertUnwindSafe(attempt?).catch_unwind();

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return Err(OperationError::new(
                    ErrorKind::Timeout,
                    format!("attempt timed out after {:?}", limit),
                ))
            }
        },
        None => attempt.await,
    };

    outcome.unwrap_or_else(|_| Err(panicked()))
}

fn panicked() -> OperationError {
    OperationError::new(ErrorKind::Fatal, "operation panicked")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::OperationQueue;

    #[tokio::test]
    async fn test_armed_guard_marks_worker_idle() {
        let queue: OperationQueue<(), (), ()> = OperationQueue::default();
        {
            let mut state = queue.shared.lock();
            state.processing = true;
            state.in_flight = true;
        }

        drop(DrainGuard {
            shared: &queue.shared,
            armed: true,
        });

        assert!(!queue.shared.lock().processing);
        assert_eq!(queue.len(), 0);

        // A fresh worker starts on the next enqueue.
        let done = queue.enqueue(|_| async { Ok::<_, OperationError>(()) }, "save", (), None);
        assert_eq!(done.await, Ok(()));
    }

    #[tokio::test]
    async fn test_disarmed_guard_leaves_state_alone() {
        let queue: OperationQueue<(), (), ()> = OperationQueue::default();
        queue.shared.lock().processing = true;

        drop(DrainGuard {
            shared: &queue.shared,
            armed: false,
        });

        assert!(queue.shared.lock().processing);
        queue.shared.lock().processing = false;
    }
}
