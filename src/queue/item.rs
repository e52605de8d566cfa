//! Queue items and the completion handle returned to callers.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{OperationError, QueueError};
use crate::optimistic::PendingDelta;

/// Identifier of an enqueued operation, unique for the lifetime of its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub(crate) u64);

impl ItemId {
    /// The raw sequence number. Later submissions have larger numbers.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

pub(crate) type OperationFn<Data, Output> =
    Box<dyn Fn(Data) -> BoxFuture<'static, Result<Output, OperationError>> + Send + Sync>;

type Settlement<Output> = Result<Output, QueueError>;

pub(crate) struct QueueItem<Data, Delta, Output> {
    pub(crate) id: ItemId,
    pub(crate) operation_type: String,
    operation: OperationFn<Data, Output>,
    data: Data,
    pub(crate) delta: PendingDelta<Delta>,
    pub(crate) retry_count: u32,
    pub(crate) prev_delay: Option<Duration>,
    completion: oneshot::Sender<Settlement<Output>>,
    pub(crate) submitted_at: Instant,
}

impl<Data: Clone, Delta, Output> QueueItem<Data, Delta, Output> {
    pub(crate) fn new(
        id: ItemId,
        operation_type: String,
        operation: OperationFn<Data, Output>,
        data: Data,
        delta: Option<Delta>,
        completion: oneshot::Sender<Settlement<Output>>,
    ) -> Self {
        QueueItem {
            id,
            operation_type,
            operation,
            data,
            delta: PendingDelta::new(delta),
            retry_count: 0,
            prev_delay: None,
            completion,
            submitted_at: Instant::now(),
        }
    }

    /// Start one attempt with a fresh copy of the payload.
    pub(crate) fn start_attempt(&self) -> BoxFuture<'static, Result<Output, OperationError>> {
        (self.operation)(self.data.clone())
    }
}

impl<Data, Delta, Output> QueueItem<Data, Delta, Output> {
    pub(crate) fn attempts(&self) -> u32 {
        self.retry_count + 1
    }

    /// Split into the pieces needed to settle the item.
    pub(crate) fn into_settlement(self) -> Settling<Data, Delta, Output> {
        Settling {
            operation_type: self.operation_type,
            data: self.data,
            delta: self.delta,
            completion: self.completion,
        }
    }
}

pub(crate) struct Settling<Data, Delta, Output> {
    pub(crate) operation_type: String,
    pub(crate) data: Data,
    pub(crate) delta: PendingDelta<Delta>,
    completion: oneshot::Sender<Settlement<Output>>,
}

impl<Data, Delta, Output> Settling<Data, Delta, Output> {
    pub(crate) fn settle(self, outcome: Settlement<Output>) {
        // The caller may have dropped its Completion; nothing to notify then.
        let _ = self.completion.send(outcome);
    }
}

impl<Data, Delta, Output> fmt::Debug for QueueItem<Data, Delta, Output> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueItem")
            .field("id", &self.id)
            .field("operation_type", &self.operation_type)
            .field("retry_count", &self.retry_count)
            .field("delta_applied", &self.delta.is_applied())
            .finish_non_exhaustive()
    }
}

/// Resolves once the enqueued operation has been settled.
///
/// Yields the operation's value, or a [`QueueError`] if the retry policy
/// gave up, the queue was cleared, or the worker disappeared. Dropping a
/// `Completion` does not cancel the operation.
#[must_use = "a Completion does nothing unless awaited; dropping it does not cancel the operation"]
pub struct Completion<Output> {
    id: ItemId,
    rx: oneshot::Receiver<Settlement<Output>>,
}

impl<Output> Completion<Output> {
    pub(crate) fn new(id: ItemId, rx: oneshot::Receiver<Settlement<Output>>) -> Self {
        Completion { id, rx }
    }

    /// Identifier of the operation this completion belongs to.
    pub fn id(&self) -> ItemId {
        self.id
    }
}

impl<Output> Future for Completion<Output> {
    type Output = Result<Output, QueueError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(QueueError::Closed)))
    }
}

impl<Output> fmt::Debug for Completion<Output> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").field("id", &self.id).finish()
    }
}
