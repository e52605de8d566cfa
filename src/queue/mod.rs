//! An ordered, retrying operation queue with optimistic updates.
//!
//! [`OperationQueue`] runs mutating operations against a single-writer store
//! one at a time, in submission order. Any number of tasks may enqueue
//! concurrently; a single worker task drains the queue.
//!
//! - **Ordering**: completions settle in the order operations were enqueued.
//! - **Retry**: a failed operation goes back to the *head* of the queue and
//!   is retried after the policy's delay. Items behind it wait
//!   (head-of-line blocking), so ordering holds under retries too.
//! - **Optimistic updates**: see [`crate::optimistic`].
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use tidewater::{OperationError, OperationQueue, RetryPolicy};
//!
//! # tokio_test::block_on(async {
//! let queue: OperationQueue<String, (), usize> = OperationQueue::builder()
//!     .retry_policy(RetryPolicy::linear(Duration::from_millis(10)))
//!     .build();
//!
//! let saved = queue.enqueue(
//!     |name: String| async move { Ok::<_, OperationError>(name.len()) },
//!     "save-config",
//!     "alice".to_string(),
//!     None,
//! );
//!
//! assert_eq!(saved.await.unwrap(), 5);
//! assert_eq!(queue.len(), 0);
//! # });
//! ```
//!
//! # Limitations
//!
//! Items cannot be cancelled individually. Without an
//! [`attempt_timeout`](QueueBuilder::attempt_timeout) a hung operation
//! blocks the whole queue.

mod item;
mod worker;


pub use item::{Completion, ItemId};

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::config::QueueConfig;
use crate::error::{ErrorKind, OperationError, QueueError};
use crate::optimistic::{Coordinator, OptimisticApplier, RollbackHandler, SuccessHandler};
use crate::retry::RetryPolicy;

use item::{OperationFn, QueueItem};

/// Serializes operations against a single-writer store.
///
/// `Data` is the payload handed to each operation, `Delta` the optimistic
/// change an operation may carry, and `Output` what a successful operation
/// returns. Cloning the queue yields another handle to the same queue.
pub struct OperationQueue<Data, Delta, Output> {
    shared: Arc<Shared<Data, Delta, Output>>,
}

pub(crate) struct Shared<Data, Delta, Output> {
    state: Mutex<State<Data, Delta, Output>>,
    pub(crate) coordinator: Coordinator<Data, Delta, Output>,
    pub(crate) config: QueueConfig,
    next_id: AtomicU64,
    runtime: Handle,
}

struct State<Data, Delta, Output> {
    pending: VecDeque<QueueItem<Data, Delta, Output>>,
    /// A worker task is draining `pending`.
    processing: bool,
    /// The worker holds an item outside `pending` while running it.
    in_flight: bool,
}

impl<Data, Delta, Output> Shared<Data, Delta, Output> {
    fn lock(&self) -> MutexGuard<'_, State<Data, Delta, Output>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the head item, or mark the worker idle if there is none.
    pub(crate) fn take_next(&self) -> Option<QueueItem<Data, Delta, Output>> {
        let mut state = self.lock();
        match state.pending.pop_front() {
            Some(item) => {
                state.in_flight = true;
                Some(item)
            }
            None => {
                state.processing = false;
                None
            }
        }
    }

    /// Put a retrying item back at the head.
    pub(crate) fn park(&self, item: QueueItem<Data, Delta, Output>) {
        let mut state = self.lock();
        state.pending.push_front(item);
        state.in_flight = false;
    }

    /// The in-flight item is about to be settled.
    pub(crate) fn release(&self) {
        self.lock().in_flight = false;
    }

    /// The worker stopped early. A lost in-flight item resolves its
    /// completion as [`QueueError::Closed`] when its sender is dropped.
    pub(crate) fn abandon(&self) {
        let mut state = self.lock();
        tracing::error!(
            pending = state.pending.len(),
            in_flight = state.in_flight,
            "queue worker stopped unexpectedly"
        );
        state.processing = false;
        state.in_flight = false;
    }
}

impl<Data, Delta, Output> OperationQueue<Data, Delta, Output>
where
    Data: Clone + Send + 'static,
    Delta: Send + 'static,
    Output: Send + 'static,
{
    /// Start building a queue.
    pub fn builder() -> QueueBuilder<Data, Delta, Output> {
        QueueBuilder::new()
    }

    /// Create a queue with `config` and no optimistic handlers.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime. Use
    /// [`QueueBuilder::runtime`] to supply a handle explicitly.
    pub fn new(config: QueueConfig) -> Self {
        QueueBuilder::new().config(config).build()
    }

    /// Submit an operation.
    ///
    /// The item is appended to the tail; the returned [`Completion`]
    /// resolves with the operation's value, or with a [`QueueError`] once
    /// the item is rejected. `enqueue` itself never fails.
    ///
    /// `operation` may be called more than once if attempts fail, each time
    /// with a fresh clone of `data`; it must tolerate being repeated.
    pub fn enqueue<F, Fut, E>(
        &self,
        operation: F,
        operation_type: impl Into<String>,
        data: Data,
        delta: Option<Delta>,
    ) -> Completion<Output>
    where
        F: Fn(Data) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Output, E>> + Send + 'static,
        E: Into<OperationError> + 'static,
    {
        let id = ItemId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let operation_type = operation_type.into();
        let operation: OperationFn<Data, Output> = Box::new(move |data| {
            let attempt = operation(data);
            async move { attempt.await.map_err(Into::<OperationError>::into) }.boxed()
        });

        let (tx, rx) = oneshot::channel();
        let item = QueueItem::new(id, operation_type, operation, data, delta, tx);

        let start_worker = {
            let mut state = self.shared.lock();
            tracing::debug!(
                id = %id,
                operation_type = %item.operation_type,
                queued = state.pending.len() + 1,
                "operation enqueued"
            );
            state.pending.push_back(item);
            !std::mem::replace(&mut state.processing, true)
        };

        if start_worker {
            self.shared
                .runtime
                .spawn(worker::drain(Arc::clone(&self.shared)));
        }

        Completion::new(id, rx)
    }
}

impl<Data, Delta, Output> OperationQueue<Data, Delta, Output> {
    /// Number of operations not yet settled, including one that is running.
    pub fn len(&self) -> usize {
        let state = self.shared.lock();
        state.pending.len() + usize::from(state.in_flight)
    }

    /// Returns true if no operation is pending or running.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every pending operation.
    ///
    /// Each dropped item's completion resolves to [`QueueError::Cleared`].
    /// A dropped item whose delta was already applied (one waiting out a
    /// retry delay) is rolled back first. An attempt that is currently
    /// running is not interrupted and settles normally.
    ///
    /// Returns the number of items dropped.
    pub fn clear(&self) -> usize {
        let cleared: Vec<_> = self.shared.lock().pending.drain(..).collect();
        let count = cleared.len();
        let reason = OperationError::new(ErrorKind::Cancelled, "queue cleared");

        for item in cleared {
            tracing::debug!(id = %item.id, operation_type = %item.operation_type, "dropping pending operation");
            let settling = item.into_settlement();
            self.shared
                .coordinator
                .revert(&settling.operation_type, &settling.delta, &reason);
            settling.settle(Err(QueueError::Cleared));
        }

        if count > 0 {
            tracing::info!(count, "queue cleared");
        }
        count
    }

    /// The queue's configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }
}

impl<Data, Delta, Output> Default for OperationQueue<Data, Delta, Output>
where
    Data: Clone + Send + 'static,
    Delta: Send + 'static,
    Output: Send + 'static,
{
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl<Data, Delta, Output> Clone for OperationQueue<Data, Delta, Output> {
    fn clone(&self) -> Self {
        OperationQueue {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<Data, Delta, Output> fmt::Debug for OperationQueue<Data, Delta, Output> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationQueue")
            .field("len", &self.len())
            .field("config", &self.shared.config)
            .field("coordinator", &self.shared.coordinator)
            .finish()
    }
}

/// Builder for [`OperationQueue`].
///
/// Handlers are fixed at build time; a running queue cannot be
/// reconfigured.
pub struct QueueBuilder<Data, Delta, Output> {
    config: QueueConfig,
    coordinator: Coordinator<Data, Delta, Output>,
    runtime: Option<Handle>,
}

impl<Data, Delta, Output> QueueBuilder<Data, Delta, Output>
where
    Data: Clone + Send + 'static,
    Delta: Send + 'static,
    Output: Send + 'static,
{
    /// A builder with default config and no handlers.
    pub fn new() -> Self {
        QueueBuilder {
            config: QueueConfig::default(),
            coordinator: Coordinator::new(),
            runtime: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Bound each attempt; see [`QueueConfig::attempt_timeout`].
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.config.attempt_timeout = Some(timeout);
        self
    }

    /// Handler run once per item, before its first attempt.
    pub fn on_apply(mut self, applier: impl OptimisticApplier<Delta> + 'static) -> Self {
        self.coordinator = self.coordinator.with_applier(applier);
        self
    }

    /// Handler run once after an item with a delta succeeds.
    pub fn on_success(mut self, handler: impl SuccessHandler<Data, Output> + 'static) -> Self {
        self.coordinator = self.coordinator.with_success(handler);
        self
    }

    /// Handler run once after an item with a delta is rejected.
    pub fn on_rollback(mut self, handler: impl RollbackHandler<Delta> + 'static) -> Self {
        self.coordinator = self.coordinator.with_rollback(handler);
        self
    }

    /// Use a prebuilt [`Coordinator`], replacing any handlers set so far.
    ///
    /// Lets several queues share one handler setup.
    pub fn coordinator(mut self, coordinator: Coordinator<Data, Delta, Output>) -> Self {
        self.coordinator = coordinator;
        self
    }

    /// Runtime the worker task is spawned on.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Build the queue.
    ///
    /// # Panics
    ///
    /// Panics if no runtime handle was given and this is called outside a
    /// tokio runtime.
    pub fn build(self) -> OperationQueue<Data, Delta, Output> {
        let runtime = self.runtime.unwrap_or_else(Handle::current);
        OperationQueue {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    pending: VecDeque::new(),
                    processing: false,
                    in_flight: false,
                }),
                coordinator: self.coordinator,
                config: self.config,
                next_id: AtomicU64::new(0),
                runtime,
            }),
        }
    }
}

impl<Data, Delta, Output> Default for QueueBuilder<Data, Delta, Output>
where
    Data: Clone + Send + 'static,
    Delta: Send + 'static,
    Output: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Data, Delta, Output> fmt::Debug for QueueBuilder<Data, Delta, Output> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueBuilder")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}
