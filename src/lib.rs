//! # Tidewater
//!
//! > *"The tide comes in one wave at a time"*
//!
//! An ordered, retrying operation queue for single-writer state stores,
//! with optimistic updates and bounded recovery.
//!
//! ## Philosophy
//!
//! Writes against a store that tolerates only one writer are funnelled
//! through an [`OperationQueue`]:
//! - **Ordered**: operations run one at a time and settle in the order
//!   they were submitted, retries included.
//! - **Optimistic**: an operation may carry a delta that is applied
//!   immediately and later finalized or rolled back exactly once.
//! - **Bounded**: the [`RetryPolicy`] caps attempts per operation, and the
//!   [`RecoveryManager`] caps follow-up recovery attempts per record.
//!
//! ## Quick Example
//!
//! ```rust
//! use std::time::Duration;
//! use tidewater::{ErrorContext, OperationError, OperationQueue, RecoveryManager, RetryPolicy};
//!
//! # tokio_test::block_on(async {
//! let queue: OperationQueue<u32, (), u32> = OperationQueue::builder()
//!     .retry_policy(RetryPolicy::linear(Duration::from_millis(1)).with_max_retries(1))
//!     .build();
//! let recovery = RecoveryManager::default();
//!
//! let saved = queue.enqueue(
//!     |value: u32| async move {
//!         if value > 100 {
//!             Err(OperationError::from("value out of range"))
//!         } else {
//!             Ok(value)
//!         }
//!     },
//!     "save-config",
//!     500,
//!     None,
//! );
//!
//! match saved.await {
//!     Ok(value) => println!("saved {}", value),
//!     Err(err) => {
//!         let ctx = ErrorContext::new().with("config_id", "cfg-1");
//!         let error = err.into_operation_error();
//!         recovery.log_error("save-config", &error, ctx.clone());
//!         let recovered = recovery
//!             .attempt_recovery("save-config", &ctx, || async { Ok::<_, OperationError>(()) })
//!             .await;
//!         assert!(recovered);
//!     }
//! }
//!
//! assert_eq!(recovery.error_log(10).len(), 1);
//! # });
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod optimistic;
pub mod queue;
pub mod recovery;
pub mod retry;
pub mod testing;

// Re-exports
pub use config::{QueueConfig, RecoveryConfig};
pub use error::{ErrorKind, OperationError, QueueError, Severity};
pub use optimistic::{Coordinator, OptimisticApplier, RollbackHandler, SuccessHandler};
pub use queue::{Completion, ItemId, OperationQueue, QueueBuilder};
pub use recovery::{
    ErrorContext, ErrorRecord, RecoveryKey, RecoveryManager, RecoveryOutcome, RecoveryResult,
    Repair,
};
pub use retry::{
    JitterStrategy, RetryDecision, RetryExhausted, RetryOn, RetryPolicy, RetryStrategy,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{QueueConfig, RecoveryConfig};
    pub use crate::error::{ErrorKind, OperationError, QueueError, Severity};
    pub use crate::queue::{Completion, OperationQueue};
    pub use crate::recovery::{
        ErrorContext, RecoveryManager, RecoveryOutcome, RecoveryResult, Repair,
    };
    pub use crate::retry::{RetryExhausted, RetryPolicy};
}
