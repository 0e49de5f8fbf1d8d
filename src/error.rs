//! Errors.

use std::{fmt::Debug, time::Duration};

use thiserror::Error;

/// An error that occurred while building an [`Engine`](crate::Engine).
///
/// No engine is returned when this happens, so there is nothing to clean up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BuildError {
    /// `batch_size` must be at least one.
    #[error("Invalid config: batch size must be greater than zero")]
    ZeroBatchSize,

    /// `pool_size` must be at least one.
    #[error("Invalid config: worker pool size must be greater than zero")]
    ZeroPoolSize,

    /// `timeout` must be positive.
    #[error("Invalid config: flush timeout must be positive")]
    ZeroTimeout,

    /// The intake queue cannot hold this many items.
    #[error("Invalid config: queue size {requested} exceeds the maximum of {max}")]
    QueueTooLarge {
        /// The resolved queue size.
        requested: usize,
        /// The largest supported queue size.
        max: usize,
    },

    /// The retry policy would never make progress.
    #[error("Invalid config: backoff initial interval must be positive, got {0:?}")]
    ZeroBackoffInterval(Duration),

    /// Workers could not be spawned because there is no Tokio runtime on this thread.
    #[error("Unable to spawn workers: no Tokio runtime is running")]
    NoRuntime,
}

/// An item could not be submitted.
///
/// The item is handed back so the caller can decide whether to retry, drop it, or fail upstream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AddError<T> {
    /// The engine has begun stopping, or has stopped.
    ///
    /// Unrecoverable.
    #[error("Item rejected: the engine is stopped")]
    Stopped(T),

    /// The intake queue stayed full for the whole retry budget.
    ///
    /// Only returned when using [`QueueStrategy::Ring`](crate::QueueStrategy::Ring). Recoverable.
    #[error("Item rejected: the queue stayed full after retrying for {1:?}")]
    RetryExhausted(T, Duration),
}

impl<T> AddError<T> {
    /// Take back the item that could not be submitted.
    pub fn into_inner(self) -> T {
        match self {
            AddError::Stopped(item) | AddError::RetryExhausted(item, _) => item,
        }
    }

    /// Whether the engine rejected the item because it is stopping.
    pub fn is_stopped(&self) -> bool {
        matches!(self, AddError::Stopped(_))
    }
}

/// The result of submitting an item.
pub type AddResult<T> = std::result::Result<(), AddError<T>>;
