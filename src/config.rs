use std::{
    fmt::{self, Display},
    time::Duration,
};

use bon::bon;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::{backoff::Backoff, error::BuildError};

/// The intake queue holds this many batches' worth of items unless told otherwise.
pub const DEFAULT_QUEUE_BATCHES: usize = 1000;

/// The largest queue size accepted with [`QueueStrategy::Ring`].
///
/// The ring buffer allocates every slot up front, so its size is capped well below what the
/// blocking channel accepts.
pub const MAX_RING_QUEUE_SIZE: usize = 1 << 24;

const DEFAULT_NAME: &str = "flush-pool";

/// How the shared intake queue is backed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[non_exhaustive]
pub enum QueueStrategy {
    /// A bounded channel. Producers wait for space when it is full; workers wait for items when
    /// it is empty.
    #[default]
    Blocking,

    /// A lock-free ring buffer. Producers that find it full retry with the given backoff; workers
    /// that find it empty poll again after a short sleep.
    ///
    /// The queue size must not exceed [`MAX_RING_QUEUE_SIZE`].
    Ring(Backoff),
}

impl QueueStrategy {
    /// The largest queue this strategy can be built with.
    fn max_queue_size(&self) -> usize {
        match self {
            QueueStrategy::Blocking => Semaphore::MAX_PERMITS,
            QueueStrategy::Ring(_) => MAX_RING_QUEUE_SIZE,
        }
    }
}

/// Engine configuration.
///
/// Nothing is validated here. [`Engine::new`](crate::Engine::new) checks every field and fails
/// with a [`BuildError`] naming the broken invariant.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    pub(crate) name: String,
    pub(crate) batch_size: usize,
    pub(crate) pool_size: usize,
    pub(crate) queue_size: Option<usize>,
    pub(crate) timeout: Duration,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) queue: QueueStrategy,
}

#[bon]
impl Config {
    #[allow(missing_docs)]
    #[builder]
    pub fn new(
        /// Flush a worker's batch once it holds this many items. Must be greater than zero.
        batch_size: usize,
        /// The number of workers. Must be greater than zero.
        pool_size: usize,
        /// Flush a non-empty batch after roughly this long. Must be positive.
        timeout: Duration,
        /// Capacity of the intake queue. Defaults to `1000 * batch_size` when unset or zero.
        queue_size: Option<usize>,
        /// Stop the engine when this token is cancelled.
        cancel: Option<CancellationToken>,
        /// Defaults to [`QueueStrategy::Blocking`].
        #[builder(default)]
        queue: QueueStrategy,
        /// Used to identify the engine in traces.
        #[builder(into, default = DEFAULT_NAME.to_string())]
        name: String,
    ) -> Self {
        Self {
            name,
            batch_size,
            pool_size,
            queue_size,
            timeout,
            cancel,
            queue,
        }
    }

    /// Check every invariant, resolving defaults.
    pub(crate) fn validate(&self) -> Result<Settings, BuildError> {
        if self.batch_size == 0 {
            return Err(BuildError::ZeroBatchSize);
        }
        if self.pool_size == 0 {
            return Err(BuildError::ZeroPoolSize);
        }
        if self.timeout.is_zero() {
            return Err(BuildError::ZeroTimeout);
        }

        let queue_size = match self.queue_size {
            None | Some(0) => self.batch_size.saturating_mul(DEFAULT_QUEUE_BATCHES),
            Some(size) => size,
        };
        let max = self.queue.max_queue_size();
        if queue_size > max {
            return Err(BuildError::QueueTooLarge {
                requested: queue_size,
                max,
            });
        }

        if let QueueStrategy::Ring(backoff) = &self.queue {
            backoff.validate()?;
        }

        Ok(Settings {
            batch_size: self.batch_size,
            pool_size: self.pool_size,
            queue_size,
            timeout: self.timeout,
        })
    }
}

/// Validated numeric settings shared by the engine and its workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Settings {
    pub(crate) batch_size: usize,
    pub(crate) pool_size: usize,
    pub(crate) queue_size: usize,
    pub(crate) timeout: Duration,
}

impl Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch_size: {}, pool_size: {}, queue_size: {}, timeout: {:?}",
            self.batch_size, self.pool_size, self.queue_size, self.timeout
        )
    }
}
