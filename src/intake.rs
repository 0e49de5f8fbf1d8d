use std::{
    fmt::{self, Debug},
    sync::{PoisonError, RwLock},
    time::Duration,
};

use crossbeam_queue::ArrayQueue;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    backoff::Backoff,
    config::QueueStrategy,
    error::{AddError, AddResult},
};

/// How long a worker sleeps after finding the ring buffer empty.
pub(crate) const EMPTY_POLL_INTERVAL: Duration = Duration::from_millis(30);

/// The bounded queue shared by every producer and every worker.
///
/// Admission goes through a gate. Once [`close`](Intake::close) returns, no push can land, so a
/// drain that starts afterwards sees every item that was ever accepted.
pub(crate) struct Intake<T> {
    open: RwLock<bool>,
    backing: Backing<T>,
    capacity: usize,
    cancel: CancellationToken,
}

enum Backing<T> {
    Blocking {
        tx: mpsc::Sender<T>,
        rx: Mutex<mpsc::Receiver<T>>,
    },
    Ring {
        buffer: ArrayQueue<T>,
        backoff: Backoff,
    },
}

enum Push<T> {
    Pushed,
    Full(T),
    Closed(T),
}

impl<T: Send> Intake<T> {
    /// `capacity` must be non-zero.
    pub(crate) fn new(strategy: QueueStrategy, capacity: usize, cancel: CancellationToken) -> Self {
        let backing = match strategy {
            QueueStrategy::Blocking => {
                let (tx, rx) = mpsc::channel(capacity);
                Backing::Blocking {
                    tx,
                    rx: Mutex::new(rx),
                }
            }
            QueueStrategy::Ring(backoff) => Backing::Ring {
                buffer: ArrayQueue::new(capacity),
                backoff,
            },
        };

        Self {
            open: RwLock::new(true),
            backing,
            capacity,
            cancel,
        }
    }

    /// Enqueue an item, waiting (or retrying) while the queue is full.
    ///
    /// Fails with the item once the queue is closed or cancelled.
    pub(crate) async fn submit(&self, item: T) -> AddResult<T> {
        if !self.is_open() {
            return Err(AddError::Stopped(item));
        }

        match &self.backing {
            Backing::Blocking { tx, .. } => {
                let permit = tokio::select! {
                    biased;

                    _ = self.cancel.cancelled() => return Err(AddError::Stopped(item)),

                    permit = tx.reserve() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return Err(AddError::Stopped(item)),
                    },
                };

                match self.push_if_open(item, move |item| {
                    permit.send(item);
                    Ok(())
                }) {
                    Push::Pushed => Ok(()),
                    Push::Full(item) | Push::Closed(item) => Err(AddError::Stopped(item)),
                }
            }

            Backing::Ring { buffer, backoff } => {
                let mut retry = backoff.start();
                let mut item = item;
                loop {
                    match self.push_if_open(item, |item| buffer.push(item)) {
                        Push::Pushed => return Ok(()),
                        Push::Closed(rejected) => return Err(AddError::Stopped(rejected)),
                        Push::Full(rejected) => {
                            let Some(wait) = retry.next_backoff() else {
                                debug!(
                                    elapsed = ?retry.elapsed(),
                                    "Ring buffer stayed full, giving up on submission"
                                );
                                return Err(AddError::RetryExhausted(rejected, retry.elapsed()));
                            };

                            tokio::select! {
                                biased;

                                _ = self.cancel.cancelled() => {
                                    return Err(AddError::Stopped(rejected));
                                }

                                _ = tokio::time::sleep(wait) => {}
                            }

                            item = rejected;
                        }
                    }
                }
            }
        }
    }

    /// Push while holding the gate open, so `close` cannot interleave with the push.
    fn push_if_open(&self, item: T, push: impl FnOnce(T) -> Result<(), T>) -> Push<T> {
        let open = self.open.read().unwrap_or_else(PoisonError::into_inner);
        if !*open || self.cancel.is_cancelled() {
            return Push::Closed(item);
        }
        match push(item) {
            Ok(()) => Push::Pushed,
            Err(item) => Push::Full(item),
        }
    }

    /// Wait for the next item.
    ///
    /// Cancel safe: dropping the future never loses an item.
    pub(crate) async fn take(&self) -> T {
        match &self.backing {
            Backing::Blocking { rx, .. } => {
                let mut rx = rx.lock().await;
                match rx.recv().await {
                    Some(item) => item,
                    // We hold a sender, so the channel never closes.
                    None => std::future::pending().await,
                }
            }

            Backing::Ring { buffer, .. } => loop {
                if let Some(item) = buffer.pop() {
                    return item;
                }
                tokio::time::sleep(EMPTY_POLL_INTERVAL).await;
            },
        }
    }

    /// Take an item that is already queued, without waiting for new ones.
    pub(crate) async fn try_take(&self) -> Option<T> {
        match &self.backing {
            Backing::Blocking { rx, .. } => rx.lock().await.try_recv().ok(),
            Backing::Ring { buffer, .. } => buffer.pop(),
        }
    }

    /// Stop admitting items. Idempotent.
    pub(crate) fn close(&self) {
        let mut open = self.open.write().unwrap_or_else(PoisonError::into_inner);
        *open = false;
    }

    pub(crate) fn is_open(&self) -> bool {
        *self.open.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// The number of occupied slots.
    ///
    /// With the blocking backing this includes slots a producer has claimed but not yet filled,
    /// so it can briefly run ahead of the number of items a worker could take.
    pub(crate) fn len(&self) -> usize {
        match &self.backing {
            Backing::Blocking { tx, .. } => tx.max_capacity() - tx.capacity(),
            Backing::Ring { buffer, .. } => buffer.len(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Debug for Intake<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strategy = match &self.backing {
            Backing::Blocking { .. } => "blocking",
            Backing::Ring { .. } => "ring",
        };
        f.debug_struct("Intake")
            .field("strategy", &strategy)
            .field("capacity", &self.capacity)
            .field(
                "open",
                &*self.open.read().unwrap_or_else(PoisonError::into_inner),
            )
            .finish()
    }
}
