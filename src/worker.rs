use std::{
    fmt::{self, Display},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use tokio::{runtime::Handle, sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{
    debug, error, info, info_span, instrument::WithSubscriber, span, trace, warn, Instrument,
    Level,
};

use crate::{
    buffer::BatchBuffer, config::Settings, intake::Intake, processor::Processor,
    timer::FlushTimer,
};

/// Why a batch was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    /// The batch reached the size threshold.
    Size,
    /// The flush timer expired with items buffered.
    Timeout,
    /// The worker is shutting down.
    Drain,
}

impl Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trigger::Size => "size",
            Trigger::Timeout => "timeout",
            Trigger::Drain => "drain",
        })
    }
}

pub(crate) struct Worker<P: Processor> {
    id: usize,

    /// Shared with every other worker and every producer.
    intake: Arc<Intake<P::Item>>,
    /// The callback to process a batch of items.
    processor: P,

    /// Items taken but not yet flushed. Private to this worker.
    buffer: BatchBuffer<P::Item>,
    /// When to force a flush of a partial batch. Private to this worker.
    timer: FlushTimer,

    /// Signals that the worker should drain and stop.
    cancel: CancellationToken,
}

/// The set of workers owned by an engine.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

/// Signals the workers to drain and stop when dropped.
#[derive(Debug)]
pub(crate) struct PoolDropGuard {
    cancel: CancellationToken,
}

/// Decrements the running worker count when a worker task ends, however it ends.
struct RunningGuard(Arc<AtomicUsize>);

impl<P: Processor> Worker<P> {
    fn new(
        id: usize,
        intake: Arc<Intake<P::Item>>,
        processor: P,
        settings: Settings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            intake,
            processor,
            buffer: BatchBuffer::new(settings.batch_size),
            timer: FlushTimer::new(id, settings),
            cancel,
        }
    }

    /// Wait for items or the timer until cancelled, then drain.
    ///
    /// When several wakeups are ready at once, cancellation wins, then a queued item, then the
    /// timer.
    async fn run(mut self) {
        info!(deadline = ?self.timer.deadline(), "Batch worker {} started", self.id);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                item = self.intake.take() => {
                    self.add(item).await;
                }

                _ = self.timer.expired() => {
                    self.on_timeout().await;
                }
            }
        }

        self.drain().await;

        info!("Batch worker {} has stopped", self.id);
    }

    async fn add(&mut self, item: P::Item) {
        if self.buffer.push(item) {
            self.flush(Trigger::Size).await;
        }
    }

    async fn on_timeout(&mut self) {
        if self.buffer.is_empty() {
            let next = self.timer.reschedule(0);
            debug!(?next, "Flush timer fired with nothing buffered");
        } else {
            self.flush(Trigger::Timeout).await;
        }
    }

    /// Take everything still queued, then flush the remainder once.
    async fn drain(&mut self) {
        // Nothing can be admitted after this, so the queue only shrinks from here.
        self.intake.close();

        while let Some(item) = self.intake.try_take().await {
            if self.buffer.push(item) {
                self.flush(Trigger::Drain).await;
            }
        }

        if !self.buffer.is_empty() {
            self.flush(Trigger::Drain).await;
        }
    }

    async fn flush(&mut self, trigger: Trigger) {
        let batch = self.buffer.take();
        let batch_size = batch.len();

        if batch_size > 0 {
            Self::process(self.id, self.processor.clone(), batch, trigger).await;
        }

        let next = self.timer.reschedule(batch_size);
        trace!(?next, "Rescheduled flush timer");
    }

    async fn process(worker_id: usize, processor: P, batch: Vec<P::Item>, trigger: Trigger) {
        let batch_size = batch.len();

        let span = span!(Level::INFO, "process batch",
            worker.id = worker_id,
            // Convert to u64 so tracing will treat this as an integer instead of a string.
            batch.size = batch_size as u64,
            batch.trigger = %trigger,
        );

        // Spawn a task so we can catch panics.
        let result = tokio::spawn(
            async move { processor.process(batch).await }
                .instrument(span.clone())
                .with_current_subscriber(),
        )
        .await;

        span.in_scope(|| match result {
            Ok(errors) if errors.is_empty() => {}
            Ok(errors) => {
                warn!(
                    failed = errors.len() as u64,
                    "Processor reported errors for {} of {} items",
                    errors.len(),
                    batch_size
                );
                for err in errors {
                    debug!(error = %err, "Item failed");
                }
            }
            Err(join_err) => {
                error!(
                    "Processing a batch of {} items panicked, the batch is lost: {}",
                    batch_size, join_err
                );
            }
        });
    }
}

impl WorkerPool {
    pub(crate) fn spawn<P: Processor>(
        runtime: &Handle,
        engine_name: &str,
        processor: P,
        intake: Arc<Intake<P::Item>>,
        settings: Settings,
        cancel: CancellationToken,
    ) -> (Self, PoolDropGuard) {
        let running = Arc::new(AtomicUsize::new(settings.pool_size));

        let handles = (0..settings.pool_size)
            .map(|id| {
                let intake = Arc::clone(&intake);
                let processor = processor.clone();
                let cancel = cancel.clone();
                let running_guard = RunningGuard(Arc::clone(&running));
                let span = info_span!("batch worker", engine.name = engine_name, worker.id = id);

                runtime.spawn(
                    async move {
                        let _running_guard = running_guard;
                        Worker::new(id, intake, processor, settings, cancel)
                            .run()
                            .await;
                    }
                    .instrument(span)
                    .with_current_subscriber(),
                )
            })
            .collect();

        (
            Self {
                handles: Mutex::new(handles),
                running,
                cancel: cancel.clone(),
            },
            PoolDropGuard { cancel },
        )
    }

    /// Signal every worker to drain and stop. Idempotent.
    pub(crate) fn shut_down(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The number of worker tasks that have not yet finished.
    pub(crate) fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    /// Wait for every worker to finish.
    ///
    /// Concurrent callers all wait until the last worker has exited. Returns `true` for the caller
    /// that observed the workers finishing.
    pub(crate) async fn wait_for_shutdown(&self) -> bool {
        let mut handles = self.handles.lock().await;
        if handles.is_empty() {
            return false;
        }

        // Only forget a handle once it has finished, in case this future is dropped part way.
        while let Some(handle) = handles.last_mut() {
            if let Err(join_err) = handle.await {
                error!("Batch worker ended abnormally: {}", join_err);
            }
            handles.pop();
        }
        true
    }
}

impl Drop for PoolDropGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
