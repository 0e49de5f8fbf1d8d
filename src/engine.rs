use std::{fmt::Debug, sync::Arc};

use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::{
    config::Config,
    error::{AddError, AddResult, BuildError},
    intake::Intake,
    processor::Processor,
    worker::{PoolDropGuard, WorkerPool},
};

/// Accumulates items into batches across a pool of workers.
///
/// Items submitted with [`add`](Engine::add) go into a shared bounded queue. Each of the
/// `pool_size` workers takes items from the queue into its own batch, and hands the batch to the
/// [`Processor`] when it reaches `batch_size` or when its flush timer expires, whichever comes
/// first. Timers are staggered across workers so they don't all flush at once.
///
/// Cheap to clone. Cloned instances share the same queue and workers.
///
/// ## Ordering
///
/// Items taken by the same worker are processed in the order it took them. There is no ordering
/// between workers: two items added one after the other may be processed in either order.
///
/// ## Drop
///
/// When the last instance of an `Engine` is dropped, the workers are told to stop. They drain the
/// queue in the background.
///
/// If you want to wait for everything to be processed, call [`Engine::stop()`].
pub struct Engine<P: Processor> {
    name: String,
    intake: Arc<Intake<P::Item>>,
    pool: Arc<WorkerPool>,
    pool_guard: Arc<PoolDropGuard>,
}

/// Where an [`Engine`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineState {
    /// Accepting items.
    Running,
    /// No longer accepting items. Workers are draining what was already accepted.
    Stopping,
    /// Every worker has exited. Terminal.
    Stopped,
}

impl<P: Processor> Engine<P> {
    /// Create a new engine and start its workers on the current Tokio runtime.
    ///
    /// Fails if the config is invalid, or if there is no runtime to spawn the workers on.
    pub fn new(processor: P, config: Config) -> Result<Self, BuildError> {
        let settings = config.validate()?;
        let runtime = Handle::try_current().map_err(|_| BuildError::NoRuntime)?;

        // A child token, so stopping this engine never cancels the caller's token.
        let cancel = config
            .cancel
            .as_ref()
            .map(|parent| parent.child_token())
            .unwrap_or_default();

        let intake = Arc::new(Intake::new(
            config.queue,
            settings.queue_size,
            cancel.clone(),
        ));

        let (pool, pool_guard) = WorkerPool::spawn(
            &runtime,
            &config.name,
            processor,
            Arc::clone(&intake),
            settings,
            cancel,
        );

        info!("Batch engine '{}' started with {}", config.name, settings);

        Ok(Self {
            name: config.name,
            intake,
            pool: Arc::new(pool),
            pool_guard: Arc::new(pool_guard),
        })
    }

    /// Submit an item to be batched and processed.
    ///
    /// Waits while the queue is full. With [`QueueStrategy::Ring`](crate::QueueStrategy::Ring) it
    /// retries with backoff instead, and gives up once the retry budget is spent.
    ///
    /// Returns once the item is queued, not once it has been processed. On failure the item is
    /// handed back inside the error.
    pub async fn add(&self, item: P::Item) -> AddResult<P::Item> {
        if self.pool.is_shutting_down() {
            debug!("Batch engine '{}' rejected an item: stopped", self.name);
            return Err(AddError::Stopped(item));
        }

        let result = self.intake.submit(item).await;
        if let Err(err) = &result {
            debug!("Batch engine '{}' rejected an item: {}", self.name, err);
        }
        result
    }

    /// Stop accepting items, process everything already accepted, and wait for every worker to
    /// exit.
    ///
    /// Idempotent, and safe to call concurrently: every caller returns only once all workers have
    /// exited. After it returns the processor is never called again.
    ///
    /// There is no timeout. A processor that never returns will block this forever.
    pub async fn stop(&self) {
        self.intake.close();
        self.pool.shut_down();

        if self.pool.wait_for_shutdown().await {
            info!("Batch engine '{}' has stopped", self.name);
        }
    }

    /// Where the engine is in its lifecycle.
    pub fn state(&self) -> EngineState {
        if self.pool.running() == 0 {
            EngineState::Stopped
        } else if self.pool.is_shutting_down() || !self.intake.is_open() {
            EngineState::Stopping
        } else {
            EngineState::Running
        }
    }

    /// The number of occupied queue slots: items queued but not yet taken by a worker.
    ///
    /// With [`QueueStrategy::Blocking`](crate::QueueStrategy::Blocking) this also counts slots a
    /// concurrent [`add`](Engine::add) has claimed and is about to fill. It never exceeds
    /// [`capacity`](Engine::capacity).
    pub fn queued(&self) -> usize {
        self.intake.len()
    }

    /// The maximum number of items the queue can hold.
    pub fn capacity(&self) -> usize {
        self.intake.capacity()
    }

    /// The name used to identify this engine in traces.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<P: Processor> Clone for Engine<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            intake: Arc::clone(&self.intake),
            pool: Arc::clone(&self.pool),
            pool_guard: Arc::clone(&self.pool_guard),
        }
    }
}

impl<P: Processor> Debug for Engine<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.name)
            .field("intake", &self.intake)
            .field("pool", &self.pool)
            .field("[derived] state", &self.state())
            .finish()
    }
}
