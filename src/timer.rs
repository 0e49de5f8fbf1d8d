use std::{pin::Pin, time::Duration};

use rand::Rng;
use tokio::time::{Instant, Sleep};

use crate::config::Settings;

/// Timeouts never drop below this, however large the flushed batch.
pub(crate) fn floor(base: Duration) -> Duration {
    (base / 10).max(Duration::from_millis(1))
}

/// The delay until a worker's next forced flush.
///
/// Workers are phase-shifted by their index so they don't all fire together, `jitter` keeps them
/// from drifting back into step, and workers that just flushed a large batch come round sooner.
///
/// ```text
/// base + id * base / (pool_size + 1) + jitter - flushed_len * base / (10 * batch_size)
/// ```
pub(crate) fn next_timeout(
    worker_id: usize,
    settings: &Settings,
    flushed_len: usize,
    jitter: Duration,
) -> Duration {
    let base = settings.timeout.as_nanos();

    let offset = base * worker_id as u128 / (settings.pool_size as u128 + 1);
    let batch_factor = base * flushed_len as u128 / (10 * settings.batch_size as u128);

    let next = (base + offset + jitter.as_nanos()).saturating_sub(batch_factor);

    from_nanos(next).max(floor(settings.timeout))
}

/// A uniformly random duration in `0..=base / 10`.
pub(crate) fn sample_jitter(base: Duration) -> Duration {
    let max = u64::try_from(base.as_nanos() / 10).unwrap_or(u64::MAX);
    Duration::from_nanos(rand::rng().random_range(0..=max))
}

fn from_nanos(nanos: u128) -> Duration {
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// A worker's forced-flush deadline.
#[derive(Debug)]
pub(crate) struct FlushTimer {
    worker_id: usize,
    settings: Settings,
    sleep: Pin<Box<Sleep>>,
}

impl FlushTimer {
    /// Start the timer as though an empty batch had just been flushed.
    pub(crate) fn new(worker_id: usize, settings: Settings) -> Self {
        let first = next_timeout(worker_id, &settings, 0, sample_jitter(settings.timeout));
        Self {
            worker_id,
            settings,
            sleep: Box::pin(tokio::time::sleep(first)),
        }
    }

    /// Move the deadline, seeded by the size of the batch just flushed. Returns the new timeout.
    pub(crate) fn reschedule(&mut self, flushed_len: usize) -> Duration {
        let timeout = next_timeout(
            self.worker_id,
            &self.settings,
            flushed_len,
            sample_jitter(self.settings.timeout),
        );
        self.sleep.as_mut().reset(Instant::now() + timeout);
        timeout
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.sleep.deadline()
    }

    /// Completes once the deadline passes. Keeps completing until rescheduled.
    pub(crate) async fn expired(&mut self) {
        self.sleep.as_mut().await
    }
}
