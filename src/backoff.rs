use std::time::Duration;

use bon::bon;
use rand::Rng;
use tokio::time::Instant;

use crate::error::BuildError;

/// Exponential backoff used when submitting to a full [`QueueStrategy::Ring`] queue.
///
/// Each retry waits for the current interval, randomised by `± randomization_factor`, then
/// multiplies the interval by `multiplier` up to `max_interval`. Retrying stops once waiting again
/// would exceed `max_elapsed_time`.
///
/// [`QueueStrategy::Ring`]: crate::QueueStrategy::Ring
#[derive(Debug, Clone, Copy, PartialEq)]
#[non_exhaustive]
pub struct Backoff {
    pub(crate) initial_interval: Duration,
    pub(crate) randomization_factor: f64,
    pub(crate) multiplier: f64,
    pub(crate) max_interval: Duration,
    pub(crate) max_elapsed_time: Duration,
}

#[bon]
impl Backoff {
    #[allow(missing_docs)]
    #[builder]
    pub fn new(
        /// The first interval to wait after finding the queue full.
        #[builder(default = Duration::from_millis(10))]
        initial_interval: Duration,
        /// Intervals are randomised within `interval * (1 ± randomization_factor)`. Clamped to
        /// `0.0..=1.0`.
        #[builder(default = 0.5)]
        randomization_factor: f64,
        /// Growth factor applied to the interval after each attempt. Values below `1.0` are
        /// treated as `1.0`.
        #[builder(default = 1.5)]
        multiplier: f64,
        /// The interval stops growing once it reaches this value.
        #[builder(default = Duration::from_millis(300))]
        max_interval: Duration,
        /// The total time budget for retrying a single submission.
        #[builder(default = Duration::from_secs(30))]
        max_elapsed_time: Duration,
    ) -> Self {
        Self {
            initial_interval,
            randomization_factor: randomization_factor.clamp(0.0, 1.0),
            multiplier: multiplier.max(1.0),
            max_interval,
            max_elapsed_time,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), BuildError> {
        if self.initial_interval.is_zero() {
            return Err(BuildError::ZeroBackoffInterval(self.initial_interval));
        }
        Ok(())
    }

    /// The total time budget for retrying a single submission.
    pub fn max_elapsed_time(&self) -> Duration {
        self.max_elapsed_time
    }

    /// Start a fresh retry sequence.
    pub(crate) fn start(&self) -> Retry {
        Retry {
            policy: *self,
            current: self.initial_interval,
            started_at: Instant::now(),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// The state of one retry sequence.
#[derive(Debug)]
pub(crate) struct Retry {
    policy: Backoff,
    current: Duration,
    started_at: Instant,
}

impl Retry {
    /// How long to wait before the next attempt, or `None` if the budget is spent.
    pub(crate) fn next_backoff(&mut self) -> Option<Duration> {
        let next = randomise(
            self.current,
            self.policy.randomization_factor,
            self.policy.max_interval,
        );

        match self.started_at.elapsed().checked_add(next) {
            Some(end) if end <= self.policy.max_elapsed_time => {}
            _ => return None,
        }

        self.current =
            Duration::try_from_secs_f64(self.current.as_secs_f64() * self.policy.multiplier)
                .unwrap_or(self.policy.max_interval)
                .min(self.policy.max_interval);

        Some(next)
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Falls back to `max` when the randomised interval is not representable.
fn randomise(interval: Duration, factor: f64, max: Duration) -> Duration {
    if factor == 0.0 {
        return interval;
    }
    let delta = interval.as_secs_f64() * factor;
    let lower = interval.as_secs_f64() - delta;
    let upper = interval.as_secs_f64() + delta;
    Duration::try_from_secs_f64(rand::rng().random_range(lower..=upper)).unwrap_or(max)
}
