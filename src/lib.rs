//! Accumulate items into batches across a pool of workers, flushing on size or time.
//!
//! Sometimes it is more efficient to process many items at once rather than one at a time, e.g. a
//! bulk insert instead of many single-row inserts. But waiting for a full batch can take
//! arbitrarily long when traffic is light.
//!
//! Callers submit items one at a time to an [`Engine`]. Items go into a bounded queue shared by a
//! fixed pool of worker tasks. Each worker collects items into its own batch and hands it to a
//! [`Processor`] as soon as it holds `batch_size` items, or when its flush timer expires with a
//! partial batch.
//!
//! Flush timers are staggered per worker, jittered, and shortened after large batches, so that
//! workers don't flush in lockstep and spike load on whatever the processor writes to.
//!
//! See the README for an example.

#![deny(missing_docs)]

#[cfg(doctest)]
use doc_comment::doctest;
#[cfg(doctest)]
doctest!("../README.md");

mod backoff;
mod buffer;
mod config;
mod engine;
pub mod error;
mod intake;
mod processor;
mod timer;
mod worker;

pub use backoff::Backoff;
pub use config::{Config, QueueStrategy, DEFAULT_QUEUE_BATCHES, MAX_RING_QUEUE_SIZE};
pub use engine::{Engine, EngineState};
pub use error::{AddError, BuildError};
pub use processor::Processor;
