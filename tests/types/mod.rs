use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use flush_pool::{Config, Engine, Processor};
use tokio::sync::{mpsc, Semaphore};

/// Records every batch it is given, and signals the size of each one.
#[derive(Debug)]
pub struct RecordingProcessor<T> {
    batches: Arc<Mutex<Vec<Vec<T>>>>,
    flushed_tx: mpsc::UnboundedSender<usize>,
    delay: Duration,
}

impl<T> Clone for RecordingProcessor<T> {
    fn clone(&self) -> Self {
        Self {
            batches: Arc::clone(&self.batches),
            flushed_tx: self.flushed_tx.clone(),
            delay: self.delay,
        }
    }
}

impl<T: Clone> RecordingProcessor<T> {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<usize>) {
        Self::with_delay(Duration::ZERO)
    }

    /// Each batch takes `delay` to process.
    pub fn with_delay(delay: Duration) -> (Self, mpsc::UnboundedReceiver<usize>) {
        let (flushed_tx, flushed_rx) = mpsc::unbounded_channel();
        (
            Self {
                batches: Arc::default(),
                flushed_tx,
                delay,
            },
            flushed_rx,
        )
    }

    pub fn batches(&self) -> Vec<Vec<T>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }

    pub fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    /// Every item processed so far, in processing order.
    pub fn items(&self) -> Vec<T> {
        self.batches.lock().unwrap().concat()
    }
}

impl<T: 'static + Send> Processor for RecordingProcessor<T> {
    type Item = T;
    type Error = String;

    async fn process(&self, items: Vec<T>) -> Vec<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let len = items.len();
        self.batches.lock().unwrap().push(items);
        let _ = self.flushed_tx.send(len);
        Vec::new()
    }
}

/// Blocks inside `process` until a permit is released for each batch.
#[derive(Debug, Clone)]
pub struct GatedProcessor {
    pub gate: Arc<Semaphore>,
    pub processed: Arc<Mutex<Vec<u32>>>,
}

impl GatedProcessor {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            processed: Arc::default(),
        }
    }

    /// Let every batch through from now on.
    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    pub fn processed(&self) -> Vec<u32> {
        let mut processed = self.processed.lock().unwrap().clone();
        processed.sort_unstable();
        processed
    }
}

impl Processor for GatedProcessor {
    type Item = u32;
    type Error = String;

    async fn process(&self, items: Vec<u32>) -> Vec<String> {
        self.gate.acquire().await.unwrap().forget();
        self.processed.lock().unwrap().extend(items);
        Vec::new()
    }
}

/// Reports an error for every odd item.
#[derive(Debug, Clone)]
pub struct OddFailingProcessor {
    pub processed: Arc<Mutex<Vec<u32>>>,
}

impl Processor for OddFailingProcessor {
    type Item = u32;
    type Error = String;

    async fn process(&self, items: Vec<u32>) -> Vec<String> {
        let errors = items
            .iter()
            .filter(|i| *i % 2 == 1)
            .map(|i| format!("item {i} is odd"))
            .collect();
        self.processed.lock().unwrap().extend(items);
        errors
    }
}

pub fn engine<P: Processor>(processor: P, config: Config) -> Engine<P> {
    Engine::new(processor, config).expect("config should be valid")
}
