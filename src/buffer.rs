use std::mem;

/// Upper bound on how much is preallocated for a fresh batch.
const MAX_PREALLOCATED: usize = 1024;

/// Items a single worker has taken but not yet flushed.
#[derive(Debug)]
pub(crate) struct BatchBuffer<T> {
    items: Vec<T>,
    threshold: usize,
}

impl<T> BatchBuffer<T> {
    pub(crate) fn new(threshold: usize) -> Self {
        Self {
            items: Self::allocate(threshold),
            threshold,
        }
    }

    fn allocate(threshold: usize) -> Vec<T> {
        Vec::with_capacity(threshold.min(MAX_PREALLOCATED))
    }

    /// Append an item, returning whether the buffer has reached its threshold.
    pub(crate) fn push(&mut self, item: T) -> bool {
        self.items.push(item);
        self.is_full()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.items.len() >= self.threshold
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Hand over everything buffered so far, leaving the buffer empty.
    pub(crate) fn take(&mut self) -> Vec<T> {
        mem::replace(&mut self.items, Self::allocate(self.threshold))
    }
}
