use std::{
    fmt::{Debug, Display},
    future::Future,
};

/// Process a batch of items.
///
/// Should be cheap to clone. Each worker holds its own clone.
pub trait Processor: 'static + Send + Clone {
    /// The type of each submitted item.
    type Item: 'static + Send;
    /// The error type reported for individual items.
    type Error: 'static + Send + Display + Debug;

    /// Process a batch.
    ///
    /// `items` is never empty, and arrives in the order the worker received them. Ownership of the
    /// batch passes to the processor.
    ///
    /// Returned errors are recorded as tracing events and otherwise ignored: the batch is never
    /// retried, and the errors need not line up with `items`. Return an empty `Vec` on success.
    fn process(
        &self,
        items: Vec<Self::Item>,
    ) -> impl Future<Output = Vec<Self::Error>> + Send;
}
