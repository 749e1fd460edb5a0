//! Delete path: batching eligible keys, the bounded worker dispatcher, and the
//! per-batch executor with its exponential backoff.

pub(crate) mod backoff;
pub mod batch;
pub mod dispatcher;
pub mod executor;

pub use batch::{BatchAccumulator, OrphanBatch};
pub use dispatcher::{BatchDispatcher, DispatcherParams};
pub use executor::{BatchDeleteExecutor, DeleteFailure, DeleteOutcome};
