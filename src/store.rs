//! Storage backend plumbing: the `TableStore` seam, its error taxonomy, an
//! in-memory backend, and (behind the `dynamodb` feature) the DynamoDB client.

pub mod client;
#[cfg(feature = "dynamodb")]
pub mod dynamodb;
pub mod memory;

pub use client::{Item, ScanPage, ScanRequest, StoreError, TableStore, MAX_BATCH_KEYS};
#[cfg(feature = "dynamodb")]
pub use dynamodb::DynamoTableStore;
pub use memory::{DeleteCall, MemoryTableStore, StoreFault};
