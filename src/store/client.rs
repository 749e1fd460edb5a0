//! Storage backend seam consumed by the collector. Houses the `TableStore`
//! trait, the scan request/page types, and the error taxonomy used to decide
//! what gets retried.

use futures::future::BoxFuture;
use std::collections::HashMap;
use thiserror::Error;

/// Hard limit on the number of keys a single batch-delete call may carry.
pub const MAX_BATCH_KEYS: usize = 25;

/// A scanned item reduced to its projected string attributes.
pub type Item = HashMap<String, String>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{operation} on table {table} was throttled: {message}")]
    Throttled {
        operation: &'static str,
        table: String,
        message: String,
    },
    #[error("{operation} on table {table} failed: {message}")]
    Backend {
        operation: &'static str,
        table: String,
        message: String,
    },
    #[error("invalid {operation} request for table {table}: {message}")]
    InvalidRequest {
        operation: &'static str,
        table: String,
        message: String,
    },
}

impl StoreError {
    /// Throttling is the only error class worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Throttled { .. })
    }

    pub fn operation(&self) -> &'static str {
        match self {
            StoreError::Throttled { operation, .. }
            | StoreError::Backend { operation, .. }
            | StoreError::InvalidRequest { operation, .. } => operation,
        }
    }
}

/// Attribute-projected scan over one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub table: String,
    pub projection: Vec<String>,
}

impl ScanRequest {
    pub fn new(table: impl Into<String>, projection: Vec<String>) -> Self {
        Self {
            table: table.into(),
            projection,
        }
    }
}

/// One page of scan results plus the cursor for the next page, if any.
#[derive(Debug)]
pub struct ScanPage<C> {
    pub items: Vec<Item>,
    pub next: Option<C>,
}

impl<C> ScanPage<C> {
    pub fn last(items: Vec<Item>) -> Self {
        Self { items, next: None }
    }
}

/// Key-value table backend offering paginated scans and keyed deletes.
///
/// Deletes are idempotent by key: removing a key that is already gone succeeds.
pub trait TableStore: Send + Sync + 'static {
    /// Opaque continuation token returned by [`TableStore::scan`].
    type Cursor: Clone + Send + Sync + 'static;

    fn scan<'a>(
        &'a self,
        request: &'a ScanRequest,
        cursor: Option<Self::Cursor>,
    ) -> BoxFuture<'a, Result<ScanPage<Self::Cursor>, StoreError>>;

    /// Deletes up to [`MAX_BATCH_KEYS`] keys and returns the keys the backend
    /// left unprocessed.
    fn batch_delete<'a>(
        &'a self,
        table: &'a str,
        key_attribute: &'a str,
        keys: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<String>, StoreError>>;

    fn delete_one<'a>(
        &'a self,
        table: &'a str,
        key_attribute: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<(), StoreError>>;
}
