//! In-process `TableStore` backed by ordered maps. Pages scans, projects
//! attributes, enforces the batch-delete key limit, and can replay scripted
//! faults so throttling and partial failures can be exercised without a real
//! backend.

use crate::store::client::{
    Item, ScanPage, ScanRequest, StoreError, TableStore, MAX_BATCH_KEYS,
};
use futures::future::{self, BoxFuture};
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard, PoisonError};

const DEFAULT_PAGE_SIZE: usize = 100;

/// Scripted backend misbehaviour, consumed one per matching call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreFault {
    /// Delete everything except the last `n` keys, which are reported unprocessed.
    Unprocessed(usize),
    Throttle,
    Fail(String),
}

/// Delete call as observed by the store, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteCall {
    Batch { table: String, keys: Vec<String> },
    Single { table: String, key: String },
}

struct MemoryTable {
    key_attribute: String,
    rows: BTreeMap<String, Item>,
}

#[derive(Default)]
struct Faults {
    scan: VecDeque<StoreFault>,
    delete: VecDeque<StoreFault>,
}

pub struct MemoryTableStore {
    tables: Mutex<BTreeMap<String, MemoryTable>>,
    faults: Mutex<Faults>,
    calls: Mutex<Vec<DeleteCall>>,
    page_size: usize,
}

impl Default for MemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            tables: Mutex::new(BTreeMap::new()),
            faults: Mutex::new(Faults::default()),
            calls: Mutex::new(Vec::new()),
            page_size: page_size.max(1),
        }
    }

    /// Creates (or replaces) an empty table keyed by `key_attribute`.
    pub fn create_table(&self, table: impl Into<String>, key_attribute: impl Into<String>) {
        lock(&self.tables).insert(
            table.into(),
            MemoryTable {
                key_attribute: key_attribute.into(),
                rows: BTreeMap::new(),
            },
        );
    }

    pub fn put(&self, table: &str, item: Item) -> Result<(), StoreError> {
        let mut tables = lock(&self.tables);
        let target = tables
            .get_mut(table)
            .ok_or_else(|| missing_table("put", table))?;
        let key = item.get(&target.key_attribute).cloned().ok_or_else(|| {
            StoreError::InvalidRequest {
                operation: "put",
                table: table.to_owned(),
                message: format!("item is missing key attribute {}", target.key_attribute),
            }
        })?;
        target.rows.insert(key, item);
        Ok(())
    }

    pub fn contains(&self, table: &str, key: &str) -> bool {
        lock(&self.tables)
            .get(table)
            .map(|target| target.rows.contains_key(key))
            .unwrap_or(false)
    }

    pub fn len(&self, table: &str) -> usize {
        lock(&self.tables)
            .get(table)
            .map(|target| target.rows.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    pub fn keys(&self, table: &str) -> Vec<String> {
        lock(&self.tables)
            .get(table)
            .map(|target| target.rows.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn push_scan_fault(&self, fault: StoreFault) {
        lock(&self.faults).scan.push_back(fault);
    }

    pub fn push_delete_fault(&self, fault: StoreFault) {
        lock(&self.faults).delete.push_back(fault);
    }

    pub fn delete_calls(&self) -> Vec<DeleteCall> {
        lock(&self.calls).clone()
    }

    /// Sizes of every batch-delete call received so far.
    pub fn batch_sizes(&self) -> Vec<usize> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                DeleteCall::Batch { keys, .. } => Some(keys.len()),
                DeleteCall::Single { .. } => None,
            })
            .collect()
    }

    fn scan_now(
        &self,
        request: &ScanRequest,
        cursor: Option<String>,
    ) -> Result<ScanPage<String>, StoreError> {
        if let Some(fault) = lock(&self.faults).scan.pop_front() {
            fault_error(fault, "scan", &request.table)?;
        }

        let tables = lock(&self.tables);
        let target = tables
            .get(&request.table)
            .ok_or_else(|| missing_table("scan", &request.table))?;

        let lower = match cursor.as_ref() {
            Some(last) => Bound::Excluded(last.clone()),
            None => Bound::Unbounded,
        };
        let mut range = target.rows.range((lower, Bound::Unbounded));

        let mut items = Vec::with_capacity(self.page_size);
        let mut last_key = None;
        for (key, row) in range.by_ref().take(self.page_size) {
            items.push(project(row, &request.projection));
            last_key = Some(key.clone());
        }

        let next = if range.next().is_some() {
            last_key
        } else {
            None
        };
        Ok(ScanPage { items, next })
    }

    fn batch_delete_now(
        &self,
        table: &str,
        key_attribute: &str,
        keys: &[String],
    ) -> Result<Vec<String>, StoreError> {
        lock(&self.calls).push(DeleteCall::Batch {
            table: table.to_owned(),
            keys: keys.to_vec(),
        });

        if keys.is_empty() || keys.len() > MAX_BATCH_KEYS {
            return Err(StoreError::InvalidRequest {
                operation: "batch_delete",
                table: table.to_owned(),
                message: format!(
                    "batch must carry between 1 and {MAX_BATCH_KEYS} keys, got {}",
                    keys.len()
                ),
            });
        }

        let fault = lock(&self.faults).delete.pop_front();
        let processed = match fault {
            Some(StoreFault::Unprocessed(count)) => keys.len().saturating_sub(count),
            Some(other) => {
                fault_error(other, "batch_delete", table)?;
                keys.len()
            }
            None => keys.len(),
        };

        let mut tables = lock(&self.tables);
        let target = tables
            .get_mut(table)
            .ok_or_else(|| missing_table("batch_delete", table))?;
        ensure_key_attribute(target, "batch_delete", table, key_attribute)?;

        for key in &keys[..processed] {
            target.rows.remove(key);
        }
        Ok(keys[processed..].to_vec())
    }

    fn delete_one_now(&self, table: &str, key_attribute: &str, key: &str) -> Result<(), StoreError> {
        lock(&self.calls).push(DeleteCall::Single {
            table: table.to_owned(),
            key: key.to_owned(),
        });

        match lock(&self.faults).delete.pop_front() {
            Some(StoreFault::Unprocessed(count)) if count > 0 => {
                fault_error(StoreFault::Throttle, "delete_one", table)?;
            }
            Some(fault @ (StoreFault::Throttle | StoreFault::Fail(_))) => {
                fault_error(fault, "delete_one", table)?;
            }
            _ => {}
        }

        let mut tables = lock(&self.tables);
        let target = tables
            .get_mut(table)
            .ok_or_else(|| missing_table("delete_one", table))?;
        ensure_key_attribute(target, "delete_one", table, key_attribute)?;
        target.rows.remove(key);
        Ok(())
    }
}

impl TableStore for MemoryTableStore {
    type Cursor = String;

    fn scan<'a>(
        &'a self,
        request: &'a ScanRequest,
        cursor: Option<Self::Cursor>,
    ) -> BoxFuture<'a, Result<ScanPage<Self::Cursor>, StoreError>> {
        Box::pin(future::ready(self.scan_now(request, cursor)))
    }

    fn batch_delete<'a>(
        &'a self,
        table: &'a str,
        key_attribute: &'a str,
        keys: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<String>, StoreError>> {
        Box::pin(future::ready(self.batch_delete_now(table, key_attribute, keys)))
    }

    fn delete_one<'a>(
        &'a self,
        table: &'a str,
        key_attribute: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(future::ready(self.delete_one_now(table, key_attribute, key)))
    }
}

/// Builds an [`Item`] from attribute/value pairs.
pub fn item<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Item {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_owned(), value.to_owned()))
        .collect()
}

fn project(row: &Item, projection: &[String]) -> Item {
    if projection.is_empty() {
        return row.clone();
    }
    projection
        .iter()
        .filter_map(|name| row.get(name).map(|value| (name.clone(), value.clone())))
        .collect()
}

fn ensure_key_attribute(
    target: &MemoryTable,
    operation: &'static str,
    table: &str,
    key_attribute: &str,
) -> Result<(), StoreError> {
    if target.key_attribute != key_attribute {
        return Err(StoreError::InvalidRequest {
            operation,
            table: table.to_owned(),
            message: format!(
                "table is keyed by {}, not {key_attribute}",
                target.key_attribute
            ),
        });
    }
    Ok(())
}

fn fault_error(fault: StoreFault, operation: &'static str, table: &str) -> Result<(), StoreError> {
    match fault {
        StoreFault::Throttle => Err(StoreError::Throttled {
            operation,
            table: table.to_owned(),
            message: "scripted throttle".to_owned(),
        }),
        StoreFault::Fail(message) => Err(StoreError::Backend {
            operation,
            table: table.to_owned(),
            message,
        }),
        StoreFault::Unprocessed(_) => Ok(()),
    }
}

fn missing_table(operation: &'static str, table: &str) -> StoreError {
    StoreError::Backend {
        operation,
        table: table.to_owned(),
        message: "table does not exist".to_owned(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
