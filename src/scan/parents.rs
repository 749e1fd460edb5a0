use crate::delete::backoff::RetryPolicy;
use crate::runtime::config::CollectorConfig;
use crate::runtime::telemetry::Telemetry;
use crate::scan::pager::PageScanner;
use crate::store::client::{ScanRequest, TableStore};
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Every primary key of the parent table, materialized before the child diff.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParentKeySet {
    keys: HashSet<String>,
}

impl ParentKeySet {
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn insert(&mut self, key: String) {
        self.keys.insert(key);
    }
}

impl FromIterator<String> for ParentKeySet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

/// Scans the parent table end to end, projecting only the key attribute.
pub async fn load_parent_keys<S: TableStore>(
    store: Arc<S>,
    config: &CollectorConfig,
    telemetry: &Telemetry,
    cancellation: &CancellationToken,
) -> Result<ParentKeySet> {
    let table = config.parent_table();
    let key_attribute = config.key_attribute();
    let log_every = config.scan_log_every();

    let mut scanner = PageScanner::new(
        store,
        ScanRequest::new(table, vec![key_attribute.to_owned()]),
        RetryPolicy::from_config(config),
        cancellation.clone(),
    );

    let mut parents = ParentKeySet::default();
    let mut scanned: u64 = 0;

    while let Some(items) = scanner.next_page().await? {
        telemetry.record_parent_scanned(items.len() as u64);
        for mut item in items {
            scanned += 1;
            match item.remove(key_attribute) {
                Some(key) => parents.insert(key),
                None => tracing::warn!(
                    table,
                    attribute = key_attribute,
                    "parent item without key attribute skipped"
                ),
            }
            if scanned % log_every == 0 {
                tracing::info!(table, scanned, "scanning parent table");
            }
        }
    }

    tracing::info!(
        table,
        scanned,
        keys = parents.len(),
        "parent keys loaded"
    );
    Ok(parents)
}
