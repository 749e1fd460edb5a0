use crate::delete::backoff::RetryPolicy;
use crate::runtime::config::CollectorConfig;
use crate::runtime::telemetry::Telemetry;
use crate::scan::pager::PageScanner;
use crate::store::client::{Item, ScanRequest, TableStore};
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Projected view of one child-table item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRecord {
    pub primary_key: String,
    pub reference_key: String,
    pub timestamp: Option<String>,
}

/// Lazy page-at-a-time scan of the child table.
pub struct ChildScanner<S: TableStore> {
    pages: PageScanner<S>,
    table: String,
    key_attribute: String,
    reference_attribute: String,
    timestamp_attribute: Option<String>,
    telemetry: Arc<Telemetry>,
    log_every: u64,
    scanned: u64,
}

impl<S: TableStore> ChildScanner<S> {
    pub fn new(
        store: Arc<S>,
        config: &CollectorConfig,
        telemetry: Arc<Telemetry>,
        cancellation: CancellationToken,
    ) -> Self {
        let timestamp_attribute = config
            .staleness()
            .map(|filter| filter.attribute().to_owned());

        let mut projection = vec![
            config.key_attribute().to_owned(),
            config.reference_attribute().to_owned(),
        ];
        projection.extend(timestamp_attribute.clone());

        Self {
            pages: PageScanner::new(
                store,
                ScanRequest::new(config.child_table(), projection),
                RetryPolicy::from_config(config),
                cancellation,
            ),
            table: config.child_table().to_owned(),
            key_attribute: config.key_attribute().to_owned(),
            reference_attribute: config.reference_attribute().to_owned(),
            timestamp_attribute,
            telemetry,
            log_every: config.scan_log_every(),
            scanned: 0,
        }
    }

    /// Number of child items read so far, malformed ones included.
    pub fn scanned(&self) -> u64 {
        self.scanned
    }

    pub async fn next_page(&mut self) -> Result<Option<Vec<ChildRecord>>> {
        let Some(items) = self.pages.next_page().await? else {
            tracing::info!(table = %self.table, scanned = self.scanned, "child scan complete");
            return Ok(None);
        };

        self.telemetry.record_child_scanned(items.len() as u64);
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            self.scanned += 1;
            if let Some(record) = self.to_record(item) {
                records.push(record);
            }
            if self.scanned % self.log_every == 0 {
                tracing::info!(table = %self.table, scanned = self.scanned, "scanning child table");
            }
        }
        Ok(Some(records))
    }

    fn to_record(&self, mut item: Item) -> Option<ChildRecord> {
        let primary_key = item.remove(&self.key_attribute);
        let reference_key = item.remove(&self.reference_attribute);

        match (primary_key, reference_key) {
            (Some(primary_key), Some(reference_key)) => Some(ChildRecord {
                primary_key,
                reference_key,
                timestamp: self
                    .timestamp_attribute
                    .as_ref()
                    .and_then(|attribute| item.remove(attribute)),
            }),
            (primary_key, _) => {
                self.telemetry.record_malformed();
                tracing::warn!(
                    table = %self.table,
                    key = primary_key.as_deref().unwrap_or("<missing>"),
                    "child item without key or reference attribute skipped"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{item, MemoryTableStore};

    fn store() -> Arc<MemoryTableStore> {
        let store = MemoryTableStore::with_page_size(2);
        store.create_table("events", "id");
        store
            .put(
                "events",
                item([("id", "e1"), ("session", "s1"), ("at", "2024"), ("body", "x")]),
            )
            .unwrap();
        store
            .put("events", item([("id", "e2"), ("session", "s2")]))
            .unwrap();
        store.put("events", item([("id", "e3")])).unwrap();
        Arc::new(store)
    }

    fn builder() -> crate::runtime::config::CollectorConfigBuilder {
        CollectorConfig::builder()
            .parent_table("sessions")
            .child_table("events")
            .key_attribute("id")
            .reference_attribute("session")
    }

    async fn collect(scanner: &mut ChildScanner<MemoryTableStore>) -> Vec<ChildRecord> {
        let mut records = Vec::new();
        while let Some(page) = scanner.next_page().await.unwrap() {
            records.extend(page);
        }
        records
    }

    #[tokio::test]
    async fn skips_malformed_items() {
        let telemetry = Arc::new(Telemetry::default());
        let config = builder().build().unwrap();
        let mut scanner =
            ChildScanner::new(store(), &config, telemetry.clone(), CancellationToken::new());

        let records = collect(&mut scanner).await;

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].reference_key, "s1");
        assert_eq!(records[0].timestamp, None);
        assert_eq!(scanner.scanned(), 3);
        assert_eq!(telemetry.snapshot().malformed_records, 1);
    }

    #[tokio::test]
    async fn projects_timestamp_only_with_filter() {
        let config = builder()
            .staleness_attribute("at")
            .timestamp_format("%Y")
            .build()
            .unwrap();
        let mut scanner = ChildScanner::new(
            store(),
            &config,
            Arc::new(Telemetry::default()),
            CancellationToken::new(),
        );

        let records = collect(&mut scanner).await;

        assert_eq!(records[0].timestamp.as_deref(), Some("2024"));
        assert_eq!(records[1].timestamp, None);
    }
}
