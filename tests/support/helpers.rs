use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use orphansweep::store::memory::item;
use orphansweep::{CollectorConfig, CollectorConfigBuilder, MemoryTableStore};
use tracing_subscriber::EnvFilter;

pub const PARENTS: &str = "sessions";
pub const CHILDREN: &str = "events";
pub const KEY: &str = "id";
pub const REFERENCE: &str = "session_id";
pub const CREATED_AT: &str = "created_at";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Fixed clock used by runs that apply a staleness cutoff.
pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// Parent and child tables seeded in a small-page in-memory store.
pub struct Tables {
    store: Arc<MemoryTableStore>,
}

impl Tables {
    pub fn new() -> Self {
        let store = MemoryTableStore::with_page_size(7);
        store.create_table(PARENTS, KEY);
        store.create_table(CHILDREN, KEY);
        Self {
            store: Arc::new(store),
        }
    }

    pub fn store(&self) -> Arc<MemoryTableStore> {
        self.store.clone()
    }

    pub fn parent(&self, id: &str) -> &Self {
        self.store
            .put(PARENTS, item([(KEY, id), ("owner", "u1")]))
            .unwrap();
        self
    }

    pub fn child(&self, id: &str, parent: &str) -> &Self {
        self.store
            .put(CHILDREN, item([(KEY, id), (REFERENCE, parent)]))
            .unwrap();
        self
    }

    pub fn dated_child(&self, id: &str, parent: &str, created_at: &str) -> &Self {
        self.store
            .put(
                CHILDREN,
                item([(KEY, id), (REFERENCE, parent), (CREATED_AT, created_at)]),
            )
            .unwrap();
        self
    }

    /// Seeds `count` children pointing at a parent that does not exist.
    pub fn orphans(&self, prefix: &str, count: usize) -> &Self {
        for index in 0..count {
            self.child(&format!("{prefix}{index:03}"), "missing");
        }
        self
    }

    pub fn remaining_children(&self) -> Vec<String> {
        self.store.keys(CHILDREN)
    }
}

pub fn config_builder() -> CollectorConfigBuilder {
    CollectorConfig::builder()
        .parent_table(PARENTS)
        .child_table(CHILDREN)
        .key_attribute(KEY)
        .reference_attribute(REFERENCE)
        .initial_backoff(Duration::from_millis(5))
        .max_backoff(Duration::from_millis(50))
}
