pub mod delete;
pub mod runtime;
pub mod scan;
pub mod store;

pub use delete::batch::{BatchAccumulator, OrphanBatch};
pub use delete::executor::{DeleteFailure, DeleteOutcome};
pub use runtime::collector::{CollectionReport, OrphanCollector};
pub use runtime::config::{
    CollectorConfig, CollectorConfigBuilder, CollectorConfigParams, DeleteMode, FailurePolicy,
    StalenessFilter,
};
pub use runtime::progress::{ProgressAggregator, ProgressTotals};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use scan::children::ChildRecord;
pub use scan::parents::ParentKeySet;
pub use scan::predicate::{classify, is_orphan, StalenessCutoff, Verdict};
#[cfg(feature = "dynamodb")]
pub use store::DynamoTableStore;
pub use store::{MemoryTableStore, StoreError, TableStore, MAX_BATCH_KEYS};
