use crate::runtime::telemetry;
use crate::store::client::MAX_BATCH_KEYS;
use anyhow::{bail, Context, Result};
use chrono::format::{Item as FormatItem, StrftimeItems};
use std::time::Duration;

const DEFAULT_MAX_WORKERS: usize = 100;
const DEFAULT_QUEUE_THRESHOLD: usize = 10;
const DEFAULT_STALENESS_OFFSET_SECS: u64 = 60 * 60;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 100;
const DEFAULT_MAX_BACKOFF_SECS: u64 = 30;
const DEFAULT_MAX_ATTEMPTS: usize = 12;
const DEFAULT_SCAN_LOG_EVERY: u64 = 1_000;
const DEFAULT_DELETE_LOG_EVERY: u64 = 100;
const CONNECTION_POOL_MARGIN: usize = 10;

/// How orphaned keys are handed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteMode {
    /// Group up to [`MAX_BATCH_KEYS`] keys per batch-delete call.
    #[default]
    Batch,
    /// One delete call per key.
    Single,
}

impl DeleteMode {
    pub fn batch_capacity(self) -> usize {
        match self {
            DeleteMode::Batch => MAX_BATCH_KEYS,
            DeleteMode::Single => 1,
        }
    }
}

/// What the run does once a batch cannot be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Report the batch's keys as failed and keep collecting.
    #[default]
    Continue,
    /// Cancel the whole run and surface the failure.
    Abort,
}

/// Timestamp attribute and its strftime format, used to spare recent records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalenessFilter {
    attribute: String,
    timestamp_format: String,
}

impl StalenessFilter {
    pub fn new(attribute: impl Into<String>, timestamp_format: impl Into<String>) -> Result<Self> {
        let filter = Self {
            attribute: trimmed_string(attribute.into()),
            timestamp_format: timestamp_format.into(),
        };
        filter.validate()?;
        Ok(filter)
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn timestamp_format(&self) -> &str {
        &self.timestamp_format
    }

    fn validate(&self) -> Result<()> {
        ensure_not_empty(&self.attribute, "staleness attribute")?;
        ensure_not_empty(&self.timestamp_format, "timestamp_format")?;
        if StrftimeItems::new(&self.timestamp_format).any(|item| matches!(item, FormatItem::Error))
        {
            bail!(
                "timestamp_format {:?} is not a valid strftime format",
                self.timestamp_format
            );
        }
        Ok(())
    }
}

/// Runtime configuration for one orphan collection pass.
///
/// Instances are only obtainable through [`CollectorConfig::builder`] or
/// [`CollectorConfig::new`], both of which validate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    region: Option<String>,
    parent_table: String,
    child_table: String,
    key_attribute: String,
    reference_attribute: String,
    max_workers: usize,
    staleness: Option<StalenessFilter>,
    staleness_offset: Duration,
    queue_threshold: usize,
    delete_mode: DeleteMode,
    initial_backoff: Duration,
    max_backoff: Duration,
    max_attempts: Option<usize>,
    failure_policy: FailurePolicy,
    scan_log_every: u64,
    delete_log_every: u64,
    metrics_interval: Duration,
}

pub struct CollectorConfigParams {
    pub region: Option<String>,
    pub parent_table: String,
    pub child_table: String,
    pub key_attribute: String,
    pub reference_attribute: String,
    pub max_workers: usize,
    pub staleness: Option<StalenessFilter>,
    pub staleness_offset: Duration,
    pub queue_threshold: usize,
    pub delete_mode: DeleteMode,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: Option<usize>,
    pub failure_policy: FailurePolicy,
    pub scan_log_every: u64,
    pub delete_log_every: u64,
    pub metrics_interval: Duration,
}

impl CollectorConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> CollectorConfigBuilder {
        CollectorConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: CollectorConfigParams) -> Result<Self> {
        let CollectorConfigParams {
            region,
            parent_table,
            child_table,
            key_attribute,
            reference_attribute,
            max_workers,
            staleness,
            staleness_offset,
            queue_threshold,
            delete_mode,
            initial_backoff,
            max_backoff,
            max_attempts,
            failure_policy,
            scan_log_every,
            delete_log_every,
            metrics_interval,
        } = params;

        let config = Self {
            region: region.map(trimmed_string).filter(|region| !region.is_empty()),
            parent_table: trimmed_string(parent_table),
            child_table: trimmed_string(child_table),
            key_attribute: trimmed_string(key_attribute),
            reference_attribute: trimmed_string(reference_attribute),
            max_workers,
            staleness,
            staleness_offset,
            queue_threshold,
            delete_mode,
            initial_backoff,
            max_backoff,
            max_attempts,
            failure_policy,
            scan_log_every,
            delete_log_every,
            metrics_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Backend region, when one was pinned explicitly.
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn parent_table(&self) -> &str {
        &self.parent_table
    }

    pub fn child_table(&self) -> &str {
        &self.child_table
    }

    /// Primary key attribute shared by both tables.
    pub fn key_attribute(&self) -> &str {
        &self.key_attribute
    }

    /// Child attribute holding the referenced parent key.
    pub fn reference_attribute(&self) -> &str {
        &self.reference_attribute
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn staleness(&self) -> Option<&StalenessFilter> {
        self.staleness.as_ref()
    }

    /// How far before run start the staleness cutoff sits.
    pub fn staleness_offset(&self) -> Duration {
        self.staleness_offset
    }

    /// Sealed batches allowed to wait for a worker before the scan blocks.
    pub fn queue_threshold(&self) -> usize {
        self.queue_threshold
    }

    pub fn delete_mode(&self) -> DeleteMode {
        self.delete_mode
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Total backend calls allowed per batch or scan page; `None` retries forever.
    pub fn max_attempts(&self) -> Option<usize> {
        self.max_attempts
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn scan_log_every(&self) -> u64 {
        self.scan_log_every
    }

    pub fn delete_log_every(&self) -> u64 {
        self.delete_log_every
    }

    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Minimum number of backend connections a client should allow so that every
    /// worker can hold one without starving the scanner.
    pub fn connection_pool_size(&self) -> usize {
        self.max_workers.saturating_add(CONNECTION_POOL_MARGIN)
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        ensure_not_empty(&self.parent_table, "parent_table")?;
        ensure_not_empty(&self.child_table, "child_table")?;
        ensure_not_empty(&self.key_attribute, "key_attribute")?;
        ensure_not_empty(&self.reference_attribute, "reference_attribute")?;

        if self.parent_table == self.child_table {
            bail!("parent_table and child_table must differ");
        }

        if self.max_workers == 0 {
            bail!("max_workers must be greater than 0");
        }

        if let Some(filter) = &self.staleness {
            filter.validate()?;
        }

        if self.staleness_offset.is_zero() {
            bail!("staleness_offset must be greater than 0");
        }

        if self.queue_threshold == 0 {
            bail!("queue_threshold must be greater than 0");
        }

        if self.initial_backoff.is_zero() {
            bail!("initial_backoff must be greater than 0");
        }

        if self.max_backoff < self.initial_backoff {
            bail!("max_backoff must be at least initial_backoff");
        }

        if self.max_attempts == Some(0) {
            bail!("max_attempts must be greater than 0 when set");
        }

        if self.scan_log_every == 0 {
            bail!("scan_log_every must be greater than 0");
        }

        if self.delete_log_every == 0 {
            bail!("delete_log_every must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct CollectorConfigBuilder {
    region: Option<String>,
    parent_table: Option<String>,
    child_table: Option<String>,
    key_attribute: Option<String>,
    reference_attribute: Option<String>,
    max_workers: Option<usize>,
    staleness_attribute: Option<String>,
    timestamp_format: Option<String>,
    staleness_offset: Option<Duration>,
    queue_threshold: Option<usize>,
    delete_mode: Option<DeleteMode>,
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    max_attempts: Option<Option<usize>>,
    failure_policy: Option<FailurePolicy>,
    scan_log_every: Option<u64>,
    delete_log_every: Option<u64>,
    metrics_interval: Option<Duration>,
}

impl CollectorConfigBuilder {
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn parent_table(mut self, table: impl Into<String>) -> Self {
        self.parent_table = Some(table.into());
        self
    }

    pub fn child_table(mut self, table: impl Into<String>) -> Self {
        self.child_table = Some(table.into());
        self
    }

    pub fn key_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.key_attribute = Some(attribute.into());
        self
    }

    pub fn reference_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.reference_attribute = Some(attribute.into());
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    pub fn staleness_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.staleness_attribute = Some(attribute.into());
        self
    }

    pub fn timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = Some(format.into());
        self
    }

    pub fn staleness_offset(mut self, offset: Duration) -> Self {
        self.staleness_offset = Some(offset);
        self
    }

    pub fn queue_threshold(mut self, threshold: usize) -> Self {
        self.queue_threshold = Some(threshold);
        self
    }

    pub fn delete_mode(mut self, mode: DeleteMode) -> Self {
        self.delete_mode = Some(mode);
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = Some(backoff);
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    /// Caps backend calls per batch or scan page. Defaults to 12; use
    /// [`Self::unbounded_retries`] to keep retrying throttled calls forever.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(Some(attempts));
        self
    }

    /// Retries throttled calls until they succeed.
    pub fn unbounded_retries(mut self) -> Self {
        self.max_attempts = Some(None);
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    pub fn scan_log_every(mut self, items: u64) -> Self {
        self.scan_log_every = Some(items);
        self
    }

    pub fn delete_log_every(mut self, items: u64) -> Self {
        self.delete_log_every = Some(items);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<CollectorConfig> {
        let staleness = match (self.staleness_attribute, self.timestamp_format) {
            (None, None) => None,
            (Some(attribute), Some(format)) => Some(StalenessFilter::new(attribute, format)?),
            (Some(_), None) => bail!("staleness attribute requires timestamp_format"),
            (None, Some(_)) => bail!("timestamp_format requires a staleness attribute"),
        };

        let params = CollectorConfigParams {
            region: self.region,
            parent_table: self.parent_table.context("parent_table is required")?,
            child_table: self.child_table.context("child_table is required")?,
            key_attribute: self.key_attribute.context("key_attribute is required")?,
            reference_attribute: self
                .reference_attribute
                .context("reference_attribute is required")?,
            max_workers: self.max_workers.unwrap_or(DEFAULT_MAX_WORKERS),
            staleness,
            staleness_offset: self
                .staleness_offset
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_STALENESS_OFFSET_SECS)),
            queue_threshold: self.queue_threshold.unwrap_or(DEFAULT_QUEUE_THRESHOLD),
            delete_mode: self.delete_mode.unwrap_or_default(),
            initial_backoff: self
                .initial_backoff
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS)),
            max_backoff: self
                .max_backoff
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_MAX_BACKOFF_SECS)),
            max_attempts: self.max_attempts.unwrap_or(Some(DEFAULT_MAX_ATTEMPTS)),
            failure_policy: self.failure_policy.unwrap_or_default(),
            scan_log_every: self.scan_log_every.unwrap_or(DEFAULT_SCAN_LOG_EVERY),
            delete_log_every: self.delete_log_every.unwrap_or(DEFAULT_DELETE_LOG_EVERY),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
        };

        CollectorConfig::new(params)
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_builder() -> CollectorConfigBuilder {
        CollectorConfig::builder()
            .parent_table("sessions")
            .child_table("session_events")
            .key_attribute("id")
            .reference_attribute("session_id")
    }

    #[test]
    fn builder_applies_defaults() {
        let config = base_builder().build().unwrap();
        assert_eq!(config.max_workers(), DEFAULT_MAX_WORKERS);
        assert_eq!(config.queue_threshold(), DEFAULT_QUEUE_THRESHOLD);
        assert_eq!(config.staleness(), None);
        assert_eq!(
            config.staleness_offset(),
            Duration::from_secs(DEFAULT_STALENESS_OFFSET_SECS)
        );
        assert_eq!(config.delete_mode(), DeleteMode::Batch);
        assert_eq!(config.failure_policy(), FailurePolicy::Continue);
        assert_eq!(config.max_attempts(), Some(DEFAULT_MAX_ATTEMPTS));
        assert_eq!(config.scan_log_every(), DEFAULT_SCAN_LOG_EVERY);
        assert_eq!(config.delete_log_every(), DEFAULT_DELETE_LOG_EVERY);
        assert_eq!(
            config.metrics_interval(),
            telemetry::DEFAULT_METRICS_INTERVAL
        );
        assert_eq!(config.connection_pool_size(), DEFAULT_MAX_WORKERS + 10);
        assert_eq!(config.region(), None);
    }

    #[test]
    fn values_are_trimmed() {
        let config = base_builder()
            .parent_table("  sessions ")
            .region(" eu-west-1 ")
            .build()
            .unwrap();
        assert_eq!(config.parent_table(), "sessions");
        assert_eq!(config.region(), Some("eu-west-1"));
    }

    #[test]
    fn staleness_options_must_be_paired() {
        let err = base_builder()
            .staleness_attribute("created_at")
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("timestamp_format"));

        let err = base_builder()
            .timestamp_format("%Y-%m-%dT%H:%M:%S")
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("staleness attribute"));

        let config = base_builder()
            .staleness_attribute("created_at")
            .timestamp_format("%Y-%m-%dT%H:%M:%S")
            .build()
            .unwrap();
        let filter = config.staleness().expect("filter configured");
        assert_eq!(filter.attribute(), "created_at");
        assert_eq!(filter.timestamp_format(), "%Y-%m-%dT%H:%M:%S");
    }

    #[test]
    fn invalid_timestamp_format_is_rejected() {
        let err = base_builder()
            .staleness_attribute("created_at")
            .timestamp_format("%Y-%!")
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("strftime"));
    }

    #[test]
    fn missing_required_fields_error() {
        let err = CollectorConfig::builder()
            .child_table("events")
            .key_attribute("id")
            .reference_attribute("parent")
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("parent_table"));
    }

    #[test]
    fn validation_catches_invalid_values() {
        let err = base_builder().max_workers(0).build().unwrap_err();
        assert!(format!("{err}").contains("max_workers"));

        let err = base_builder().queue_threshold(0).build().unwrap_err();
        assert!(format!("{err}").contains("queue_threshold"));

        let err = base_builder().max_attempts(0).build().unwrap_err();
        assert!(format!("{err}").contains("max_attempts"));

        let err = base_builder()
            .initial_backoff(Duration::from_secs(2))
            .max_backoff(Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("max_backoff"));

        let err = base_builder()
            .child_table("sessions")
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("must differ"));

        let err = base_builder().delete_log_every(0).build().unwrap_err();
        assert!(format!("{err}").contains("delete_log_every"));
    }

    #[test]
    fn unbounded_retries_clear_the_attempt_cap() {
        let config = base_builder().unbounded_retries().build().unwrap();
        assert_eq!(config.max_attempts(), None);
    }

    #[test]
    fn single_mode_uses_unit_batches() {
        assert_eq!(DeleteMode::Batch.batch_capacity(), MAX_BATCH_KEYS);
        assert_eq!(DeleteMode::Single.batch_capacity(), 1);
    }

    #[test]
    fn direct_constructor_runs_validation() {
        let err = CollectorConfig::new(CollectorConfigParams {
            region: None,
            parent_table: "sessions".into(),
            child_table: "events".into(),
            key_attribute: " ".into(),
            reference_attribute: "session_id".into(),
            max_workers: 4,
            staleness: None,
            staleness_offset: Duration::from_secs(DEFAULT_STALENESS_OFFSET_SECS),
            queue_threshold: DEFAULT_QUEUE_THRESHOLD,
            delete_mode: DeleteMode::Batch,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_secs(DEFAULT_MAX_BACKOFF_SECS),
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            failure_policy: FailurePolicy::Continue,
            scan_log_every: DEFAULT_SCAN_LOG_EVERY,
            delete_log_every: DEFAULT_DELETE_LOG_EVERY,
            metrics_interval: telemetry::DEFAULT_METRICS_INTERVAL,
        })
        .unwrap_err();
        assert!(format!("{err}").contains("key_attribute"));
    }
}
