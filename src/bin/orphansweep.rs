//! Command-line entry point: deletes child-table records whose parent no
//! longer exists, against DynamoDB.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use orphansweep::{
    init_tracing, CollectorConfig, DeleteMode, DynamoTableStore, FailurePolicy, Runner,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Batch,
    Single,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    Continue,
    Abort,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// AWS region; falls back to the SDK's default provider chain.
    #[arg(long, env = "ORPHANSWEEP_REGION")]
    region: Option<String>,

    /// Override the DynamoDB endpoint (for local testing).
    #[arg(long, env = "ORPHANSWEEP_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    #[arg(long, env = "ORPHANSWEEP_PARENT_TABLE")]
    parent_table: String,

    #[arg(long, env = "ORPHANSWEEP_CHILD_TABLE")]
    child_table: String,

    /// Primary key attribute, shared by both tables.
    #[arg(long, env = "ORPHANSWEEP_KEY_ATTRIBUTE")]
    key_attribute: String,

    /// Child attribute holding the parent's primary key.
    #[arg(long, env = "ORPHANSWEEP_REFERENCE_ATTRIBUTE")]
    reference_attribute: String,

    #[arg(long, env = "ORPHANSWEEP_MAX_WORKERS", default_value_t = 100)]
    max_workers: usize,

    #[arg(long, env = "ORPHANSWEEP_QUEUE_THRESHOLD", default_value_t = 10)]
    queue_threshold: usize,

    /// Child timestamp attribute; records newer than the cutoff are kept.
    #[arg(long, env = "ORPHANSWEEP_STALENESS_ATTRIBUTE", requires = "timestamp_format")]
    staleness_attribute: Option<String>,

    /// strftime format of the timestamp attribute.
    #[arg(long, env = "ORPHANSWEEP_TIMESTAMP_FORMAT", requires = "staleness_attribute")]
    timestamp_format: Option<String>,

    #[arg(long, env = "ORPHANSWEEP_STALENESS_OFFSET_SECS", default_value_t = 3600)]
    staleness_offset_secs: u64,

    #[arg(long, env = "ORPHANSWEEP_DELETE_MODE", value_enum, default_value_t = ModeArg::Batch)]
    delete_mode: ModeArg,

    #[arg(long, env = "ORPHANSWEEP_FAILURE_POLICY", value_enum, default_value_t = PolicyArg::Continue)]
    failure_policy: PolicyArg,

    /// Total delete calls per batch before its remaining keys are reported failed.
    #[arg(long, env = "ORPHANSWEEP_MAX_ATTEMPTS", default_value_t = 12, conflicts_with = "unbounded_retries")]
    max_attempts: usize,

    #[arg(long, env = "ORPHANSWEEP_UNBOUNDED_RETRIES")]
    unbounded_retries: bool,
}

impl Args {
    fn to_config(&self) -> Result<CollectorConfig> {
        let mut builder = CollectorConfig::builder()
            .parent_table(self.parent_table.as_str())
            .child_table(self.child_table.as_str())
            .key_attribute(self.key_attribute.as_str())
            .reference_attribute(self.reference_attribute.as_str())
            .max_workers(self.max_workers)
            .queue_threshold(self.queue_threshold)
            .staleness_offset(Duration::from_secs(self.staleness_offset_secs))
            .delete_mode(match self.delete_mode {
                ModeArg::Batch => DeleteMode::Batch,
                ModeArg::Single => DeleteMode::Single,
            })
            .failure_policy(match self.failure_policy {
                PolicyArg::Continue => FailurePolicy::Continue,
                PolicyArg::Abort => FailurePolicy::Abort,
            });

        if let Some(region) = &self.region {
            builder = builder.region(region.as_str());
        }
        if let Some(attribute) = &self.staleness_attribute {
            builder = builder.staleness_attribute(attribute.as_str());
        }
        if let Some(format) = &self.timestamp_format {
            builder = builder.timestamp_format(format.as_str());
        }
        builder = if self.unbounded_retries {
            builder.unbounded_retries()
        } else {
            builder.max_attempts(self.max_attempts)
        };

        builder.build().context("invalid collector configuration")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = args.to_config()?;

    tracing::info!(
        pool_size = config.connection_pool_size(),
        "connecting to DynamoDB"
    );
    let store = DynamoTableStore::connect(config.region(), args.endpoint_url.as_deref()).await;

    let runner = Runner::new(config, Arc::new(store));
    let report = runner.run_until_ctrl_c().await?;

    tracing::info!(
        parent_keys = report.parent_keys,
        scanned = report.child_items_scanned,
        orphans = report.orphans_found,
        deleted = report.keys_deleted,
        failed = report.keys_failed,
        "orphan sweep complete"
    );
    Ok(())
}
