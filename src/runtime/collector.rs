//! One orphan collection pass: load the parent keys, stream the child table
//! through the predicate, batch the orphans, and drain them through the
//! delete workers.

use crate::delete::batch::BatchAccumulator;
use crate::delete::dispatcher::{BatchDispatcher, DispatcherParams};
use crate::delete::executor::BatchDeleteExecutor;
use crate::runtime::config::CollectorConfig;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::progress::ProgressAggregator;
use crate::runtime::telemetry::{spawn_metrics_reporter, Telemetry, TelemetrySnapshot};
use crate::scan::children::ChildScanner;
use crate::scan::parents::{load_parent_keys, ParentKeySet};
use crate::scan::predicate::{classify, StalenessCutoff, Verdict};
use crate::store::client::TableStore;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Totals of a single collection run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionReport {
    pub parent_keys: usize,
    pub parent_items_scanned: u64,
    pub child_items_scanned: u64,
    pub malformed_records: u64,
    pub orphans_found: u64,
    pub fresh_orphans_retained: u64,
    pub batches_dispatched: u64,
    pub delete_calls: u64,
    pub keys_deleted: u64,
    pub keys_failed: u64,
}

impl CollectionReport {
    fn new(parent_keys: usize, counters: TelemetrySnapshot) -> Self {
        Self {
            parent_keys,
            parent_items_scanned: counters.parent_items_scanned,
            child_items_scanned: counters.child_items_scanned,
            malformed_records: counters.malformed_records,
            orphans_found: counters.orphans_found,
            fresh_orphans_retained: counters.fresh_orphans_retained,
            batches_dispatched: counters.batches_dispatched,
            delete_calls: counters.delete_calls,
            keys_deleted: counters.keys_deleted,
            keys_failed: counters.keys_failed,
        }
    }
}

pub struct OrphanCollector<S: TableStore> {
    config: CollectorConfig,
    store: Arc<S>,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
}

impl<S: TableStore> OrphanCollector<S> {
    /// The collector creates its own root cancellation token. Use
    /// [`Self::with_cancellation_token`] to share one with the caller.
    pub fn new(config: CollectorConfig, store: Arc<S>) -> Self {
        Self::with_cancellation_token(config, store, CancellationToken::new())
    }

    pub fn with_cancellation_token(
        config: CollectorConfig,
        store: Arc<S>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            store,
            telemetry: Arc::new(Telemetry::default()),
            shutdown,
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(&self) -> Result<CollectionReport> {
        self.run_at(Utc::now()).await
    }

    /// Runs one pass with the staleness cutoff derived from `now`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<CollectionReport> {
        let baseline = self.telemetry.snapshot();
        let run_token = self.shutdown.child_token();
        let fatal_handler = FatalErrorHandler::new(run_token.clone());

        tracing::info!(
            parent_table = self.config.parent_table(),
            child_table = self.config.child_table(),
            workers = self.config.max_workers(),
            queue_threshold = self.config.queue_threshold(),
            mode = ?self.config.delete_mode(),
            "starting orphan collection"
        );

        let reporter = spawn_metrics_reporter(
            self.telemetry.clone(),
            run_token.clone(),
            self.config.metrics_interval(),
        );

        let result = self.collect(now, &run_token, &fatal_handler).await;

        run_token.cancel();
        if let Err(err) = reporter.await {
            tracing::warn!(error = %err, "metrics reporter join failed");
        }

        if let Some(fatal) = fatal_handler.error() {
            return Err(fatal.context("orphan collection aborted"));
        }
        let counters = self.telemetry.snapshot().since(&baseline);
        if self.shutdown.is_cancelled() {
            tracing::warn!(
                deleted = counters.keys_deleted,
                failed = counters.keys_failed,
                "orphan collection interrupted"
            );
            return Err(match result {
                Err(err) => err.context("orphan collection interrupted"),
                Ok(_) => anyhow!("orphan collection interrupted"),
            });
        }
        let parent_keys = result.context("orphan collection failed")?;

        let report = CollectionReport::new(parent_keys, counters);
        tracing::info!(
            table = self.config.child_table(),
            deleted = report.keys_deleted,
            failed = report.keys_failed,
            orphans = report.orphans_found,
            fresh = report.fresh_orphans_retained,
            malformed = report.malformed_records,
            scanned = report.child_items_scanned,
            "finished with total deleted items"
        );
        Ok(report)
    }

    async fn collect(
        &self,
        now: DateTime<Utc>,
        run_token: &CancellationToken,
        fatal_handler: &FatalErrorHandler,
    ) -> Result<usize> {
        let parents = load_parent_keys(
            self.store.clone(),
            &self.config,
            &self.telemetry,
            run_token,
        )
        .await?;

        let cutoff = self
            .config
            .staleness()
            .map(|filter| StalenessCutoff::from_filter(filter, now, self.config.staleness_offset()))
            .transpose()?;
        if let Some(cutoff) = &cutoff {
            tracing::info!(threshold = cutoff.threshold(), "sparing records newer than cutoff");
        }

        let dispatcher = BatchDispatcher::launch(DispatcherParams {
            max_workers: self.config.max_workers(),
            queue_threshold: self.config.queue_threshold(),
            executor: Arc::new(BatchDeleteExecutor::new(
                self.store.clone(),
                &self.config,
                self.telemetry.clone(),
                run_token.clone(),
            )),
            aggregator: Arc::new(ProgressAggregator::new(
                self.config.child_table(),
                self.config.delete_log_every(),
            )),
            telemetry: self.telemetry.clone(),
            fatal_handler: fatal_handler.clone(),
            failure_policy: self.config.failure_policy(),
            run_token: run_token.clone(),
        });

        let scanned = self
            .scan_and_dispatch(&dispatcher, &parents, cutoff.as_ref(), run_token)
            .await;
        if scanned.is_err() {
            run_token.cancel();
        }
        dispatcher.finish().await;
        scanned?;

        Ok(parents.len())
    }

    async fn scan_and_dispatch(
        &self,
        dispatcher: &BatchDispatcher,
        parents: &ParentKeySet,
        cutoff: Option<&StalenessCutoff>,
        run_token: &CancellationToken,
    ) -> Result<()> {
        let mut scanner = ChildScanner::new(
            self.store.clone(),
            &self.config,
            self.telemetry.clone(),
            run_token.clone(),
        );
        let mut accumulator = BatchAccumulator::new(self.config.delete_mode().batch_capacity());

        while let Some(records) = scanner.next_page().await? {
            for record in records {
                match classify(&record, parents, cutoff) {
                    Verdict::ParentExists => {}
                    Verdict::Fresh => {
                        self.telemetry.record_fresh_orphan();
                        tracing::trace!(key = %record.primary_key, "orphan newer than cutoff retained");
                    }
                    Verdict::Orphan => {
                        self.telemetry.record_orphan();
                        if let Some(batch) = accumulator.push(record.primary_key) {
                            dispatcher.submit(batch).await?;
                        }
                    }
                }
            }
        }

        if let Some(batch) = accumulator.finish() {
            dispatcher.submit(batch).await?;
        }
        tracing::debug!(batches = accumulator.sealed(), "child scan dispatched");
        Ok(())
    }
}
