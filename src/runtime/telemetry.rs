use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters describing a collection run.
#[derive(Default, Debug)]
pub struct Telemetry {
    parent_items_scanned: AtomicU64,
    child_items_scanned: AtomicU64,
    malformed_records: AtomicU64,
    orphans_found: AtomicU64,
    fresh_orphans_retained: AtomicU64,
    batches_dispatched: AtomicU64,
    delete_calls: AtomicU64,
    unprocessed_keys: AtomicU64,
    throttled_calls: AtomicU64,
    keys_deleted: AtomicU64,
    keys_failed: AtomicU64,
}

impl Telemetry {
    pub fn record_parent_scanned(&self, count: u64) {
        self.parent_items_scanned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_child_scanned(&self, count: u64) {
        self.child_items_scanned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_orphan(&self) {
        self.orphans_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fresh_orphan(&self) {
        self.fresh_orphans_retained.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_dispatched(&self) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete_call(&self) {
        self.delete_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unprocessed(&self, count: u64) {
        self.unprocessed_keys.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_throttled(&self) {
        self.throttled_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deleted(&self, count: u64) {
        self.keys_deleted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_failed(&self, count: u64) {
        self.keys_failed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            parent_items_scanned: self.parent_items_scanned.load(Ordering::Relaxed),
            child_items_scanned: self.child_items_scanned.load(Ordering::Relaxed),
            malformed_records: self.malformed_records.load(Ordering::Relaxed),
            orphans_found: self.orphans_found.load(Ordering::Relaxed),
            fresh_orphans_retained: self.fresh_orphans_retained.load(Ordering::Relaxed),
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            delete_calls: self.delete_calls.load(Ordering::Relaxed),
            unprocessed_keys: self.unprocessed_keys.load(Ordering::Relaxed),
            throttled_calls: self.throttled_calls.load(Ordering::Relaxed),
            keys_deleted: self.keys_deleted.load(Ordering::Relaxed),
            keys_failed: self.keys_failed.load(Ordering::Relaxed),
        }
    }

    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::Relaxed)
    }

    pub fn keys_deleted(&self) -> u64 {
        self.keys_deleted.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub parent_items_scanned: u64,
    pub child_items_scanned: u64,
    pub malformed_records: u64,
    pub orphans_found: u64,
    pub fresh_orphans_retained: u64,
    pub batches_dispatched: u64,
    pub delete_calls: u64,
    pub unprocessed_keys: u64,
    pub throttled_calls: u64,
    pub keys_deleted: u64,
    pub keys_failed: u64,
}

impl TelemetrySnapshot {
    /// Counter deltas accumulated after `earlier` was taken.
    pub fn since(&self, earlier: &TelemetrySnapshot) -> TelemetrySnapshot {
        TelemetrySnapshot {
            parent_items_scanned: self
                .parent_items_scanned
                .saturating_sub(earlier.parent_items_scanned),
            child_items_scanned: self
                .child_items_scanned
                .saturating_sub(earlier.child_items_scanned),
            malformed_records: self.malformed_records.saturating_sub(earlier.malformed_records),
            orphans_found: self.orphans_found.saturating_sub(earlier.orphans_found),
            fresh_orphans_retained: self
                .fresh_orphans_retained
                .saturating_sub(earlier.fresh_orphans_retained),
            batches_dispatched: self
                .batches_dispatched
                .saturating_sub(earlier.batches_dispatched),
            delete_calls: self.delete_calls.saturating_sub(earlier.delete_calls),
            unprocessed_keys: self.unprocessed_keys.saturating_sub(earlier.unprocessed_keys),
            throttled_calls: self.throttled_calls.saturating_sub(earlier.throttled_calls),
            keys_deleted: self.keys_deleted.saturating_sub(earlier.keys_deleted),
            keys_failed: self.keys_failed.saturating_sub(earlier.keys_failed),
        }
    }
}

/// Spawns a background task that periodically logs delete throughput and retry pressure.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: "orphansweep::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let deleted_delta = current.keys_deleted.saturating_sub(last_snapshot.keys_deleted);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        deleted_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "orphansweep::metrics",
                        throughput = format!("{throughput:.2}"),
                        scanned = current.child_items_scanned,
                        orphans = current.orphans_found,
                        deleted = current.keys_deleted,
                        failed = current.keys_failed,
                        delete_calls = current.delete_calls,
                        unprocessed = current.unprocessed_keys,
                        throttled = current.throttled_calls,
                        "collector metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[test]
    fn telemetry_records_counters() {
        let telemetry = Telemetry::default();
        telemetry.record_parent_scanned(3);
        telemetry.record_child_scanned(10);
        telemetry.record_orphan();
        telemetry.record_orphan();
        telemetry.record_fresh_orphan();
        telemetry.record_batch_dispatched();
        telemetry.record_delete_call();
        telemetry.record_delete_call();
        telemetry.record_unprocessed(4);
        telemetry.record_throttled();
        telemetry.record_deleted(2);
        telemetry.record_malformed();

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.parent_items_scanned, 3);
        assert_eq!(snapshot.child_items_scanned, 10);
        assert_eq!(snapshot.orphans_found, 2);
        assert_eq!(snapshot.fresh_orphans_retained, 1);
        assert_eq!(snapshot.batches_dispatched, 1);
        assert_eq!(snapshot.unprocessed_keys, 4);
        assert_eq!(snapshot.throttled_calls, 1);
        assert_eq!(snapshot.malformed_records, 1);
        assert_eq!(snapshot.keys_failed, 0);
        assert_eq!(telemetry.delete_calls(), 2);
        assert_eq!(telemetry.keys_deleted(), 2);
    }

    #[tokio::test]
    async fn metrics_reporter_logs_until_shutdown() {
        let telemetry = Arc::new(Telemetry::default());
        telemetry.record_deleted(10);

        let shutdown = CancellationToken::new();
        let handle = spawn_metrics_reporter(telemetry, shutdown.clone(), Duration::from_millis(10));

        shutdown.cancel();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("reporter should stop promptly")
            .expect("task should not panic");
    }
}
