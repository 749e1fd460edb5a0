//! Batch delete execution. One call per attempt; keys the backend leaves
//! unprocessed (or the whole pending set, when the call is throttled) are
//! resubmitted after an exponentially growing delay.

use crate::delete::backoff::{next_backoff, sleep_with_cancellation, RetryPolicy};
use crate::delete::batch::OrphanBatch;
use crate::runtime::config::{CollectorConfig, DeleteMode};
use crate::runtime::telemetry::Telemetry;
use crate::store::client::{StoreError, TableStore};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why some keys of a batch were not deleted.
#[derive(Debug, Error)]
pub enum DeleteFailure {
    #[error("backend rejected delete: {0}")]
    Permanent(#[source] StoreError),
    #[error("gave up after {attempts} attempts ({reason})")]
    Exhausted { attempts: usize, reason: String },
    #[error("run cancelled before the batch completed")]
    Cancelled,
}

/// Result of executing one batch. `deleted + failed_keys.len()` equals the batch size.
#[derive(Debug)]
pub struct DeleteOutcome {
    pub batch_id: u64,
    pub deleted: usize,
    pub failed_keys: Vec<String>,
    pub attempts: usize,
    pub failure: Option<DeleteFailure>,
}

impl DeleteOutcome {
    fn completed(batch_id: u64, deleted: usize, attempts: usize) -> Self {
        Self {
            batch_id,
            deleted,
            failed_keys: Vec::new(),
            attempts,
            failure: None,
        }
    }

    fn failed(
        batch_id: u64,
        total: usize,
        remaining: Vec<String>,
        attempts: usize,
        failure: DeleteFailure,
    ) -> Self {
        Self {
            batch_id,
            deleted: total.saturating_sub(remaining.len()),
            failed_keys: remaining,
            attempts,
            failure: Some(failure),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

pub struct BatchDeleteExecutor<S: TableStore> {
    store: Arc<S>,
    table: String,
    key_attribute: String,
    mode: DeleteMode,
    policy: RetryPolicy,
    telemetry: Arc<Telemetry>,
    cancellation: CancellationToken,
}

impl<S: TableStore> BatchDeleteExecutor<S> {
    pub fn new(
        store: Arc<S>,
        config: &CollectorConfig,
        telemetry: Arc<Telemetry>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            store,
            table: config.child_table().to_owned(),
            key_attribute: config.key_attribute().to_owned(),
            mode: config.delete_mode(),
            policy: RetryPolicy::from_config(config),
            telemetry,
            cancellation,
        }
    }

    pub async fn execute(&self, batch: OrphanBatch) -> DeleteOutcome {
        let batch_id = batch.id();
        let total = batch.len();
        let mut pending = batch.into_keys();

        if self.cancellation.is_cancelled() {
            return DeleteOutcome::failed(batch_id, total, pending, 0, DeleteFailure::Cancelled);
        }

        let mut delay = self.policy.initial_delay;
        let mut attempts = 0;

        loop {
            attempts += 1;
            self.telemetry.record_delete_call();

            let reason = match self.attempt(&pending).await {
                Ok(unprocessed) if unprocessed.is_empty() => {
                    tracing::debug!(
                        batch = batch_id,
                        keys = total,
                        attempts,
                        "batch deleted"
                    );
                    return DeleteOutcome::completed(batch_id, total, attempts);
                }
                Ok(mut unprocessed) => {
                    unprocessed.retain(|key| pending.contains(key));
                    self.telemetry.record_unprocessed(unprocessed.len() as u64);
                    let reason = format!("{} keys left unprocessed", unprocessed.len());
                    pending = unprocessed;
                    if pending.is_empty() {
                        return DeleteOutcome::completed(batch_id, total, attempts);
                    }
                    reason
                }
                Err(AttemptError { error, completed }) => {
                    pending.drain(..completed.min(pending.len()));
                    if !error.is_transient() {
                        return DeleteOutcome::failed(
                            batch_id,
                            total,
                            pending,
                            attempts,
                            DeleteFailure::Permanent(error),
                        );
                    }
                    self.telemetry.record_throttled();
                    error.to_string()
                }
            };

            if self.policy.exhausted(attempts) {
                return DeleteOutcome::failed(
                    batch_id,
                    total,
                    pending,
                    attempts,
                    DeleteFailure::Exhausted { attempts, reason },
                );
            }

            tracing::warn!(
                batch = batch_id,
                attempt = attempts,
                pending = pending.len(),
                backoff_ms = duration_to_millis(delay),
                reason = %reason,
                "batch delete incomplete; retrying"
            );

            if sleep_with_cancellation(delay, Some(&self.cancellation))
                .await
                .is_err()
            {
                return DeleteOutcome::failed(
                    batch_id,
                    total,
                    pending,
                    attempts,
                    DeleteFailure::Cancelled,
                );
            }
            delay = next_backoff(delay, self.policy.max_delay);
        }
    }

    /// One backend round trip; returns the keys still to delete.
    ///
    /// Single mode walks the keys in order, so an error carries how many
    /// leading keys were already removed.
    async fn attempt(&self, keys: &[String]) -> Result<Vec<String>, AttemptError> {
        match self.mode {
            DeleteMode::Batch => self
                .store
                .batch_delete(&self.table, &self.key_attribute, keys)
                .await
                .map_err(|error| AttemptError {
                    error,
                    completed: 0,
                }),
            DeleteMode::Single => {
                for (completed, key) in keys.iter().enumerate() {
                    self.store
                        .delete_one(&self.table, &self.key_attribute, key)
                        .await
                        .map_err(|error| AttemptError { error, completed })?;
                }
                Ok(Vec::new())
            }
        }
    }
}

struct AttemptError {
    error: StoreError,
    completed: usize,
}

fn duration_to_millis(delay: Duration) -> u64 {
    delay.as_millis().min(u128::from(u64::MAX)) as u64
}
