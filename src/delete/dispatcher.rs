//! Bounded hand-off between the child scan and the delete workers.
//!
//! Sealed batches go through an mpsc queue whose capacity is the configured
//! queue threshold; a full queue suspends the scanner until a worker frees a
//! slot. A fixed pool of `max_workers` tasks drains the queue.

use crate::delete::batch::OrphanBatch;
use crate::delete::executor::{BatchDeleteExecutor, DeleteFailure, DeleteOutcome};
use crate::runtime::config::FailurePolicy;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::progress::ProgressAggregator;
use crate::runtime::telemetry::Telemetry;
use crate::store::client::TableStore;
use anyhow::{anyhow, bail, Result};
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type SharedReceiver = Arc<Mutex<mpsc::Receiver<OrphanBatch>>>;

pub struct DispatcherParams<S: TableStore> {
    pub max_workers: usize,
    pub queue_threshold: usize,
    pub executor: Arc<BatchDeleteExecutor<S>>,
    pub aggregator: Arc<ProgressAggregator>,
    pub telemetry: Arc<Telemetry>,
    pub fatal_handler: FatalErrorHandler,
    pub failure_policy: FailurePolicy,
    pub run_token: CancellationToken,
}

pub struct BatchDispatcher {
    tx: Option<mpsc::Sender<OrphanBatch>>,
    workers: Vec<JoinHandle<()>>,
    telemetry: Arc<Telemetry>,
    run_token: CancellationToken,
}

impl BatchDispatcher {
    pub fn launch<S: TableStore>(params: DispatcherParams<S>) -> Self {
        let DispatcherParams {
            max_workers,
            queue_threshold,
            executor,
            aggregator,
            telemetry,
            fatal_handler,
            failure_policy,
            run_token,
        } = params;

        let (tx, rx) = mpsc::channel(queue_threshold.max(1));
        let receiver: SharedReceiver = Arc::new(Mutex::new(rx));

        let workers = (0..max_workers.max(1))
            .map(|worker_id| {
                let worker = DeleteWorker {
                    id: worker_id,
                    receiver: receiver.clone(),
                    executor: executor.clone(),
                    aggregator: aggregator.clone(),
                    telemetry: telemetry.clone(),
                    fatal_handler: fatal_handler.clone(),
                    failure_policy,
                };
                let fatal_handler = fatal_handler.clone();

                tokio::spawn(async move {
                    let result = std::panic::AssertUnwindSafe(worker.run())
                        .catch_unwind()
                        .await;

                    if let Err(panic_payload) = result {
                        let panic_msg = panic_message(panic_payload.as_ref());
                        tracing::error!(
                            worker = worker_id,
                            panic = %panic_msg,
                            "delete worker panicked"
                        );
                        let context = format!("delete worker {worker_id} panicked");
                        fatal_handler.trigger(
                            context.as_str(),
                            anyhow!("delete worker {worker_id} panicked: {panic_msg}"),
                        );
                    }
                })
            })
            .collect();

        tracing::debug!(
            workers = max_workers,
            queue_threshold,
            "delete workers launched"
        );

        Self {
            tx: Some(tx),
            workers,
            telemetry,
            run_token,
        }
    }

    /// Queues a batch, waiting while the queue is at its threshold. Fails once
    /// the run has been cancelled.
    pub async fn submit(&self, batch: OrphanBatch) -> Result<()> {
        let Some(tx) = self.tx.as_ref() else {
            bail!("dispatcher already finished");
        };

        if tx.capacity() == 0 {
            tracing::debug!(batch = batch.id(), "delete queue full; scan paused");
        }

        tokio::select! {
            biased;
            _ = self.run_token.cancelled() => bail!("collection run cancelled"),
            sent = tx.send(batch) => {
                sent.map_err(|_| anyhow!("delete workers stopped before accepting batch"))?;
            }
        }

        self.telemetry.record_batch_dispatched();
        Ok(())
    }

    /// Closes the queue and waits for the workers to drain it.
    pub async fn finish(mut self) {
        self.tx.take();
        for joined in join_all(self.workers.drain(..)).await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "delete worker join failed");
            }
        }
    }
}

struct DeleteWorker<S: TableStore> {
    id: usize,
    receiver: SharedReceiver,
    executor: Arc<BatchDeleteExecutor<S>>,
    aggregator: Arc<ProgressAggregator>,
    telemetry: Arc<Telemetry>,
    fatal_handler: FatalErrorHandler,
    failure_policy: FailurePolicy,
}

impl<S: TableStore> DeleteWorker<S> {
    async fn run(self) {
        loop {
            let next = self.receiver.lock().await.recv().await;
            let Some(batch) = next else {
                break;
            };
            let outcome = self.executor.execute(batch).await;
            self.complete(outcome);
        }
        tracing::trace!(worker = self.id, "delete worker drained");
    }

    fn complete(&self, mut outcome: DeleteOutcome) {
        self.telemetry.record_deleted(outcome.deleted as u64);
        self.telemetry.record_failed(outcome.failed_keys.len() as u64);
        self.aggregator.record(&outcome);

        let Some(failure) = outcome.failure.take() else {
            return;
        };

        if matches!(failure, DeleteFailure::Cancelled) {
            tracing::warn!(
                worker = self.id,
                batch = outcome.batch_id,
                keys = outcome.failed_keys.len(),
                "batch abandoned after cancellation"
            );
            return;
        }

        tracing::error!(
            worker = self.id,
            batch = outcome.batch_id,
            deleted = outcome.deleted,
            failed = outcome.failed_keys.len(),
            attempts = outcome.attempts,
            error = %failure,
            "batch delete failed"
        );

        if self.failure_policy == FailurePolicy::Abort {
            let context = format!("batch {} failed", outcome.batch_id);
            let error = anyhow::Error::new(failure).context(format!(
                "batch {} left {} keys undeleted",
                outcome.batch_id,
                outcome.failed_keys.len()
            ));
            self.fatal_handler.trigger(context.as_str(), error);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
