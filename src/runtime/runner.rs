use crate::runtime::collector::{CollectionReport, OrphanCollector};
use crate::runtime::config::CollectorConfig;
use crate::store::client::TableStore;
use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Drives a collection pass and turns Ctrl-C into a graceful cancellation.
pub struct Runner<S: TableStore> {
    collector: OrphanCollector<S>,
    shutdown: CancellationToken,
}

impl<S: TableStore> Runner<S> {
    /// Creates a new runner with a root [`CancellationToken`] shared by the
    /// scanner, the delete workers, and their backoff sleeps.
    pub fn new(config: CollectorConfig, store: Arc<S>) -> Self {
        let shutdown = CancellationToken::new();
        let collector = OrphanCollector::with_cancellation_token(config, store, shutdown.clone());
        Self {
            collector,
            shutdown,
        }
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn collector(&self) -> &OrphanCollector<S> {
        &self.collector
    }

    /// Runs one pass to completion, or until a Ctrl-C (SIGINT) cancels it.
    /// In-flight batches stop retrying and the worker pool drains before returning.
    pub async fn run_until_ctrl_c(&self) -> Result<CollectionReport> {
        tracing::info!("runner started; Ctrl-C (SIGINT) cancels the run");

        let run = self.collector.run();
        tokio::pin!(run);

        let interrupted = tokio::select! {
            result = &mut run => return result,
            signal = signal::ctrl_c() => match signal {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(error = %err, "unable to listen for Ctrl-C; running to completion");
                    false
                }
            },
        };

        if interrupted {
            tracing::info!("Ctrl-C received; cancelling collection");
            self.shutdown.cancel();
        }
        run.await
    }
}
