use crate::delete::backoff::{retry_with_backoff, RetryBackoff, RetryDisposition, RetryPolicy};
use crate::store::client::{Item, ScanRequest, TableStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

enum PageState<C> {
    Start,
    Continue(C),
    Done,
}

/// Forward-only walk over a table's scan pages. Throttled pages are retried
/// with the shared backoff policy; any other error ends the walk.
pub(crate) struct PageScanner<S: TableStore> {
    store: Arc<S>,
    request: ScanRequest,
    policy: RetryPolicy,
    cancellation: CancellationToken,
    state: PageState<S::Cursor>,
}

impl<S: TableStore> PageScanner<S> {
    pub(crate) fn new(
        store: Arc<S>,
        request: ScanRequest,
        policy: RetryPolicy,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            store,
            request,
            policy,
            cancellation,
            state: PageState::Start,
        }
    }

    /// Next page of items, or `None` once the table is exhausted.
    pub(crate) async fn next_page(&mut self) -> Result<Option<Vec<Item>>> {
        let cursor = match &self.state {
            PageState::Done => return Ok(None),
            PageState::Start => None,
            PageState::Continue(cursor) => Some(cursor.clone()),
        };

        let store = self.store.as_ref();
        let request = &self.request;
        let table = request.table.as_str();

        let page = retry_with_backoff(
            RetryBackoff::new(self.policy).with_cancellation(&self.cancellation),
            |_| store.scan(request, cursor.clone()),
            |attempt, delay, err, will_retry| {
                if will_retry {
                    tracing::warn!(
                        table,
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "scan page throttled; retrying"
                    );
                }
            },
            |_, err| {
                if err.is_transient() {
                    RetryDisposition::Retry
                } else {
                    RetryDisposition::Abort
                }
            },
        )
        .await
        .with_context(|| format!("scan of table {table} failed"))?;

        self.state = match page.next {
            Some(next) => PageState::Continue(next),
            None => PageState::Done,
        };
        Ok(Some(page.items))
    }
}
