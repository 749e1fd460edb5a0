use crate::runtime::config::CollectorConfig;
use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Exponential backoff parameters shared by scan paging and batch deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: Option<usize>,
}

impl RetryPolicy {
    pub(crate) fn from_config(config: &CollectorConfig) -> Self {
        Self {
            initial_delay: config.initial_backoff(),
            max_delay: config.max_backoff(),
            max_attempts: config.max_attempts(),
        }
    }

    pub(crate) fn exhausted(&self, attempt: usize) -> bool {
        self.max_attempts.map(|max| attempt >= max).unwrap_or(false)
    }
}

#[derive(Clone, Copy)]
pub(crate) struct RetryBackoff<'a> {
    pub policy: RetryPolicy,
    pub cancellation: Option<&'a CancellationToken>,
}

impl<'a> RetryBackoff<'a> {
    pub(crate) fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            cancellation: None,
        }
    }

    pub(crate) fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

pub(crate) enum RetryDisposition {
    Retry,
    Abort,
}

/// Runs `operation` until it succeeds, `classify_error` aborts, the attempt cap
/// is reached, or the cancellation token fires.
pub(crate) async fn retry_with_backoff<'a, T, E, F, Fut, L, C>(
    config: RetryBackoff<'a>,
    mut operation: F,
    mut on_retry: L,
    mut classify_error: C,
) -> Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    L: FnMut(usize, Duration, &E, bool),
    C: FnMut(usize, &E) -> RetryDisposition,
{
    let mut attempt = 0;
    let mut backoff = config.policy.initial_delay;

    loop {
        attempt += 1;

        if let Some(token) = config.cancellation {
            if token.is_cancelled() {
                return Err(anyhow!("retry cancelled"));
            }
        }

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => match classify_error(attempt, &err) {
                RetryDisposition::Abort => return Err(err.into()),
                RetryDisposition::Retry => {
                    let exhausted = config.policy.exhausted(attempt);

                    on_retry(attempt, backoff, &err, !exhausted);

                    if exhausted {
                        return Err(anyhow::Error::new(err)
                            .context(format!("gave up after {attempt} attempts")));
                    }

                    sleep_with_cancellation(backoff, config.cancellation).await?;
                    backoff = next_backoff(backoff, config.policy.max_delay);
                }
            },
        }
    }
}

pub(crate) async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: Option<&CancellationToken>,
) -> Result<()> {
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    if let Some(token) = cancellation {
        tokio::select! {
            _ = token.cancelled() => Err(anyhow!("retry cancelled")),
            _ = sleep(delay) => Ok(()),
        }
    } else {
        sleep(delay).await;
        Ok(())
    }
}

pub(crate) fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}
