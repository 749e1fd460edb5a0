use std::time::Duration;

use crate::support::helpers::{config_builder, init_tracing, Tables};
use anyhow::Result;
use orphansweep::store::StoreFault;
use orphansweep::Runner;
use tokio::time::{sleep, timeout};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_completes_a_pass() -> Result<()> {
    init_tracing();
    let tables = Tables::new();
    tables.parent("A").child("c1", "A");
    tables.orphans("o", 60);

    let runner = Runner::new(config_builder().build()?, tables.store());
    let report = timeout(Duration::from_secs(10), runner.run_until_ctrl_c()).await??;

    assert_eq!(report.keys_deleted, 60);
    assert_eq!(tables.remaining_children(), vec!["c1"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_runner_interrupts_retrying_batches() -> Result<()> {
    init_tracing();
    let tables = Tables::new();
    tables.orphans("o", 5);
    let store = tables.store();
    for _ in 0..50 {
        store.push_delete_fault(StoreFault::Throttle);
    }

    let config = config_builder()
        .initial_backoff(Duration::from_millis(200))
        .max_backoff(Duration::from_secs(5))
        .unbounded_retries()
        .build()?;
    let runner = Runner::new(config, store);
    let token = runner.cancellation_token();

    let canceller = tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let err = timeout(Duration::from_secs(5), runner.run_until_ctrl_c())
        .await?
        .unwrap_err();
    canceller.await?;

    let message = format!("{err:#}");
    assert!(message.contains("interrupted"), "got {message}");
    assert_eq!(tables.remaining_children().len(), 5);
    assert_eq!(runner.collector().telemetry().snapshot().keys_failed, 5);
    Ok(())
}
