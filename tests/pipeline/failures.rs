use crate::support::helpers::{config_builder, init_tracing, Tables};
use anyhow::Result;
use orphansweep::store::{DeleteCall, StoreFault};
use orphansweep::{FailurePolicy, OrphanCollector};

#[tokio::test(start_paused = true)]
async fn unprocessed_keys_are_retried_once() -> Result<()> {
    init_tracing();
    let tables = Tables::new();
    tables.orphans("o", 10);
    let store = tables.store();
    store.push_delete_fault(StoreFault::Unprocessed(4));

    let report = OrphanCollector::new(config_builder().build()?, store.clone())
        .run()
        .await?;

    let calls = store.delete_calls();
    assert_eq!(store.batch_sizes(), vec![10, 4]);
    match &calls[1] {
        DeleteCall::Batch { keys, .. } => {
            assert_eq!(keys, &["o006", "o007", "o008", "o009"]);
        }
        other => panic!("unexpected call {other:?}"),
    }
    assert_eq!(report.keys_deleted, 10);
    assert_eq!(report.delete_calls, 2);
    assert!(tables.remaining_children().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn throttled_scan_pages_are_retried() -> Result<()> {
    init_tracing();
    let tables = Tables::new();
    tables.parent("A").child("c1", "A");
    tables.orphans("o", 3);
    let store = tables.store();
    store.push_scan_fault(StoreFault::Throttle);
    store.push_scan_fault(StoreFault::Throttle);

    let report = OrphanCollector::new(config_builder().build()?, store)
        .run()
        .await?;

    assert_eq!(report.parent_keys, 1);
    assert_eq!(report.keys_deleted, 3);
    Ok(())
}

#[tokio::test]
async fn permanent_scan_error_fails_the_run() -> Result<()> {
    init_tracing();
    let tables = Tables::new();
    tables.orphans("o", 3);
    let store = tables.store();
    store.push_scan_fault(StoreFault::Fail("table missing".into()));

    let err = OrphanCollector::new(config_builder().build()?, store.clone())
        .run()
        .await
        .unwrap_err();

    let message = format!("{err:#}");
    assert!(message.contains("orphan collection failed"), "got {message}");
    assert!(message.contains("table missing"), "got {message}");
    assert!(store.delete_calls().is_empty());
    assert_eq!(tables.remaining_children().len(), 3);
    Ok(())
}

#[tokio::test]
async fn continue_policy_reports_failed_keys() -> Result<()> {
    init_tracing();
    let tables = Tables::new();
    tables.orphans("o", 30);
    let store = tables.store();
    store.push_delete_fault(StoreFault::Fail("access denied".into()));

    let config = config_builder().max_workers(1).build()?;
    let report = OrphanCollector::new(config, store).run().await?;

    assert_eq!(report.keys_failed, 25);
    assert_eq!(report.keys_deleted, 5);
    assert_eq!(tables.remaining_children().len(), 25);
    Ok(())
}

#[tokio::test]
async fn abort_policy_fails_the_run() -> Result<()> {
    init_tracing();
    let tables = Tables::new();
    tables.orphans("o", 10);
    let store = tables.store();
    store.push_delete_fault(StoreFault::Fail("access denied".into()));

    let config = config_builder()
        .failure_policy(FailurePolicy::Abort)
        .build()?;
    let collector = OrphanCollector::new(config, store);
    let err = collector.run().await.unwrap_err();

    let message = format!("{err:#}");
    assert!(message.contains("orphan collection aborted"), "got {message}");
    assert!(message.contains("access denied"), "got {message}");
    assert!(!collector.cancellation_token().is_cancelled());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_remaining_keys() -> Result<()> {
    init_tracing();
    let tables = Tables::new();
    tables.orphans("o", 5);
    let store = tables.store();
    for _ in 0..3 {
        store.push_delete_fault(StoreFault::Throttle);
    }

    let config = config_builder().max_attempts(3).build()?;
    let report = OrphanCollector::new(config, store.clone()).run().await?;

    assert_eq!(store.batch_sizes(), vec![5, 5, 5]);
    assert_eq!(report.keys_failed, 5);
    assert_eq!(report.keys_deleted, 0);
    Ok(())
}
