use std::time::Duration;

use crate::support::helpers::{
    config_builder, init_tracing, noon, Tables, CHILDREN, CREATED_AT, TIMESTAMP_FORMAT,
};
use anyhow::Result;
use orphansweep::store::memory::item;
use orphansweep::store::DeleteCall;
use orphansweep::{DeleteMode, OrphanCollector};

#[tokio::test]
async fn deletes_children_of_missing_parents() -> Result<()> {
    init_tracing();
    let tables = Tables::new();
    tables.parent("A").parent("B");
    tables
        .child("c1", "A")
        .child("c2", "B")
        .child("c3", "C")
        .child("c4", "D");

    let collector = OrphanCollector::new(config_builder().build()?, tables.store());
    let report = collector.run().await?;

    assert_eq!(tables.remaining_children(), vec!["c1", "c2"]);
    assert_eq!(report.parent_keys, 2);
    assert_eq!(report.child_items_scanned, 4);
    assert_eq!(report.orphans_found, 2);
    assert_eq!(report.keys_deleted, 2);
    assert_eq!(report.keys_failed, 0);
    assert_eq!(report.batches_dispatched, 1);
    Ok(())
}

#[tokio::test]
async fn staleness_cutoff_spares_recent_orphans() -> Result<()> {
    init_tracing();
    let tables = Tables::new();
    tables.parent("A");
    tables
        .dated_child("kept", "A", "2024-03-01T08:00:00")
        .dated_child("fresh", "C", "2024-03-01T11:30:00")
        .dated_child("stale", "D", "2024-03-01T10:59:59")
        .child("undated", "E");

    let config = config_builder()
        .staleness_attribute(CREATED_AT)
        .timestamp_format(TIMESTAMP_FORMAT)
        .staleness_offset(Duration::from_secs(3600))
        .build()?;
    let report = OrphanCollector::new(config, tables.store())
        .run_at(noon())
        .await?;

    assert_eq!(tables.remaining_children(), vec!["fresh", "kept", "undated"]);
    assert_eq!(report.orphans_found, 1);
    assert_eq!(report.fresh_orphans_retained, 2);
    assert_eq!(report.keys_deleted, 1);
    Ok(())
}

#[tokio::test]
async fn thirty_orphans_take_two_calls() -> Result<()> {
    init_tracing();
    let tables = Tables::new();
    tables.parent("A").child("live", "A");
    tables.orphans("o", 30);

    let store = tables.store();
    let report = OrphanCollector::new(config_builder().build()?, store.clone())
        .run()
        .await?;

    let mut sizes = store.batch_sizes();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![5, 25]);
    assert_eq!(report.keys_deleted, 30);
    assert_eq!(report.delete_calls, 2);
    assert_eq!(tables.remaining_children(), vec!["live"]);
    Ok(())
}

#[tokio::test]
async fn single_worker_processes_every_batch() -> Result<()> {
    init_tracing();
    let tables = Tables::new();
    tables.orphans("o", 130);

    let config = config_builder().max_workers(1).queue_threshold(1).build()?;
    let report = OrphanCollector::new(config, tables.store()).run().await?;

    assert_eq!(report.batches_dispatched, 6);
    assert_eq!(report.keys_deleted, 130);
    assert!(tables.remaining_children().is_empty());
    Ok(())
}

#[tokio::test]
async fn no_orphans_means_no_delete_calls() -> Result<()> {
    init_tracing();
    let tables = Tables::new();
    tables.parent("A").parent("B");
    tables.child("c1", "A").child("c2", "B");

    let store = tables.store();
    let report = OrphanCollector::new(config_builder().build()?, store.clone())
        .run()
        .await?;

    assert!(store.delete_calls().is_empty());
    assert_eq!(report.keys_deleted, 0);
    assert_eq!(report.batches_dispatched, 0);
    assert_eq!(tables.remaining_children().len(), 2);
    Ok(())
}

#[tokio::test]
async fn single_mode_deletes_one_key_per_call() -> Result<()> {
    init_tracing();
    let tables = Tables::new();
    tables.parent("A").child("live", "A");
    tables.orphans("o", 4);

    let store = tables.store();
    let config = config_builder().delete_mode(DeleteMode::Single).build()?;
    let report = OrphanCollector::new(config, store.clone()).run().await?;

    let calls = store.delete_calls();
    assert_eq!(calls.len(), 4);
    assert!(calls
        .iter()
        .all(|call| matches!(call, DeleteCall::Single { .. })));
    assert_eq!(report.batches_dispatched, 4);
    assert_eq!(tables.remaining_children(), vec!["live"]);
    Ok(())
}

#[tokio::test]
async fn malformed_children_are_skipped() -> Result<()> {
    init_tracing();
    let tables = Tables::new();
    tables.child("c1", "gone");
    tables
        .store()
        .put(CHILDREN, item([("id", "broken")]))
        .unwrap();

    let report = OrphanCollector::new(config_builder().build()?, tables.store())
        .run()
        .await?;

    assert_eq!(report.malformed_records, 1);
    assert_eq!(report.keys_deleted, 1);
    assert_eq!(tables.remaining_children(), vec!["broken"]);
    Ok(())
}

#[tokio::test]
async fn repeated_runs_report_their_own_totals() -> Result<()> {
    init_tracing();
    let tables = Tables::new();
    tables.orphans("o", 3);

    let collector = OrphanCollector::new(config_builder().build()?, tables.store());
    let first = collector.run().await?;
    tables.orphans("p", 2);
    let second = collector.run().await?;

    assert_eq!(first.keys_deleted, 3);
    assert_eq!(second.keys_deleted, 2);
    assert_eq!(collector.telemetry().snapshot().keys_deleted, 5);
    Ok(())
}
