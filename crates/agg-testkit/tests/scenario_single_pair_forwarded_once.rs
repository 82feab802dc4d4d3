//! Scenario: single-submission path, end to end.
//!
//! # Invariants under test
//! - A record is forwarded exactly when its second side arrives, with both
//!   payloads intact, and is removed from the store afterwards.
//! - Arrival order does not matter.
//! - Resubmitting a side overwrites its payload; it never completes a record
//!   on its own and never forwards twice.
//! - A record with only one side is never forwarded.

use std::sync::Arc;

use agg_join::ConsistencyMode;
use agg_runtime::Aggregator;
use agg_schemas::Side;
use agg_store::{MemoryStore, PartialRecordStore};
use agg_testkit::{entry, RecordingSink};

fn setup(mode: ConsistencyMode) -> (Arc<MemoryStore>, Arc<RecordingSink>, Aggregator) {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::new());
    let agg = Aggregator::new(store.clone(), sink.clone(), mode, 100);
    (store, sink, agg)
}

#[tokio::test]
async fn x1_forwarded_on_second_side_then_cleared() {
    let (store, sink, agg) = setup(ConsistencyMode::Atomic);

    let first = agg
        .aggregate_one(&entry("x1", Side::Text, &[0.1, 0.2]))
        .await
        .unwrap();
    assert!(first.is_none());
    assert!(sink.calls().is_empty(), "nothing forwarded after one side");

    let done = agg
        .aggregate_one(&entry("x1", Side::Image, &[0.9, 0.8]))
        .await
        .unwrap()
        .expect("second side completes");
    assert_eq!(done.text, vec![0.1, 0.2]);
    assert_eq!(done.image, vec![0.9, 0.8]);

    let calls = sink.calls();
    assert_eq!(calls.len(), 1);
    assert!(!calls[0].batch);
    assert_eq!(calls[0].records, vec![done]);

    assert!(store.get_record("x1").await.unwrap().is_none());
    assert!(store.intersect_ready_sides().await.unwrap().is_empty());
}

#[tokio::test]
async fn order_does_not_matter() {
    for mode in [ConsistencyMode::Atomic, ConsistencyMode::ReadMergeWrite] {
        let (_, sink_ab, ab) = setup(mode);
        let (_, sink_ba, ba) = setup(mode);
        let t = entry("c", Side::Text, &[1.0, 2.0]);
        let i = entry("c", Side::Image, &[3.0]);

        ab.aggregate_one(&t).await.unwrap();
        ab.aggregate_one(&i).await.unwrap();
        ba.aggregate_one(&i).await.unwrap();
        ba.aggregate_one(&t).await.unwrap();

        assert_eq!(sink_ab.calls(), sink_ba.calls(), "mode {mode}");
        assert_eq!(sink_ab.ingested_ids(), vec!["c".to_string()]);
    }
}

#[tokio::test]
async fn resubmitted_side_overwrites_and_forwards_once() {
    let (store, sink, agg) = setup(ConsistencyMode::Atomic);

    agg.aggregate_one(&entry("r", Side::Text, &[1.0])).await.unwrap();
    agg.aggregate_one(&entry("r", Side::Text, &[1.5])).await.unwrap();
    let rec = store.get_record("r").await.unwrap().unwrap();
    assert_eq!(rec.sides.len(), 1);
    assert_eq!(rec.sides[&Side::Text], vec![1.5]);

    let done = agg
        .aggregate_one(&entry("r", Side::Image, &[2.0]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.text, vec![1.5], "last write for a side wins");
    assert_eq!(sink.ingested_ids(), vec!["r".to_string()]);
}

#[tokio::test]
async fn one_sided_record_is_never_forwarded() {
    let (store, sink, agg) = setup(ConsistencyMode::Atomic);
    for i in 0..3 {
        let out = agg
            .aggregate_one(&entry("solo", Side::Image, &[i as f64]))
            .await
            .unwrap();
        assert!(out.is_none());
    }
    assert!(sink.calls().is_empty());
    assert!(agg_runtime::sweep_once(&agg).await.unwrap().candidates == 0);
    assert!(store.get_record("solo").await.unwrap().is_some());
}
