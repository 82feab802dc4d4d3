//! Pipelined batch join.
//!
//! Three store round trips per call, regardless of batch size:
//!
//! 1. `batch_upsert`: every side merged and marked ready.
//! 2. `intersect_ready_sides`: every id in the WHOLE store with both sides
//!    ready, so a pair whose first half arrived in an earlier call is found.
//! 3. `get_records`: bulk fetch of the intersection.
//!
//! The readiness sets are only a hint; each fetched record is re-checked for
//! both sides before a [`CompletedRecord`] is built.

use std::collections::BTreeSet;

use agg_schemas::{AggError, CompletedRecord, SideEntry};
use agg_store::SharedStore;
use tracing::{debug, info, warn};

/// What one batch call discovered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchJoinOutcome {
    /// Completed records, sorted by id.
    pub completed: Vec<CompletedRecord>,
    /// Complete ids refused because their writes disagreed on the partition key.
    pub conflicted: Vec<String>,
    /// Ids the readiness sets reported that were absent or incomplete.
    pub stale_hints: usize,
}

#[derive(Clone)]
pub struct BatchJoinEngine {
    store: SharedStore,
}

impl BatchJoinEngine {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Merge every entry and return all records that are complete afterwards.
    ///
    /// An empty batch does nothing and touches no store.
    pub async fn submit_batch(&self, entries: &[SideEntry]) -> Result<BatchJoinOutcome, AggError> {
        if entries.is_empty() {
            debug!("empty batch; nothing to join");
            return Ok(BatchJoinOutcome::default());
        }

        self.store.batch_upsert(entries).await?;
        let outcome = self.collect_ready().await?;

        info!(
            submitted = entries.len(),
            completed = outcome.completed.len(),
            conflicted = outcome.conflicted.len(),
            "batch joined"
        );
        Ok(outcome)
    }

    /// Steps 2–3 alone: every record currently complete in the store.
    ///
    /// Used by the retry sweep to find completed-but-unforwarded records.
    pub async fn collect_ready(&self) -> Result<BatchJoinOutcome, AggError> {
        let ready = self.store.intersect_ready_sides().await?;
        self.fetch_completed(ready).await
    }

    async fn fetch_completed(&self, ready: BTreeSet<String>) -> Result<BatchJoinOutcome, AggError> {
        let mut outcome = BatchJoinOutcome::default();
        if ready.is_empty() {
            return Ok(outcome);
        }

        let ids: Vec<String> = ready.into_iter().collect();
        let records = self.store.get_records(&ids).await?;
        outcome.stale_hints = ids.len().saturating_sub(records.len());

        for record in records {
            match record.to_completed() {
                Ok(Some(done)) => outcome.completed.push(done),
                Ok(None) => outcome.stale_hints += 1,
                Err(_) => {
                    warn!(
                        id = %record.id,
                        partition_key = ?record.partition_key,
                        "partition key conflict; record will not be forwarded"
                    );
                    outcome.conflicted.push(record.id);
                }
            }
        }

        outcome.completed.sort_by(|a, b| a.id.cmp(&b.id));
        outcome.conflicted.sort();
        if outcome.stale_hints > 0 {
            debug!(stale = outcome.stale_hints, "readiness hints without a complete record");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use agg_schemas::{PartialRecord, Side};
    use agg_store::{MemoryStore, PartialRecordStore};

    use super::*;
    use crate::PairJoinEngine;

    fn entry(id: &str, side: Side, payload: &[f64]) -> SideEntry {
        SideEntry::new(id, side, payload.to_vec(), None).unwrap()
    }

    #[tokio::test]
    async fn y_completes_and_z_stays_partial() {
        let store = Arc::new(MemoryStore::new());
        let engine = BatchJoinEngine::new(store.clone());

        let outcome = engine
            .submit_batch(&[
                entry("y", Side::Text, &[0.1]),
                entry("y", Side::Image, &[0.2]),
                entry("z", Side::Text, &[0.3]),
            ])
            .await
            .unwrap();

        let ids: Vec<&str> = outcome.completed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["y"]);
        assert!(outcome.conflicted.is_empty());

        let z = store.get_record("z").await.unwrap().unwrap();
        assert!(!z.is_complete());
    }

    #[tokio::test]
    async fn pair_split_across_calls_is_found() {
        let store = Arc::new(MemoryStore::new());
        let engine = BatchJoinEngine::new(store);

        let first = engine.submit_batch(&[entry("s", Side::Image, &[1.0])]).await.unwrap();
        assert!(first.completed.is_empty());

        let second = engine.submit_batch(&[entry("s", Side::Text, &[2.0])]).await.unwrap();
        assert_eq!(second.completed.len(), 1);
        assert_eq!(second.completed[0].image, vec![1.0]);
        assert_eq!(second.completed[0].text, vec![2.0]);
    }

    #[tokio::test]
    async fn empty_batch_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        store.mark_side_ready("ghost", Side::Text).await.unwrap();
        store.mark_side_ready("ghost", Side::Image).await.unwrap();

        let engine = BatchJoinEngine::new(store);
        assert_eq!(engine.submit_batch(&[]).await.unwrap(), BatchJoinOutcome::default());
    }

    #[tokio::test]
    async fn readiness_is_a_hint_not_truth() {
        let store = Arc::new(MemoryStore::new());
        store.mark_side_ready("ghost", Side::Text).await.unwrap();
        store.mark_side_ready("ghost", Side::Image).await.unwrap();
        store.upsert_side(&entry("half", Side::Text, &[1.0])).await.unwrap();
        store.mark_side_ready("half", Side::Text).await.unwrap();
        store.mark_side_ready("half", Side::Image).await.unwrap();

        let engine = BatchJoinEngine::new(store);
        let outcome = engine.collect_ready().await.unwrap();
        assert!(outcome.completed.is_empty());
        assert_eq!(outcome.stale_hints, 2);
    }

    #[tokio::test]
    async fn conflicted_records_are_reported_not_completed() {
        let store = Arc::new(MemoryStore::new());
        let engine = BatchJoinEngine::new(store);

        let outcome = engine
            .submit_batch(&[
                SideEntry::new("p", Side::Text, vec![1.0], Some("docs".into())).unwrap(),
                SideEntry::new("p", Side::Image, vec![1.0], Some("media".into())).unwrap(),
                SideEntry::new("q", Side::Text, vec![1.0], Some("docs".into())).unwrap(),
                SideEntry::new("q", Side::Image, vec![1.0], Some("docs".into())).unwrap(),
            ])
            .await
            .unwrap();

        assert_eq!(outcome.conflicted, vec!["p".to_string()]);
        assert_eq!(outcome.completed.len(), 1);
        assert_eq!(outcome.completed[0].partition_key.as_deref(), Some("docs"));
    }

    #[tokio::test]
    async fn batch_matches_sequential_single_path() {
        let entries = vec![
            entry("a", Side::Text, &[1.0]),
            entry("b", Side::Image, &[2.0]),
            entry("a", Side::Image, &[3.0]),
            entry("c", Side::Text, &[4.0]),
            entry("b", Side::Text, &[5.0]),
        ];

        for order in [entries.clone(), entries.iter().rev().cloned().collect()] {
            let seq_store = Arc::new(MemoryStore::new());
            let pair = PairJoinEngine::new(seq_store.clone());
            let mut seq_ids = BTreeSet::new();
            for e in &order {
                if let Some(done) = pair.submit(e).await.unwrap() {
                    seq_ids.insert(done.id);
                }
            }

            let batch_store = Arc::new(MemoryStore::new());
            let batch = BatchJoinEngine::new(batch_store.clone());
            let outcome = batch.submit_batch(&order).await.unwrap();
            let batch_ids: BTreeSet<String> =
                outcome.completed.into_iter().map(|r| r.id).collect();

            assert_eq!(seq_ids, batch_ids);
            assert_eq!(batch_ids, BTreeSet::from(["a".to_string(), "b".to_string()]));

            for id in ["a", "b", "c"] {
                let s: Option<PartialRecord> = seq_store.get_record(id).await.unwrap();
                let b: Option<PartialRecord> = batch_store.get_record(id).await.unwrap();
                assert_eq!(s, b, "stored state for {id}");
            }
        }
    }
}
