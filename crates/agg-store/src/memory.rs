//! In-process store backend.
//!
//! One `tokio::sync::Mutex` guards all state, so every trait call is atomic
//! as a whole, including `merge_side`. Used by tests and by single-process
//! deployments that accept losing partial records on restart.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use agg_schemas::{AggError, CompletedRecord, MergeOutcome, PartialRecord, Side, SideEntry};
use tokio::sync::Mutex;
use tracing::debug;

use crate::PartialRecordStore;

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, PartialRecord>,
    ready: BTreeMap<Side, BTreeSet<String>>,
}

impl Inner {
    fn upsert(&mut self, entry: &SideEntry) {
        self.records
            .entry(entry.id().to_string())
            .or_insert_with(|| PartialRecord::empty(entry.id()))
            .merge(entry);
    }

    fn mark_ready(&mut self, id: &str, side: Side) {
        self.ready.entry(side).or_default().insert(id.to_string());
    }

    fn remove(&mut self, id: &str) {
        self.records.remove(id);
        for set in self.ready.values_mut() {
            set.remove(id);
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of partial records currently held.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of one readiness set.
    pub async fn ready_ids(&self, side: Side) -> BTreeSet<String> {
        self.inner
            .lock()
            .await
            .ready
            .get(&side)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl PartialRecordStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn upsert_side(&self, entry: &SideEntry) -> Result<(), AggError> {
        self.inner.lock().await.upsert(entry);
        Ok(())
    }

    async fn get_record(&self, id: &str) -> Result<Option<PartialRecord>, AggError> {
        Ok(self.inner.lock().await.records.get(id).cloned())
    }

    async fn get_records(&self, ids: &[String]) -> Result<Vec<PartialRecord>, AggError> {
        let inner = self.inner.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| inner.records.get(id).cloned())
            .collect())
    }

    async fn mark_side_ready(&self, id: &str, side: Side) -> Result<(), AggError> {
        self.inner.lock().await.mark_ready(id, side);
        Ok(())
    }

    async fn intersect_ready_sides(&self) -> Result<BTreeSet<String>, AggError> {
        let inner = self.inner.lock().await;
        let (Some(text), Some(image)) = (inner.ready.get(&Side::Text), inner.ready.get(&Side::Image))
        else {
            return Ok(BTreeSet::new());
        };
        Ok(text.intersection(image).cloned().collect())
    }

    async fn delete_records(&self, ids: &[String]) -> Result<(), AggError> {
        let mut inner = self.inner.lock().await;
        for id in ids {
            inner.remove(id);
        }
        debug!(count = ids.len(), "memory store delete");
        Ok(())
    }

    async fn delete_forwarded(&self, records: &[CompletedRecord]) -> Result<Vec<String>, AggError> {
        let mut inner = self.inner.lock().await;
        let mut kept = Vec::new();
        for r in records {
            match inner.records.get(&r.id) {
                Some(current) if !current.is_unchanged_since(r) => kept.push(r.id.clone()),
                _ => inner.remove(&r.id),
            }
        }
        debug!(count = records.len(), kept = kept.len(), "memory store delete forwarded");
        Ok(kept)
    }

    async fn batch_upsert(&self, entries: &[SideEntry]) -> Result<(), AggError> {
        let mut inner = self.inner.lock().await;
        for entry in entries {
            inner.upsert(entry);
            inner.mark_ready(entry.id(), entry.side());
        }
        Ok(())
    }

    async fn merge_side(&self, entry: &SideEntry) -> Result<MergeOutcome, AggError> {
        let mut inner = self.inner.lock().await;
        let was_complete = inner
            .records
            .get(entry.id())
            .map(PartialRecord::is_complete)
            .unwrap_or(false);
        inner.upsert(entry);
        inner.mark_ready(entry.id(), entry.side());
        let record = inner
            .records
            .get(entry.id())
            .cloned()
            .ok_or_else(|| AggError::store(format!("record '{}' vanished mid-merge", entry.id())))?;
        Ok(MergeOutcome {
            record,
            was_complete,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, side: Side, payload: &[f64]) -> SideEntry {
        SideEntry::new(id, side, payload.to_vec(), None).unwrap()
    }

    #[tokio::test]
    async fn upsert_creates_then_merges_fields() {
        let store = MemoryStore::new();
        store.upsert_side(&entry("a", Side::Text, &[1.0])).await.unwrap();
        store.upsert_side(&entry("a", Side::Image, &[2.0])).await.unwrap();

        let rec = store.get_record("a").await.unwrap().unwrap();
        assert!(rec.is_complete());
        assert_eq!(rec.sides[&Side::Text], vec![1.0]);
        assert_eq!(rec.sides[&Side::Image], vec![2.0]);
        assert_eq!(store.get_record("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn intersection_returns_ids_in_both_sets() {
        let store = MemoryStore::new();
        store.mark_side_ready("a", Side::Text).await.unwrap();
        assert!(store.intersect_ready_sides().await.unwrap().is_empty());

        store.mark_side_ready("a", Side::Image).await.unwrap();
        store.mark_side_ready("b", Side::Image).await.unwrap();
        let both = store.intersect_ready_sides().await.unwrap();
        assert_eq!(both, BTreeSet::from(["a".to_string()]));
    }

    #[tokio::test]
    async fn delete_clears_record_and_readiness_and_is_idempotent() {
        let store = MemoryStore::new();
        store
            .batch_upsert(&[entry("a", Side::Text, &[1.0]), entry("a", Side::Image, &[2.0])])
            .await
            .unwrap();
        assert_eq!(store.intersect_ready_sides().await.unwrap().len(), 1);

        let ids = vec!["a".to_string()];
        store.delete_records(&ids).await.unwrap();
        store.delete_records(&ids).await.unwrap();

        assert!(store.is_empty().await);
        assert!(store.intersect_ready_sides().await.unwrap().is_empty());
        assert!(store.ready_ids(Side::Text).await.is_empty());
    }

    #[tokio::test]
    async fn delete_forwarded_keeps_records_written_after_the_snapshot() {
        let store = MemoryStore::new();
        for id in ["a", "b"] {
            store.merge_side(&entry(id, Side::Text, &[0.1])).await.unwrap();
            store.merge_side(&entry(id, Side::Image, &[0.2])).await.unwrap();
        }
        let a = store.get_record("a").await.unwrap().unwrap().to_completed().unwrap().unwrap();
        let b = store.get_record("b").await.unwrap().unwrap().to_completed().unwrap().unwrap();

        store.merge_side(&entry("b", Side::Text, &[9.9])).await.unwrap();

        let kept = store.delete_forwarded(&[a.clone(), b]).await.unwrap();
        assert_eq!(kept, vec!["b".to_string()]);
        assert!(store.get_record("a").await.unwrap().is_none());
        assert_eq!(store.get_record("b").await.unwrap().unwrap().sides[&Side::Text], vec![9.9]);
        assert_eq!(
            store.intersect_ready_sides().await.unwrap(),
            BTreeSet::from(["b".to_string()])
        );

        // Already gone: nothing kept.
        assert!(store.delete_forwarded(&[a]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_records_omits_absent_ids() {
        let store = MemoryStore::new();
        store.upsert_side(&entry("a", Side::Text, &[1.0])).await.unwrap();
        let got = store
            .get_records(&["a".to_string(), "zzz".to_string()])
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, "a");
    }

    #[tokio::test]
    async fn merge_side_reports_prior_completeness() {
        let store = MemoryStore::new();
        let first = store.merge_side(&entry("m", Side::Text, &[1.0])).await.unwrap();
        assert!(!first.newly_completed());

        let second = store.merge_side(&entry("m", Side::Image, &[2.0])).await.unwrap();
        assert!(second.newly_completed());

        let third = store.merge_side(&entry("m", Side::Image, &[2.0])).await.unwrap();
        assert!(third.was_complete);
        assert!(!third.newly_completed());
        assert_eq!(
            store.intersect_ready_sides().await.unwrap(),
            BTreeSet::from(["m".to_string()])
        );
    }
}
