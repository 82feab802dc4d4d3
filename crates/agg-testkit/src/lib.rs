//! agg-testkit
//!
//! Fakes for scenario tests: sinks that record, fail or write mid-call, and
//! store wrappers that force interleavings or outages.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use agg_ingest::IngestionSink;
use agg_schemas::{AggError, CompletedRecord, MergeOutcome, PartialRecord, Side, SideEntry};
use agg_store::{PartialRecordStore, SharedStore};
use tokio::sync::Barrier;

pub fn entry(id: &str, side: Side, payload: &[f64]) -> SideEntry {
    SideEntry::new(id, side, payload.to_vec(), None).expect("valid test entry")
}

pub fn keyed_entry(id: &str, side: Side, payload: &[f64], key: &str) -> SideEntry {
    SideEntry::new(id, side, payload.to_vec(), Some(key.to_string())).expect("valid test entry")
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// One accepted sink call.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkCall {
    pub batch: bool,
    pub partition_key: Option<String>,
    pub records: Vec<CompletedRecord>,
}

/// Accepts everything and remembers it.
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Every id accepted, in acceptance order (duplicates kept).
    pub fn ingested_ids(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .flat_map(|c| c.records.into_iter().map(|r| r.id))
            .collect()
    }

    fn record(&self, call: SinkCall) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }
}

#[async_trait::async_trait]
impl IngestionSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn ingest_one(&self, record: &CompletedRecord) -> Result<(), AggError> {
        self.record(SinkCall {
            batch: false,
            partition_key: record.partition_key.clone(),
            records: vec![record.clone()],
        });
        Ok(())
    }

    async fn ingest_batch(
        &self,
        partition_key: Option<&str>,
        records: &[CompletedRecord],
    ) -> Result<(), AggError> {
        self.record(SinkCall {
            batch: true,
            partition_key: partition_key.map(str::to_string),
            records: records.to_vec(),
        });
        Ok(())
    }
}

/// Rejects the first `failures` calls with a 503, then records like
/// [`RecordingSink`].
#[derive(Debug)]
pub struct FailingSink {
    remaining: AtomicUsize,
    attempts: AtomicUsize,
    accepted: RecordingSink,
}

impl FailingSink {
    pub fn failing_times(failures: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
            accepted: RecordingSink::new(),
        }
    }

    pub fn always() -> Self {
        Self::failing_times(usize::MAX)
    }

    /// Stop failing from the next call on.
    pub fn recover(&self) {
        self.remaining.store(0, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> &RecordingSink {
        &self.accepted
    }

    fn gate(&self) -> Result<(), AggError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AggError::SinkRejected {
                status: Some(503),
                message: "ingestion unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl IngestionSink for FailingSink {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn ingest_one(&self, record: &CompletedRecord) -> Result<(), AggError> {
        self.gate()?;
        self.accepted.ingest_one(record).await
    }

    async fn ingest_batch(
        &self,
        partition_key: Option<&str>,
        records: &[CompletedRecord],
    ) -> Result<(), AggError> {
        self.gate()?;
        self.accepted.ingest_batch(partition_key, records).await
    }
}

/// Accepts like [`RecordingSink`], but the first call merges `pending` into
/// the store before returning, as a resubmission landing while the forward
/// is in flight would.
pub struct MidFlightWriteSink {
    store: SharedStore,
    pending: Mutex<Option<SideEntry>>,
    accepted: RecordingSink,
}

impl MidFlightWriteSink {
    pub fn new(store: SharedStore, pending: SideEntry) -> Self {
        Self {
            store,
            pending: Mutex::new(Some(pending)),
            accepted: RecordingSink::new(),
        }
    }

    pub fn accepted(&self) -> &RecordingSink {
        &self.accepted
    }

    async fn write_pending(&self) -> Result<(), AggError> {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(entry) = pending {
            self.store.merge_side(&entry).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl IngestionSink for MidFlightWriteSink {
    fn name(&self) -> &'static str {
        "mid-flight-write"
    }

    async fn ingest_one(&self, record: &CompletedRecord) -> Result<(), AggError> {
        self.write_pending().await?;
        self.accepted.ingest_one(record).await
    }

    async fn ingest_batch(
        &self,
        partition_key: Option<&str>,
        records: &[CompletedRecord],
    ) -> Result<(), AggError> {
        self.write_pending().await?;
        self.accepted.ingest_batch(partition_key, records).await
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// Delegates to an inner store, but every `get_record` waits on a shared
/// barrier after reading and before returning.
///
/// With a barrier of 2, two concurrent read-merge-write submissions both read
/// the pre-write state before either writes, which is the lost-completion
/// interleaving. `merge_side` is not gated.
pub struct GatedStore {
    inner: SharedStore,
    barrier: Barrier,
}

impl GatedStore {
    pub fn new(inner: SharedStore, parties: usize) -> Self {
        Self {
            inner,
            barrier: Barrier::new(parties),
        }
    }
}

#[async_trait::async_trait]
impl PartialRecordStore for GatedStore {
    fn backend_name(&self) -> &'static str {
        "gated"
    }

    async fn upsert_side(&self, entry: &SideEntry) -> Result<(), AggError> {
        self.inner.upsert_side(entry).await
    }

    async fn get_record(&self, id: &str) -> Result<Option<PartialRecord>, AggError> {
        let read = self.inner.get_record(id).await;
        self.barrier.wait().await;
        read
    }

    async fn get_records(&self, ids: &[String]) -> Result<Vec<PartialRecord>, AggError> {
        self.inner.get_records(ids).await
    }

    async fn mark_side_ready(&self, id: &str, side: Side) -> Result<(), AggError> {
        self.inner.mark_side_ready(id, side).await
    }

    async fn intersect_ready_sides(&self) -> Result<BTreeSet<String>, AggError> {
        self.inner.intersect_ready_sides().await
    }

    async fn delete_records(&self, ids: &[String]) -> Result<(), AggError> {
        self.inner.delete_records(ids).await
    }

    async fn delete_forwarded(&self, records: &[CompletedRecord]) -> Result<Vec<String>, AggError> {
        self.inner.delete_forwarded(records).await
    }

    async fn batch_upsert(&self, entries: &[SideEntry]) -> Result<(), AggError> {
        self.inner.batch_upsert(entries).await
    }

    async fn merge_side(&self, entry: &SideEntry) -> Result<MergeOutcome, AggError> {
        self.inner.merge_side(entry).await
    }
}

/// Delegates to an inner store until switched off; then every call fails
/// with `StoreUnavailable`.
pub struct FlakyStore {
    inner: SharedStore,
    down: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: SharedStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            down: AtomicBool::new(false),
        })
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), AggError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(AggError::store("connection refused"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PartialRecordStore for FlakyStore {
    fn backend_name(&self) -> &'static str {
        "flaky"
    }

    async fn upsert_side(&self, entry: &SideEntry) -> Result<(), AggError> {
        self.check()?;
        self.inner.upsert_side(entry).await
    }

    async fn get_record(&self, id: &str) -> Result<Option<PartialRecord>, AggError> {
        self.check()?;
        self.inner.get_record(id).await
    }

    async fn get_records(&self, ids: &[String]) -> Result<Vec<PartialRecord>, AggError> {
        self.check()?;
        self.inner.get_records(ids).await
    }

    async fn mark_side_ready(&self, id: &str, side: Side) -> Result<(), AggError> {
        self.check()?;
        self.inner.mark_side_ready(id, side).await
    }

    async fn intersect_ready_sides(&self) -> Result<BTreeSet<String>, AggError> {
        self.check()?;
        self.inner.intersect_ready_sides().await
    }

    async fn delete_records(&self, ids: &[String]) -> Result<(), AggError> {
        self.check()?;
        self.inner.delete_records(ids).await
    }

    async fn delete_forwarded(&self, records: &[CompletedRecord]) -> Result<Vec<String>, AggError> {
        self.check()?;
        self.inner.delete_forwarded(records).await
    }

    async fn batch_upsert(&self, entries: &[SideEntry]) -> Result<(), AggError> {
        self.check()?;
        self.inner.batch_upsert(entries).await
    }

    async fn merge_side(&self, entry: &SideEntry) -> Result<MergeOutcome, AggError> {
        self.check()?;
        self.inner.merge_side(entry).await
    }
}
