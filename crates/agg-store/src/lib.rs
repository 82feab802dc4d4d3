//! agg-store
//!
//! Store boundary for partial records.
//!
//! This crate defines **only** the store contract and the in-process backend.
//! The Postgres backend lives in `agg-db`; join logic lives in `agg-join`.
//!
//! # Contract
//! - Every write is a **field-level** merge: writing one side never touches
//!   the other side of the same id.
//! - Calls for different ids never interfere.
//! - Readiness sets are a hint layered over the records; the records are
//!   authoritative.
//! - [`PartialRecordStore::merge_side`] is the single atomic per-id
//!   read-modify-write. Implementations must not let another write for the
//!   same id land between its merge and its read-back.

mod memory;

use std::collections::BTreeSet;
use std::sync::Arc;

use agg_schemas::{AggError, CompletedRecord, MergeOutcome, PartialRecord, Side, SideEntry};

pub use memory::MemoryStore;

/// Shared key-value store holding partial records and readiness sets.
///
/// Implementations must be `Send + Sync`; a single instance is shared by all
/// concurrent submissions behind an `Arc`.
#[async_trait::async_trait]
pub trait PartialRecordStore: Send + Sync {
    /// Backend name for logs (e.g. `"memory"`, `"postgres"`).
    fn backend_name(&self) -> &'static str;

    /// Merge `entry.payload` under `entry.side`, creating the record if absent.
    async fn upsert_side(&self, entry: &SideEntry) -> Result<(), AggError>;

    async fn get_record(&self, id: &str) -> Result<Option<PartialRecord>, AggError>;

    /// Bulk read in one round trip. Absent ids are omitted from the result.
    async fn get_records(&self, ids: &[String]) -> Result<Vec<PartialRecord>, AggError>;

    /// Add `id` to the readiness set of `side`.
    async fn mark_side_ready(&self, id: &str, side: Side) -> Result<(), AggError>;

    /// Ids present in both readiness sets at call time, across the whole store.
    async fn intersect_ready_sides(&self) -> Result<BTreeSet<String>, AggError>;

    /// Remove records and their readiness membership. Idempotent.
    ///
    /// Unconditional; the forward path uses [`Self::delete_forwarded`].
    async fn delete_records(&self, ids: &[String]) -> Result<(), AggError>;

    /// Delete the records the sink just confirmed, but only where the stored
    /// state still equals what was forwarded. Checked and deleted atomically
    /// per id.
    ///
    /// Returns the ids kept because a write landed after the completed view
    /// was taken; their newer state is left for the retry sweep. Ids already
    /// gone count as deleted.
    async fn delete_forwarded(&self, records: &[CompletedRecord]) -> Result<Vec<String>, AggError>;

    /// `upsert_side` + `mark_side_ready` for every entry, in one round trip.
    async fn batch_upsert(&self, entries: &[SideEntry]) -> Result<(), AggError>;

    /// Atomic per-id merge: upsert the side, mark it ready, and return the
    /// post-merge record together with whether it was complete beforehand.
    async fn merge_side(&self, entry: &SideEntry) -> Result<MergeOutcome, AggError>;
}

#[async_trait::async_trait]
impl<S: PartialRecordStore + ?Sized> PartialRecordStore for Arc<S> {
    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }

    async fn upsert_side(&self, entry: &SideEntry) -> Result<(), AggError> {
        (**self).upsert_side(entry).await
    }

    async fn get_record(&self, id: &str) -> Result<Option<PartialRecord>, AggError> {
        (**self).get_record(id).await
    }

    async fn get_records(&self, ids: &[String]) -> Result<Vec<PartialRecord>, AggError> {
        (**self).get_records(ids).await
    }

    async fn mark_side_ready(&self, id: &str, side: Side) -> Result<(), AggError> {
        (**self).mark_side_ready(id, side).await
    }

    async fn intersect_ready_sides(&self) -> Result<BTreeSet<String>, AggError> {
        (**self).intersect_ready_sides().await
    }

    async fn delete_records(&self, ids: &[String]) -> Result<(), AggError> {
        (**self).delete_records(ids).await
    }

    async fn delete_forwarded(&self, records: &[CompletedRecord]) -> Result<Vec<String>, AggError> {
        (**self).delete_forwarded(records).await
    }

    async fn batch_upsert(&self, entries: &[SideEntry]) -> Result<(), AggError> {
        (**self).batch_upsert(entries).await
    }

    async fn merge_side(&self, entry: &SideEntry) -> Result<MergeOutcome, AggError> {
        (**self).merge_side(entry).await
    }
}

/// Shared handle type used by the engines and the forwarder.
pub type SharedStore = Arc<dyn PartialRecordStore>;
