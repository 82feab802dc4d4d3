//! Single-submission join.
//!
//! # State per id
//!
//! ```text
//!   Absent ──side──► OneSidePresent ──other side──► Complete ──forwarded──► (deleted) Absent
//!                         │  ▲
//!                         └──┘ same side again (payload overwritten)
//! ```
//!
//! A completion is reported exactly on the `OneSidePresent → Complete`
//! transition. Resubmitting a side of a record that is already complete (but
//! not yet forwarded) does not report it again; the retry sweep owns those.
//!
//! # Consistency
//!
//! [`ConsistencyMode::Atomic`] runs the merge as one store-side atomic
//! read-modify-write, so two concurrent submissions for the two sides of one
//! id produce exactly one completion.
//!
//! [`ConsistencyMode::ReadMergeWrite`] is the plain get → merge → upsert
//! sequence. Field-level upserts keep both sides in the store under any
//! interleaving, but detection can race: both submissions may read the record
//! before the other's write lands and both report "not complete". The record
//! then sits complete in the store until [`PairJoinEngine::detect`] or the
//! retry sweep picks it up.

use std::fmt;
use std::str::FromStr;

use agg_schemas::{AggError, CompletedRecord, MergeOutcome, PartialRecord, SideEntry, ValidationError};
use agg_store::SharedStore;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsistencyMode {
    #[default]
    Atomic,
    ReadMergeWrite,
}

impl ConsistencyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsistencyMode::Atomic => "atomic",
            ConsistencyMode::ReadMergeWrite => "read_merge_write",
        }
    }
}

impl fmt::Display for ConsistencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsistencyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "atomic" => Ok(ConsistencyMode::Atomic),
            "read_merge_write" | "read-merge-write" => Ok(ConsistencyMode::ReadMergeWrite),
            other => Err(format!(
                "invalid consistency mode '{other}'. expected one of: atomic | read_merge_write"
            )),
        }
    }
}

#[derive(Clone)]
pub struct PairJoinEngine {
    store: SharedStore,
    mode: ConsistencyMode,
}

impl PairJoinEngine {
    pub fn new(store: SharedStore) -> Self {
        Self::with_mode(store, ConsistencyMode::Atomic)
    }

    pub fn with_mode(store: SharedStore, mode: ConsistencyMode) -> Self {
        Self { store, mode }
    }

    pub fn mode(&self) -> ConsistencyMode {
        self.mode
    }

    /// Merge one side and report the completed record if this submission
    /// completed the pair.
    ///
    /// Errors:
    /// - `StoreUnavailable` from any store call.
    /// - `Validation(PartitionKeyConflict)` when writes for this id disagree
    ///   on the partition key. The side is still stored.
    pub async fn submit(&self, entry: &SideEntry) -> Result<Option<CompletedRecord>, AggError> {
        let outcome = match self.mode {
            ConsistencyMode::Atomic => self.store.merge_side(entry).await?,
            ConsistencyMode::ReadMergeWrite => self.read_merge_write(entry).await?,
        };

        if outcome.record.partition_conflict {
            warn!(
                id = entry.id(),
                partition_key = ?outcome.record.partition_key,
                offered = ?entry.partition_key(),
                "partition key conflict; record will not be forwarded"
            );
            return Err(ValidationError::PartitionKeyConflict {
                id: entry.id().to_string(),
            }
            .into());
        }

        if !outcome.newly_completed() {
            debug!(
                id = entry.id(),
                side = %entry.side(),
                state = ?outcome.record.state(),
                "side merged"
            );
            return Ok(None);
        }

        let completed = outcome.record.to_completed()?;
        info!(
            id = entry.id(),
            partition_key = ?outcome.record.partition_key,
            "pair complete"
        );
        Ok(completed)
    }

    /// Re-read `id` and return its completed view if both sides are stored.
    ///
    /// This is the explicit recovery path for completions missed by a
    /// `ReadMergeWrite` race, or left behind by a failed forward.
    pub async fn detect(&self, id: &str) -> Result<Option<CompletedRecord>, AggError> {
        match self.store.get_record(id).await? {
            Some(record) => Ok(record.to_completed()?),
            None => Ok(None),
        }
    }

    async fn read_merge_write(&self, entry: &SideEntry) -> Result<MergeOutcome, AggError> {
        let mut record = self
            .store
            .get_record(entry.id())
            .await?
            .unwrap_or_else(|| PartialRecord::empty(entry.id()));
        let was_complete = record.is_complete();

        record.merge(entry);

        // Field-level write: only this side is sent, never the merged record.
        self.store.upsert_side(entry).await?;
        self.store.mark_side_ready(entry.id(), entry.side()).await?;

        Ok(MergeOutcome {
            record,
            was_complete,
        })
    }
}
