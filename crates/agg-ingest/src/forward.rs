//! Forward-then-delete.
//!
//! Store entries are deleted only after the sink confirmed the records, and
//! only if they still hold what was sent. A side overwritten while the sink
//! call was in flight keeps the record for the retry sweep. A sink failure
//! leaves the store untouched. A crash between a confirmed forward and the delete
//! forwards the same records twice on retry; sinks should treat `id` as an
//! idempotency key.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use agg_schemas::{AggError, CompletedRecord};
use agg_store::SharedStore;
use tracing::{info, warn};

use crate::IngestionSink;

pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;

#[derive(Clone)]
pub struct IngestionForwarder {
    sink: Arc<dyn IngestionSink>,
    store: SharedStore,
    max_batch_size: usize,
}

/// One group that could not be forwarded (or could not be cleaned up).
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardFailure {
    pub partition_key: Option<String>,
    pub ids: Vec<String>,
    pub error: AggError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForwardReport {
    pub forwarded: Vec<String>,
    pub failed: Vec<ForwardFailure>,
}

impl ForwardReport {
    pub fn failed_ids(&self) -> usize {
        self.failed.iter().map(|f| f.ids.len()).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl IngestionForwarder {
    pub fn new(sink: Arc<dyn IngestionSink>, store: SharedStore) -> Self {
        Self {
            sink,
            store,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }

    /// Cap on records per sink batch call in [`Self::forward_grouped`]. Zero is treated as one.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size.max(1);
        self
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub async fn forward_one(&self, record: &CompletedRecord) -> Result<(), AggError> {
        if let Err(e) = self.sink.ingest_one(record).await {
            warn!(id = %record.id, sink = self.sink.name(), error = %e, "forward failed; record kept");
            return Err(e);
        }
        let kept = self
            .store
            .delete_forwarded(std::slice::from_ref(record))
            .await?;
        log_kept(&kept);
        info!(id = %record.id, partition_key = ?record.partition_key, "record forwarded");
        Ok(())
    }

    /// Forward records that all share one partition key, in one sink call.
    ///
    /// Mixed keys fail with `MixedPartition` before anything is sent. On sink
    /// failure nothing is deleted.
    pub async fn forward_batch(&self, records: &[CompletedRecord]) -> Result<(), AggError> {
        if records.is_empty() {
            return Ok(());
        }

        let keys: BTreeSet<Option<&str>> =
            records.iter().map(|r| r.partition_key.as_deref()).collect();
        if keys.len() > 1 {
            return Err(AggError::MixedPartition {
                keys: keys.into_iter().map(|k| k.map(str::to_string)).collect(),
            });
        }
        let partition_key = records[0].partition_key.as_deref();

        if let Err(e) = self.sink.ingest_batch(partition_key, records).await {
            warn!(
                partition_key = ?partition_key,
                count = records.len(),
                sink = self.sink.name(),
                error = %e,
                "batch forward failed; records kept"
            );
            return Err(e);
        }

        let kept = self.store.delete_forwarded(records).await?;
        log_kept(&kept);
        info!(partition_key = ?partition_key, count = records.len(), "batch forwarded");
        Ok(())
    }

    /// Group by partition key, chunk to `max_batch_size`, forward every chunk.
    ///
    /// A failing chunk does not stop the others.
    pub async fn forward_grouped(&self, records: Vec<CompletedRecord>) -> ForwardReport {
        let mut groups: BTreeMap<Option<String>, Vec<CompletedRecord>> = BTreeMap::new();
        for r in records {
            groups.entry(r.partition_key.clone()).or_default().push(r);
        }

        let mut report = ForwardReport::default();
        for (partition_key, group) in groups {
            for chunk in group.chunks(self.max_batch_size) {
                let ids: Vec<String> = chunk.iter().map(|r| r.id.clone()).collect();
                match self.forward_batch(chunk).await {
                    Ok(()) => report.forwarded.extend(ids),
                    Err(error) => report.failed.push(ForwardFailure {
                        partition_key: partition_key.clone(),
                        ids,
                        error,
                    }),
                }
            }
        }
        report
    }
}

fn log_kept(kept: &[String]) {
    for id in kept {
        info!(id = %id, "record changed while forwarding; kept for the retry sweep");
    }
}
