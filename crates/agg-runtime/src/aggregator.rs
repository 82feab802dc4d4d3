use std::sync::Arc;

use agg_ingest::{ForwardReport, IngestionForwarder, IngestionSink};
use agg_join::{BatchJoinEngine, BatchJoinOutcome, ConsistencyMode, PairJoinEngine};
use agg_schemas::{AggError, CompletedRecord, SideEntry};
use agg_store::SharedStore;
use tracing::info;

/// Result of one batch submission: what the join found and what was forwarded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub join: BatchJoinOutcome,
    pub forward: ForwardReport,
}

/// Join then forward. The outer glue between submissions and ingestion.
#[derive(Clone)]
pub struct Aggregator {
    store: SharedStore,
    pair: PairJoinEngine,
    batch: BatchJoinEngine,
    forwarder: IngestionForwarder,
}

impl Aggregator {
    pub fn new(
        store: SharedStore,
        sink: Arc<dyn IngestionSink>,
        mode: ConsistencyMode,
        max_batch_size: usize,
    ) -> Self {
        Self {
            pair: PairJoinEngine::with_mode(store.clone(), mode),
            batch: BatchJoinEngine::new(store.clone()),
            forwarder: IngestionForwarder::new(sink, store.clone())
                .with_max_batch_size(max_batch_size),
            store,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn pair(&self) -> &PairJoinEngine {
        &self.pair
    }

    pub fn batch(&self) -> &BatchJoinEngine {
        &self.batch
    }

    pub fn forwarder(&self) -> &IngestionForwarder {
        &self.forwarder
    }

    /// Submit one side; forward the record if this completed it.
    ///
    /// A forward failure is returned as the error, and the record stays in
    /// the store for the retry sweep.
    pub async fn aggregate_one(&self, entry: &SideEntry) -> Result<Option<CompletedRecord>, AggError> {
        let Some(record) = self.pair.submit(entry).await? else {
            return Ok(None);
        };
        self.forwarder.forward_one(&record).await?;
        Ok(Some(record))
    }

    /// Submit a batch; forward every complete record grouped by partition key.
    ///
    /// Records left complete by an earlier failed forward are picked up here
    /// too, since the join intersects the whole store.
    pub async fn aggregate_batch(&self, entries: &[SideEntry]) -> Result<BatchReport, AggError> {
        let join = self.batch.submit_batch(entries).await?;
        if join.completed.is_empty() {
            return Ok(BatchReport {
                join,
                forward: ForwardReport::default(),
            });
        }

        let forward = self.forwarder.forward_grouped(join.completed.clone()).await;
        info!(
            forwarded = forward.forwarded.len(),
            failed = forward.failed_ids(),
            "batch aggregated"
        );
        Ok(BatchReport { join, forward })
    }
}
