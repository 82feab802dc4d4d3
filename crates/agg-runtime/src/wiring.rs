//! Config → live components.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tracing::info;

use agg_config::{AggConfig, ResolvedSecrets, StoreBackend};
use agg_db::PgStore;
use agg_ingest::{HttpIngestionSink, IngestionSink};
use agg_join::ConsistencyMode;
use agg_store::{MemoryStore, PartialRecordStore, SharedStore};

use crate::Aggregator;

pub fn consistency_mode(cfg: &AggConfig) -> Result<ConsistencyMode> {
    cfg.join
        .consistency
        .parse::<ConsistencyMode>()
        .map_err(|e| anyhow!("CONFIG_INVALID join.consistency: {e}"))
}

/// Open the configured store. Postgres must already be migrated.
pub async fn build_store(cfg: &AggConfig, secrets: &ResolvedSecrets) -> Result<SharedStore> {
    match cfg.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Postgres => {
            let url = secrets.database_url.as_deref().ok_or_else(|| {
                anyhow!(
                    "SECRETS_MISSING backend=postgres: env var '{}' not resolved",
                    cfg.store.database_url_env
                )
            })?;
            let pool = agg_db::connect(url, cfg.store.max_connections).await?;
            let st = agg_db::status(&pool).await?;
            if !st.has_partial_records_table {
                bail!("postgres schema missing; run `agg db migrate` first");
            }
            Ok(Arc::new(PgStore::new(pool)))
        }
    }
}

pub fn build_sink(cfg: &AggConfig) -> Result<Arc<dyn IngestionSink>> {
    let sink = HttpIngestionSink::new(
        &cfg.sink.base_url,
        &cfg.sink.default_index,
        Duration::from_millis(cfg.sink.timeout_ms),
    )
    .context("failed to build ingestion sink")?;
    Ok(Arc::new(sink))
}

/// Store from config, HTTP sink from config.
pub async fn build_aggregator(cfg: &AggConfig, secrets: &ResolvedSecrets) -> Result<Aggregator> {
    let store = build_store(cfg, secrets).await?;
    let sink = build_sink(cfg)?;
    aggregator_with(cfg, store, sink)
}

/// Config-driven aggregator over injected store and sink.
pub fn aggregator_with(
    cfg: &AggConfig,
    store: SharedStore,
    sink: Arc<dyn IngestionSink>,
) -> Result<Aggregator> {
    let mode = consistency_mode(cfg)?;
    info!(
        backend = store.backend_name(),
        sink = sink.name(),
        consistency = %mode,
        max_batch_size = cfg.sink.max_batch_size,
        "aggregator ready"
    );
    Ok(Aggregator::new(store, sink, mode, cfg.sink.max_batch_size))
}
