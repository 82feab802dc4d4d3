use anyhow::{Context, Result};
use tracing::warn;

use agg_config::{resolve_secrets, AggConfig, StoreBackend};
use agg_schemas::wire::Submission;
use agg_schemas::AggError;

use super::{read_json_file, require_persistent_store};

pub async fn run(cfg: &AggConfig, file: &str) -> Result<()> {
    let body = read_json_file(file)?;
    let submission: Submission = serde_json::from_value(body)
        .context("body is neither an embedding object nor {\"embeddings\": [...]}")?;

    // Validate before touching the store.
    let (entries, single) = match submission {
        Submission::Single(one) => (vec![one.validate().map_err(AggError::from)?], true),
        Submission::Batch(batch) => (batch.validate().map_err(AggError::from)?, false),
    };

    if single {
        require_persistent_store(cfg, "a single-side submit")?;
    } else if cfg.store.backend == StoreBackend::Memory {
        warn!("memory store: halves without their pair in this file are discarded at exit");
    }

    let secrets = resolve_secrets(cfg)?;
    let agg = agg_runtime::build_aggregator(cfg, &secrets).await?;

    if single {
        let entry = &entries[0];
        match agg.aggregate_one(entry).await? {
            Some(done) => println!("completed=true forwarded=true id={}", done.id),
            None => println!("completed=false id={}", entry.id()),
        }
        return Ok(());
    }

    let report = agg.aggregate_batch(&entries).await?;
    println!("submitted={}", entries.len());
    println!("completed={}", report.join.completed.len());
    println!("forwarded={}", report.forward.forwarded.len());
    println!("failed={}", report.forward.failed_ids());
    println!("conflicted={}", report.join.conflicted.len());
    for f in &report.forward.failed {
        eprintln!(
            "forward_failed partition_key={} ids={:?} error={}",
            f.partition_key.as_deref().unwrap_or("<default>"),
            f.ids,
            f.error
        );
    }
    if !report.forward.is_clean() {
        anyhow::bail!(
            "{} completed record(s) were not forwarded; they remain stored for the retry sweep",
            report.forward.failed_ids()
        );
    }
    Ok(())
}
