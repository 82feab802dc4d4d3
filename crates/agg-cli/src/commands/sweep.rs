use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use agg_config::{resolve_secrets, AggConfig};

use super::require_persistent_store;

pub async fn run(cfg: &AggConfig, once: bool) -> Result<()> {
    if !once {
        require_persistent_store(cfg, "a looping sweep")?;
    }
    let secrets = resolve_secrets(cfg)?;
    let agg = agg_runtime::build_aggregator(cfg, &secrets).await?;

    if once {
        let report = agg_runtime::sweep_once(&agg).await?;
        let json = serde_json::to_string_pretty(&report).context("serialize sweep report")?;
        println!("{json}");
        return Ok(());
    }

    if !cfg.sweep.enabled {
        anyhow::bail!("sweep.enabled=false in config; use --once for a single manual sweep");
    }

    let interval = Duration::from_millis(cfg.sweep.interval_ms);
    info!(interval_ms = cfg.sweep.interval_ms, "retry sweep running; Ctrl-C to stop");
    let handle = agg_runtime::spawn_retry_sweep(Arc::new(agg), interval);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    handle.abort();
    info!("retry sweep stopped");
    Ok(())
}
