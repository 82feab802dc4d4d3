use anyhow::{Context, Result};

use agg_config::{resolve_secrets, AggConfig};
use agg_store::{PartialRecordStore, SharedStore};

use super::require_persistent_store;

async fn persistent_store(cfg: &AggConfig) -> Result<SharedStore> {
    require_persistent_store(cfg, "records commands")?;
    let secrets = resolve_secrets(cfg)?;
    agg_runtime::build_store(cfg, &secrets).await
}

pub async fn show(cfg: &AggConfig, id: &str) -> Result<()> {
    let store = persistent_store(cfg).await?;
    match store.get_record(id).await? {
        Some(rec) => {
            let json = serde_json::to_string_pretty(&rec).context("serialize record")?;
            println!("{json}");
            println!("state={:?}", rec.state());
        }
        None => println!("found=false id={id}"),
    }
    Ok(())
}

pub async fn purge(cfg: &AggConfig, id: &str) -> Result<()> {
    let store = persistent_store(cfg).await?;
    let existed = store.get_record(id).await?.is_some();
    store.delete_records(&[id.to_string()]).await?;
    println!("purged={existed} id={id}");
    Ok(())
}
