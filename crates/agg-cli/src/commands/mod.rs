//! Command handler modules for the `agg` CLI.
//!
//! Shared helpers live here; command-specific logic lives in the submodules.

pub mod records;
pub mod submit;
pub mod sweep;

use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use tracing::{info, warn};

use agg_config::{AggConfig, StoreBackend, UnusedKeyPolicy};

/// Load layered config, run the unused-key guard, and return the typed view.
pub fn load_settings(paths: &[String], strict: bool) -> Result<AggConfig> {
    let loaded = agg_config::load_layered_yaml(paths)?;

    let policy = if strict {
        UnusedKeyPolicy::Fail
    } else {
        UnusedKeyPolicy::Warn
    };
    let report = agg_config::report_unused_keys(&loaded.config_json, policy)?;
    for ptr in &report.unused_leaf_pointers {
        warn!(key = %ptr, "config key is not read by the service");
    }

    let cfg = loaded.settings()?;
    info!(
        config_hash = %loaded.config_hash,
        backend = cfg.store.backend.as_str(),
        "config loaded"
    );
    Ok(cfg)
}

/// The memory store lives as long as one `agg` process. Halves submitted in
/// separate invocations never meet on it.
pub fn require_persistent_store(cfg: &AggConfig, what: &str) -> Result<()> {
    if cfg.store.backend != StoreBackend::Postgres {
        anyhow::bail!(
            "{what} needs store.backend=postgres (configured: {}); the memory store is discarded at exit",
            cfg.store.backend.as_str()
        );
    }
    Ok(())
}

/// Read a JSON file. A UTF-8 BOM is tolerated.
pub fn read_json_file(path: &str) -> Result<Value> {
    let bytes = fs::read(path).with_context(|| format!("read {path} failed"))?;
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&bytes);
    let raw = std::str::from_utf8(bytes).with_context(|| format!("{path} must be UTF-8 text"))?;
    serde_json::from_str(raw.trim()).with_context(|| format!("{path} must contain valid JSON"))
}
