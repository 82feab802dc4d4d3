use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Postgres => "postgres",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub backend: StoreBackend,
    /// NAME of the env var holding the Postgres URL. Never the URL itself.
    pub database_url_env: String,
    pub max_connections: u32,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url_env: "AGG_DATABASE_URL".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSection {
    pub base_url: String,
    /// Destination index for records without a partition key.
    pub default_index: String,
    pub timeout_ms: u64,
    pub max_batch_size: usize,
}

impl Default for SinkSection {
    fn default() -> Self {
        Self {
            base_url: "http://database-service:8000".to_string(),
            default_index: "embeddings".to_string(),
            timeout_ms: 5_000,
            max_batch_size: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinSection {
    /// `atomic` | `read_merge_write`. Parsed by the runtime.
    pub consistency: String,
}

impl Default for JoinSection {
    fn default() -> Self {
        Self {
            consistency: "atomic".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSection {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for SweepSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
        }
    }
}

/// Typed configuration. Every section and field is optional in YAML.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AggConfig {
    pub store: StoreSection,
    pub sink: SinkSection,
    pub join: JoinSection,
    pub sweep: SweepSection,
}

impl AggConfig {
    pub fn from_json(config_json: &Value) -> Result<Self> {
        let cfg: AggConfig = serde_json::from_value(config_json.clone())
            .context("config does not match the expected shape")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !is_env_var_name(&self.store.database_url_env) {
            bail!(
                "CONFIG_INVALID store.database_url_env: expected an env var NAME \
                 (A-Z, 0-9, _), got {:?}",
                self.store.database_url_env
            );
        }
        if self.store.max_connections == 0 {
            bail!("CONFIG_INVALID store.max_connections must be > 0");
        }
        if self.sink.base_url.trim().is_empty() {
            bail!("CONFIG_INVALID sink.base_url must not be empty");
        }
        if self.sink.default_index.trim().is_empty() {
            bail!("CONFIG_INVALID sink.default_index must not be empty");
        }
        if self.sink.timeout_ms == 0 {
            bail!("CONFIG_INVALID sink.timeout_ms must be > 0");
        }
        if self.sink.max_batch_size == 0 {
            bail!("CONFIG_INVALID sink.max_batch_size must be > 0");
        }
        if self.sweep.enabled && self.sweep.interval_ms == 0 {
            bail!("CONFIG_INVALID sweep.interval_ms must be > 0 when the sweep is enabled");
        }
        Ok(())
    }
}

fn is_env_var_name(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with(|c: char| c.is_ascii_digit())
        && s.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
