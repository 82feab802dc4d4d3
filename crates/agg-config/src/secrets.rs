//! Runtime secret resolution.
//!
//! Config stores env var NAMES only. Callers resolve once at startup and pass
//! [`ResolvedSecrets`] into constructors. Errors name the env var, never its
//! value, and `Debug` output is redacted.

use anyhow::{bail, Result};

use crate::{AggConfig, StoreBackend};

#[derive(Clone)]
pub struct ResolvedSecrets {
    /// Postgres URL. Always `Some` when `store.backend = postgres`.
    pub database_url: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("database_url", &self.database_url.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

/// The memory backend needs no secrets; the postgres backend requires the
/// env var named by `store.database_url_env` to be set and non-empty.
pub fn resolve_secrets(cfg: &AggConfig) -> Result<ResolvedSecrets> {
    resolve_secrets_with(cfg, |name| std::env::var(name).ok())
}

fn resolve_secrets_with(
    cfg: &AggConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedSecrets> {
    let var = cfg.store.database_url_env.as_str();
    let database_url = lookup(var).filter(|v| !v.trim().is_empty());

    if cfg.store.backend == StoreBackend::Postgres && database_url.is_none() {
        bail!(
            "SECRETS_MISSING backend=postgres: required env var '{}' \
             (database url) is not set or empty",
            var
        );
    }

    Ok(ResolvedSecrets { database_url })
}
