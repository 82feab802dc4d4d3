//! agg-db
//!
//! Postgres-backed [`agg_store::PartialRecordStore`].
//!
//! Connection + migrations follow the usual pattern: `AGG_DATABASE_URL` (or a
//! configured env var name) → `PgPool` → embedded `sqlx::migrate!`.

mod store;

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub use store::{BatchRows, PgStore};

pub const ENV_DB_URL: &str = "AGG_DATABASE_URL";

/// Connect to Postgres using the URL held in env var `env_name`.
///
/// The env var NAME is logged on failure, never its value.
pub async fn connect_from_env_var(env_name: &str, max_connections: u32) -> Result<PgPool> {
    let url = std::env::var(env_name).with_context(|| format!("missing env var {env_name}"))?;
    connect(&url, max_connections).await
}

/// Connect to Postgres using `AGG_DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    connect_from_env_var(ENV_DB_URL, 10).await
}

pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='partial_records'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_partial_records_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_partial_records_table: bool,
}
