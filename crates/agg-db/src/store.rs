//! `PgStore`: partial records in three tables (see `migrations/`).
//!
//! Design notes:
//! - Field-level merge: each side is its own `partial_sides` row, written with
//!   `on conflict (id, side) do update`. Writing one side cannot clobber the other.
//! - Partition key: `coalesce(old, new)` keeps the first key; a differing key
//!   only raises `partition_conflict`.
//! - Batches are written with `unnest` arrays inside one transaction. Rows are
//!   de-duplicated client-side first because `on conflict do update` refuses to
//!   touch the same row twice in one statement.
//! - `merge_side` takes `pg_advisory_xact_lock(hashtext(id))` so concurrent
//!   merges of one id serialize; different ids only collide on hash clashes.
//! - `delete_forwarded` locks the `partial_records` rows `for update` before
//!   comparing. Every write path updates that row first, so no write can
//!   land between the comparison and the delete.

use std::collections::{BTreeMap, BTreeSet};

use agg_schemas::{AggError, CompletedRecord, MergeOutcome, PartialRecord, Side, SideEntry};
use agg_store::PartialRecordStore;
use serde_json::Value;
use sqlx::{PgConnection, PgPool, Row};
use tracing::debug;

fn store_err(ctx: &'static str) -> impl FnOnce(sqlx::Error) -> AggError {
    move |e| AggError::StoreUnavailable(format!("{ctx}: {e}"))
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Batch planning (pure)
// ---------------------------------------------------------------------------

/// Column arrays for one `batch_upsert`, already de-duplicated.
///
/// Per id: the first non-null partition key is kept; any later differing key
/// in the same batch sets the conflict flag. Per (id, side): last write wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchRows {
    pub record_ids: Vec<String>,
    pub record_keys: Vec<Option<String>>,
    pub record_conflicts: Vec<bool>,
    pub side_ids: Vec<String>,
    pub side_names: Vec<String>,
    pub side_payloads: Vec<Value>,
}

impl BatchRows {
    pub fn plan(entries: &[SideEntry]) -> Self {
        let mut records: BTreeMap<&str, (Option<&str>, bool)> = BTreeMap::new();
        let mut sides: BTreeMap<(&str, Side), &[f64]> = BTreeMap::new();

        for e in entries {
            let slot = records.entry(e.id()).or_insert((None, false));
            match (slot.0, e.partition_key()) {
                (None, Some(k)) => slot.0 = Some(k),
                (Some(cur), Some(k)) if cur != k => slot.1 = true,
                _ => {}
            }
            sides.insert((e.id(), e.side()), e.payload());
        }

        let mut rows = BatchRows::default();
        for (id, (key, conflict)) in records {
            rows.record_ids.push(id.to_string());
            rows.record_keys.push(key.map(str::to_string));
            rows.record_conflicts.push(conflict);
        }
        for ((id, side), payload) in sides {
            rows.side_ids.push(id.to_string());
            rows.side_names.push(side.as_str().to_string());
            rows.side_payloads.push(Value::from(payload.to_vec()));
        }
        rows
    }
}

// ---------------------------------------------------------------------------
// SQL helpers (run on a connection or inside a transaction)
// ---------------------------------------------------------------------------

async fn write_rows(conn: &mut PgConnection, rows: &BatchRows) -> Result<(), AggError> {
    sqlx::query(
        r#"
        insert into partial_records (id, partition_key, partition_conflict)
        select * from unnest($1::text[], $2::text[], $3::bool[])
        on conflict (id) do update set
          partition_conflict = partial_records.partition_conflict
            or excluded.partition_conflict
            or (partial_records.partition_key is not null
                and excluded.partition_key is not null
                and partial_records.partition_key <> excluded.partition_key),
          partition_key = coalesce(partial_records.partition_key, excluded.partition_key),
          updated_at_utc = now()
        "#,
    )
    .bind(&rows.record_ids)
    .bind(&rows.record_keys)
    .bind(&rows.record_conflicts)
    .execute(&mut *conn)
    .await
    .map_err(store_err("upsert partial_records failed"))?;

    sqlx::query(
        r#"
        insert into partial_sides (id, side, payload)
        select * from unnest($1::text[], $2::text[], $3::jsonb[])
        on conflict (id, side) do update set
          payload = excluded.payload
        "#,
    )
    .bind(&rows.side_ids)
    .bind(&rows.side_names)
    .bind(&rows.side_payloads)
    .execute(&mut *conn)
    .await
    .map_err(store_err("upsert partial_sides failed"))?;

    Ok(())
}

async fn write_ready(
    conn: &mut PgConnection,
    ids: &[String],
    sides: &[String],
) -> Result<(), AggError> {
    sqlx::query(
        r#"
        insert into ready_sides (id, side)
        select * from unnest($1::text[], $2::text[])
        on conflict do nothing
        "#,
    )
    .bind(ids)
    .bind(sides)
    .execute(&mut *conn)
    .await
    .map_err(store_err("insert ready_sides failed"))?;
    Ok(())
}

async fn fetch_records(
    conn: &mut PgConnection,
    ids: &[String],
) -> Result<Vec<PartialRecord>, AggError> {
    let rows = sqlx::query(
        r#"
        select r.id, r.partition_key, r.partition_conflict, s.side, s.payload
        from partial_records r
        left join partial_sides s on s.id = r.id
        where r.id = any($1)
        order by r.id asc, s.side asc
        "#,
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(store_err("fetch partial records failed"))?;

    let mut out: BTreeMap<String, PartialRecord> = BTreeMap::new();
    for row in rows {
        let id: String = row.try_get("id").map_err(store_err("decode id"))?;
        let rec = out.entry(id.clone()).or_insert_with(|| PartialRecord::empty(&id));
        rec.partition_key = row
            .try_get("partition_key")
            .map_err(store_err("decode partition_key"))?;
        rec.partition_conflict = row
            .try_get("partition_conflict")
            .map_err(store_err("decode partition_conflict"))?;

        let side: Option<String> = row.try_get("side").map_err(store_err("decode side"))?;
        let payload: Option<Value> = row
            .try_get("payload")
            .map_err(store_err("decode payload"))?;
        if let (Some(side), Some(payload)) = (side, payload) {
            let side = Side::parse(&side)
                .map_err(|e| AggError::store(format!("record '{id}' has bad side: {e}")))?;
            let payload: Vec<f64> = serde_json::from_value(payload)
                .map_err(|e| AggError::store(format!("record '{id}' has bad payload: {e}")))?;
            rec.sides.insert(side, payload);
        }
    }
    Ok(out.into_values().collect())
}

async fn delete_ids(conn: &mut PgConnection, ids: &[String]) -> Result<(), AggError> {
    for (table, sql) in [
        ("partial_sides", "delete from partial_sides where id = any($1)"),
        ("ready_sides", "delete from ready_sides where id = any($1)"),
        ("partial_records", "delete from partial_records where id = any($1)"),
    ] {
        sqlx::query(sql)
            .bind(ids)
            .execute(&mut *conn)
            .await
            .map_err(|e| AggError::store(format!("delete from {table} failed: {e}")))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// PartialRecordStore
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl PartialRecordStore for PgStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn upsert_side(&self, entry: &SideEntry) -> Result<(), AggError> {
        let rows = BatchRows::plan(std::slice::from_ref(entry));
        let mut tx = self.pool.begin().await.map_err(store_err("begin failed"))?;
        write_rows(&mut tx, &rows).await?;
        tx.commit().await.map_err(store_err("commit failed"))?;
        Ok(())
    }

    async fn get_record(&self, id: &str) -> Result<Option<PartialRecord>, AggError> {
        let mut conn = self.pool.acquire().await.map_err(store_err("acquire failed"))?;
        let mut recs = fetch_records(&mut conn, &[id.to_string()]).await?;
        Ok(recs.pop())
    }

    async fn get_records(&self, ids: &[String]) -> Result<Vec<PartialRecord>, AggError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.acquire().await.map_err(store_err("acquire failed"))?;
        fetch_records(&mut conn, ids).await
    }

    async fn mark_side_ready(&self, id: &str, side: Side) -> Result<(), AggError> {
        let mut conn = self.pool.acquire().await.map_err(store_err("acquire failed"))?;
        write_ready(&mut conn, &[id.to_string()], &[side.as_str().to_string()]).await
    }

    async fn intersect_ready_sides(&self) -> Result<BTreeSet<String>, AggError> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            select id from ready_sides where side = 'EMBEDDINGS_TEXT'
            intersect
            select id from ready_sides where side = 'EMBEDDINGS_IMAGE'
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("intersect ready_sides failed"))?;
        Ok(ids.into_iter().collect())
    }

    async fn delete_records(&self, ids: &[String]) -> Result<(), AggError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(store_err("begin failed"))?;
        delete_ids(&mut tx, ids).await?;
        tx.commit().await.map_err(store_err("commit failed"))?;
        debug!(count = ids.len(), "postgres store delete");
        Ok(())
    }

    async fn delete_forwarded(&self, records: &[CompletedRecord]) -> Result<Vec<String>, AggError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let mut tx = self.pool.begin().await.map_err(store_err("begin failed"))?;

        sqlx::query("select id from partial_records where id = any($1) order by id for update")
            .bind(&ids)
            .fetch_all(&mut *tx)
            .await
            .map_err(store_err("lock partial_records failed"))?;

        let current: BTreeMap<String, PartialRecord> = fetch_records(&mut tx, &ids)
            .await?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();

        let mut doomed = Vec::new();
        let mut kept = Vec::new();
        for r in records {
            match current.get(&r.id) {
                Some(stored) if !stored.is_unchanged_since(r) => kept.push(r.id.clone()),
                _ => doomed.push(r.id.clone()),
            }
        }

        if !doomed.is_empty() {
            delete_ids(&mut tx, &doomed).await?;
        }
        tx.commit().await.map_err(store_err("commit failed"))?;
        debug!(count = doomed.len(), kept = kept.len(), "postgres store delete forwarded");
        Ok(kept)
    }

    async fn batch_upsert(&self, entries: &[SideEntry]) -> Result<(), AggError> {
        if entries.is_empty() {
            return Ok(());
        }
        let rows = BatchRows::plan(entries);
        let mut tx = self.pool.begin().await.map_err(store_err("begin failed"))?;
        write_rows(&mut tx, &rows).await?;
        write_ready(&mut tx, &rows.side_ids, &rows.side_names).await?;
        tx.commit().await.map_err(store_err("commit failed"))?;
        Ok(())
    }

    async fn merge_side(&self, entry: &SideEntry) -> Result<MergeOutcome, AggError> {
        let rows = BatchRows::plan(std::slice::from_ref(entry));
        let ids = vec![entry.id().to_string()];

        let mut tx = self.pool.begin().await.map_err(store_err("begin failed"))?;

        sqlx::query("select pg_advisory_xact_lock(hashtext($1))")
            .bind(entry.id())
            .execute(&mut *tx)
            .await
            .map_err(store_err("advisory lock failed"))?;

        let (sides_before,): (i64,) =
            sqlx::query_as("select count(*)::bigint from partial_sides where id = $1")
                .bind(entry.id())
                .fetch_one(&mut *tx)
                .await
                .map_err(store_err("count sides failed"))?;

        write_rows(&mut tx, &rows).await?;
        write_ready(&mut tx, &rows.side_ids, &rows.side_names).await?;
        let record = fetch_records(&mut tx, &ids)
            .await?
            .pop()
            .ok_or_else(|| AggError::store(format!("record '{}' vanished mid-merge", entry.id())))?;

        tx.commit().await.map_err(store_err("commit failed"))?;

        Ok(MergeOutcome {
            record,
            was_complete: sides_before >= Side::ALL.len() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, side: Side, payload: &[f64], key: Option<&str>) -> SideEntry {
        SideEntry::new(id, side, payload.to_vec(), key.map(str::to_string)).unwrap()
    }

    #[test]
    fn plan_dedupes_sides_last_write_wins() {
        let rows = BatchRows::plan(&[
            entry("y", Side::Text, &[1.0], None),
            entry("y", Side::Image, &[2.0], None),
            entry("y", Side::Text, &[3.0], None),
        ]);
        assert_eq!(rows.record_ids, vec!["y".to_string()]);
        assert_eq!(rows.side_ids, vec!["y".to_string(), "y".to_string()]);
        assert_eq!(
            rows.side_names,
            vec!["EMBEDDINGS_TEXT".to_string(), "EMBEDDINGS_IMAGE".to_string()]
        );
        assert_eq!(rows.side_payloads[0], serde_json::json!([3.0]));
        assert_eq!(rows.side_payloads[1], serde_json::json!([2.0]));
    }

    #[test]
    fn plan_keeps_first_key_and_flags_in_batch_conflict() {
        let rows = BatchRows::plan(&[
            entry("a", Side::Text, &[1.0], None),
            entry("a", Side::Image, &[1.0], Some("docs")),
            entry("b", Side::Text, &[1.0], Some("docs")),
            entry("b", Side::Image, &[1.0], Some("media")),
        ]);
        assert_eq!(rows.record_ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            rows.record_keys,
            vec![Some("docs".to_string()), Some("docs".to_string())]
        );
        assert_eq!(rows.record_conflicts, vec![false, true]);
    }

    #[test]
    fn plan_of_nothing_is_empty() {
        assert_eq!(BatchRows::plan(&[]), BatchRows::default());
    }
}
