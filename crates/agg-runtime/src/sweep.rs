//! Retry sweep.
//!
//! A record stays in the store when its forward fails, or when a
//! `read_merge_write` race hid its completion. The sweep re-runs the
//! intersection over the whole store and forwards whatever is complete.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use agg_schemas::AggError;

use crate::Aggregator;

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub sweep_id: Uuid,
    pub started_at_utc: DateTime<Utc>,
    /// Complete records found (conflicted ones excluded).
    pub candidates: usize,
    pub forwarded: usize,
    pub failed: usize,
    /// Complete records held back by a partition key conflict.
    pub conflicted: Vec<String>,
}

/// One sweep: intersect → bulk fetch → forward grouped.
pub async fn sweep_once(aggregator: &Aggregator) -> Result<SweepReport, AggError> {
    let sweep_id = Uuid::new_v4();
    let started_at_utc = Utc::now();

    let outcome = aggregator.batch().collect_ready().await?;
    let candidates = outcome.completed.len();
    let forward = aggregator.forwarder().forward_grouped(outcome.completed).await;

    let report = SweepReport {
        sweep_id,
        started_at_utc,
        candidates,
        forwarded: forward.forwarded.len(),
        failed: forward.failed_ids(),
        conflicted: outcome.conflicted,
    };

    if report.candidates > 0 || !report.conflicted.is_empty() {
        info!(
            sweep_id = %report.sweep_id,
            candidates = report.candidates,
            forwarded = report.forwarded,
            failed = report.failed,
            conflicted = report.conflicted.len(),
            "retry sweep"
        );
    }
    for f in &forward.failed {
        warn!(
            sweep_id = %report.sweep_id,
            partition_key = ?f.partition_key,
            count = f.ids.len(),
            error = %f.error,
            "sweep forward failed; will retry next tick"
        );
    }
    Ok(report)
}

/// Run [`sweep_once`] every `interval` until the returned handle is aborted.
///
/// A failing tick is logged and the loop continues.
pub fn spawn_retry_sweep(aggregator: Arc<Aggregator>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_once(&aggregator).await {
                error!(kind = e.kind(), error = %e, "retry sweep tick failed");
            }
        }
    })
}
