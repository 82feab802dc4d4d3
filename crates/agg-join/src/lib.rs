//! agg-join
//!
//! Completion detection for two-sided records.
//!
//! - [`PairJoinEngine`] merges one side at a time and reports the record the
//!   moment it becomes complete.
//! - [`BatchJoinEngine`] writes a whole batch in one round trip, intersects
//!   the readiness sets once, and bulk-fetches every complete record.
//!
//! Neither engine forwards anything: completed records are returned to the
//! caller, which hands them to `agg-ingest`. Both engines are stateless
//! coordinators over an injected [`agg_store::SharedStore`].

mod batch;
mod pair;

pub use batch::{BatchJoinEngine, BatchJoinOutcome};
pub use pair::{ConsistencyMode, PairJoinEngine};
