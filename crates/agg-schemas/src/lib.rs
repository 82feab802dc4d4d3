//! agg-schemas
//!
//! Shared vocabulary for the embedding pair aggregation service.
//!
//! - [`Side`] names the two halves of a pair (text / image embedding).
//! - [`PartialRecord`] is the per-id state held by the store.
//! - [`CompletedRecord`] is the read-only view handed to ingestion.
//! - [`SideEntry`] is a validated submission; engines accept nothing else.
//! - [`AggError`] is the only error kind that crosses the core boundary.
//!
//! No IO lives here.

mod error;
mod record;
pub mod wire;

pub use error::{AggError, ValidationError};
pub use record::{
    CompletedRecord, JoinState, MergeOutcome, PartialRecord, Payload, Side, SideEntry,
};
