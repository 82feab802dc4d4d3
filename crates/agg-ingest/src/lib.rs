//! agg-ingest
//!
//! Hand-off of completed records to the downstream ingestion service.
//!
//! [`IngestionSink`] is the seam; [`HttpIngestionSink`] is the production
//! implementation. [`IngestionForwarder`] owns the forward-then-delete rule and
//! the one-partition-key-per-batch rule.

mod forward;
mod sink;

pub use forward::{ForwardFailure, ForwardReport, IngestionForwarder, DEFAULT_MAX_BATCH_SIZE};
pub use sink::{HttpIngestionSink, IngestionSink};
