//! agg-runtime
//!
//! Wires the store, the join engines and the ingestion forwarder into one
//! [`Aggregator`], and runs the periodic retry sweep.

mod aggregator;
mod sweep;
mod wiring;

pub use aggregator::{Aggregator, BatchReport};
pub use sweep::{spawn_retry_sweep, sweep_once, SweepReport};
pub use wiring::{aggregator_with, build_aggregator, build_sink, build_store, consistency_mode};
