//! Job: partition-parallel consumers routing log records to edges.
//!
//! Each worker owns one consumer in the shared group and runs a serial
//! `poll → pipeline → commit` loop. The pipeline turns a record into zero
//! or one cross-edge fan-out: dedup, cooldown, per-room lock, routing
//! resolution, then one `BroadcastRoom` call per edge holding subscribers.

mod consumer;
mod fanout;
mod pipeline;

pub use consumer::run_job;
pub use fanout::CometPool;
pub use pipeline::{Outcome, Pipeline};
