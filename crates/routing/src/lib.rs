//! Redis-backed routing store.
//!
//! Owns every piece of cross-process state: session tokens, the
//! connection/room registry the job dispatcher routes against, the dedup /
//! cooldown / dispatch-lock keys, the per-room message stream cache, and
//! the durable-write queue. No other crate talks to Redis directly.

pub mod error;
pub mod keys;
mod store;

pub use error::{Error, Result};
pub use store::{RoutingStore, StreamEntry};
