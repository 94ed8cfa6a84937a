//! Shared error-handling glue and small utilities used across all parley
//! crates.

pub mod error;
pub mod time;

pub use error::{Context, MessageError};
pub use time::now_seconds;
