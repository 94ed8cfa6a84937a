//! Durable storage and the tiered message path.
//!
//! Writes land in the routing store's per-room stream first and are queued
//! for bulk insertion into MySQL; reads serve the recent window from the
//! stream and fall back to MySQL for the shortfall. User accounts and
//! session issuance live here too, next to the tables they own.

pub mod auth;
pub mod error;
pub mod messages;
pub mod persister;
pub mod tiered;
pub mod users;

pub use auth::AuthService;
pub use error::{Error, Result};
pub use messages::{MessageRepo, PendingRecord};
pub use persister::{PersisterConfig, run_persister};
pub use tiered::{HistoryEntry, HistoryPage, NewMessage, StoredMessage, TieredStore};
pub use users::{User, UserRepo};
