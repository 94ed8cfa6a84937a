//! Logic: the stateless HTTP write ingress.
//!
//! `POST /logic/send` validates a send request, assigns message ids
//! through the tiered writer, and emits one fan-out record per message
//! onto the partitioned log. Delivery is entirely the job dispatcher's
//! business from there.

mod http;
mod server;

pub use http::{LogicState, build_router};
pub use server::run_logic;
