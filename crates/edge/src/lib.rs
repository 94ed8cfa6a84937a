//! Edge node: WebSocket termination and local fan-out.
//!
//! Owns every client socket that lands on this process: HTTP upgrade,
//! token binding, the connection registry, in-process room topics, and
//! delivery of broadcasts arriving from the job dispatcher over gRPC.

pub mod handlers;
pub mod http;
pub mod rpc;
pub mod server;
pub mod state;
pub mod topics;
pub mod ws;

pub use server::run_edge;
pub use state::EdgeState;
