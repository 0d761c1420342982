//! WebSocket relay gateway.
//!
//! Hosts the chat websocket, one session endpoint per connection, and the
//! health (and optionally metrics) HTTP endpoints.

pub mod connection;
pub mod server;
pub mod state;

#[cfg(feature = "metrics")]
pub mod metrics;

pub use server::{router, start_gateway};
pub use state::GatewayState;
