//! Client-facing WebSocket server.
//!
//! [`BroadcastHub`] owns the per-connection subscription sets and routes
//! requests to the [`SessionRegistry`](crate::session::SessionRegistry);
//! [`handler`] adapts axum WebSocket connections onto the hub.

mod config;
pub mod handler;
mod hub;
mod protocol;

pub use config::ServerConfig;
pub use handler::{router, serve};
pub use hub::{BroadcastHub, ConnectionHandle};
pub use protocol::{ClientMessage, ProtocolError, ServerMessage, decode_client_message};
