//! WebSocket connection gateway
//!
//! Accepts client connections and routes JSON-RPC messages to the session
//! controller. Replies and notifications share one outbound queue per
//! connection.

mod handler;
mod server;

pub use handler::handle_connection;
pub use server::{SignalingServer, SignalingServerHandle};
