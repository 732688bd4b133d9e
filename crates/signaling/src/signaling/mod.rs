//! Signaling protocol and connection gateway
//!
//! Clients speak JSON-RPC 2.0 over WebSocket text frames. Each connection is
//! one session of the [`SessionController`](crate::SessionController).

pub mod protocol;
pub mod websocket;

pub use protocol::{
    error_codes, methods, ErrorObject, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse,
};
pub use websocket::{SignalingServer, SignalingServerHandle};
