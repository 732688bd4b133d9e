//! WebRTC signaling controller for a selective forwarding unit
//!
//! This crate negotiates media sessions between browser clients and a media
//! routing engine. It never touches media packets: clients exchange
//! capabilities, transport parameters and RTP parameters with the controller
//! over JSON-RPC 2.0, and the controller drives the engine.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  Browser clients                                       │
//! │  ↓ (JSON-RPC 2.0 over WebSocket)                       │
//! │  SignalingServer (one session per connection)          │
//! │  ↓                                                     │
//! │  SessionController                                     │
//! │  ├─ SessionManager (sessions + notification sinks)     │
//! │  ├─ TransportRegistry (send/receive per session)       │
//! │  └─ MediaRegistry (producers, consumers, cascades)     │
//! │     ↓                                                  │
//! │  MediaEngine / EngineRouter (mediasoup worker)         │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sfu_signaling::{MediasoupEngine, ServerConfig, SessionController, SignalingServer};
//! use std::sync::Arc;
//!
//! # async fn example() -> sfu_signaling::Result<()> {
//! let config = ServerConfig::default();
//! config.validate()?;
//!
//! let engine = Arc::new(MediasoupEngine::new(&config.worker).await?);
//! let controller = Arc::new(SessionController::new(engine, &config));
//! controller.start().await?;
//!
//! let server = SignalingServer::new(config.socket_addr()?, Arc::clone(&controller));
//! let handle = server.start().await?;
//! println!("listening on {}", handle.local_addr());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod session;
pub mod signaling;

// Re-exports for public API
pub use config::{ListenIp, RouterConfig, ServerConfig, WebRtcTransportConfig, WorkerConfig};
pub use engine::{EngineEvent, EngineRouter, MediaEngine, MediasoupEngine};
pub use error::{Error, Result};
pub use registry::{CloseReason, ConsumerState, ProducerState, TransportRole, TransportState};
pub use session::{ControllerStats, ServerEvent, SessionController, SessionId, SessionState};
pub use signaling::{SignalingServer, SignalingServerHandle};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
