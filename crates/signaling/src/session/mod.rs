//! Session controller
//!
//! The controller owns the routing context and every registry. It is the only
//! place that mutates registry state: requests arrive from the connection
//! gateway, engine lifecycle events arrive from the engine subscription, and
//! both end up in the same explicit cascade teardown.

mod controller;
mod events;
#[allow(clippy::module_inception)]
mod session;

pub use controller::{ControllerStats, SessionController};
pub use events::ServerEvent;
pub use session::{ClientSession, SessionId, SessionManager, SessionState};
