//! Client sessions
//!
//! One [`ClientSession`] exists per connected client, from connect to
//! disconnect. Each session carries the sink its notifications are pushed to.

use super::events::ServerEvent;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Session identifier (the connection id)
pub type SessionId = String;

/// Negotiation progress of a session
///
/// States only move forward; `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Connection accepted
    Connected,
    /// Router capabilities delivered to the client
    CapabilitiesSent,
    /// At least one transport created
    TransportsNegotiating,
    /// Producing and/or consuming media
    Streaming,
    /// Connection gone, entities torn down
    Disconnected,
}

/// Per-client state held by the controller
pub struct ClientSession {
    id: SessionId,
    state: SessionState,
    connected_at: Instant,
    sink: mpsc::Sender<ServerEvent>,
}

impl ClientSession {
    fn new(id: SessionId, sink: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id,
            state: SessionState::Connected,
            connected_at: Instant::now(),
            sink,
        }
    }

    /// Get the session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Time since connect
    pub fn age(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }
}

/// Open sessions keyed by id
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, ClientSession>>,

    /// Maximum number of concurrent sessions (0 = unlimited)
    max_sessions: usize,
}

impl SessionManager {
    /// Create a new session manager
    ///
    /// # Arguments
    ///
    /// * `max_sessions` - Maximum number of concurrent sessions (0 = unlimited)
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Open a session
    pub fn open(&self, session_id: SessionId, sink: mpsc::Sender<ServerEvent>) -> Result<()> {
        let mut sessions = self.sessions.write();

        if sessions.contains_key(&session_id) {
            return Err(Error::InvalidState(format!(
                "Session {} already exists",
                session_id
            )));
        }

        if self.max_sessions > 0 && sessions.len() >= self.max_sessions {
            return Err(Error::InvalidState(format!(
                "Maximum number of sessions reached ({})",
                self.max_sessions
            )));
        }

        info!("Session opened: {} (total: {})", session_id, sessions.len() + 1);
        sessions.insert(session_id.clone(), ClientSession::new(session_id, sink));

        Ok(())
    }

    /// Remove a session, returning it in state `Disconnected`
    pub fn close(&self, session_id: &str) -> Option<ClientSession> {
        let mut session = self.sessions.write().remove(session_id)?;
        debug!(
            "Session {} state transition: {:?} -> Disconnected",
            session_id, session.state
        );
        session.state = SessionState::Disconnected;
        Some(session)
    }

    /// Fail with `UnknownSession` unless the session is open
    pub fn ensure_open(&self, session_id: &str) -> Result<()> {
        if self.is_open(session_id) {
            Ok(())
        } else {
            Err(Error::UnknownSession(session_id.to_string()))
        }
    }

    /// Check if a session is open
    pub fn is_open(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    /// Current state of a session
    pub fn state(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.read().get(session_id).map(|s| s.state)
    }

    /// Move a session forward to `target`; earlier targets are ignored
    pub fn advance(&self, session_id: &str, target: SessionState) {
        if target == SessionState::Disconnected {
            return;
        }

        if let Some(session) = self.sessions.write().get_mut(session_id) {
            if target > session.state {
                debug!(
                    "Session {} state transition: {:?} -> {:?}",
                    session_id, session.state, target
                );
                session.state = target;
            }
        }
    }

    /// Push a notification to a session without waiting
    ///
    /// Returns false if the session is gone or its sink is full or closed.
    pub fn notify(&self, session_id: &str, event: ServerEvent) -> bool {
        let sink = match self.sessions.read().get(session_id) {
            Some(session) => session.sink.clone(),
            None => return false,
        };

        match sink.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropped notification for session {}: {}", session_id, e);
                false
            }
        }
    }

    /// Ids of all open sessions
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Number of open sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Check if no session is open
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MediaKind;

    fn sink() -> (mpsc::Sender<ServerEvent>, mpsc::Receiver<ServerEvent>) {
        mpsc::channel(8)
    }

    #[test]
    fn test_open_and_close() {
        let manager = SessionManager::new(0);
        let (tx, _rx) = sink();
        manager.open("s1".to_string(), tx).unwrap();

        assert!(manager.is_open("s1"));
        assert_eq!(manager.state("s1"), Some(SessionState::Connected));

        let closed = manager.close("s1").unwrap();
        assert_eq!(closed.state(), SessionState::Disconnected);
        assert!(manager.ensure_open("s1").is_err());
        assert!(manager.close("s1").is_none());
    }

    #[test]
    fn test_duplicate_and_limit() {
        let manager = SessionManager::new(1);
        let (tx, _rx) = sink();
        manager.open("s1".to_string(), tx.clone()).unwrap();

        assert!(manager.open("s1".to_string(), tx.clone()).is_err());
        assert!(manager.open("s2".to_string(), tx).is_err());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_state_only_moves_forward() {
        let manager = SessionManager::new(0);
        let (tx, _rx) = sink();
        manager.open("s1".to_string(), tx).unwrap();

        manager.advance("s1", SessionState::Streaming);
        manager.advance("s1", SessionState::CapabilitiesSent);
        manager.advance("s1", SessionState::Disconnected);
        assert_eq!(manager.state("s1"), Some(SessionState::Streaming));
    }

    #[test]
    fn test_notify() {
        let manager = SessionManager::new(0);
        let (tx, mut rx) = sink();
        manager.open("s1".to_string(), tx).unwrap();

        let event = ServerEvent::NewProducer {
            producer_id: "p1".to_string(),
            kind: MediaKind::Audio,
        };
        assert!(manager.notify("s1", event.clone()));
        assert!(!manager.notify("missing", event.clone()));
        assert_eq!(rx.try_recv().unwrap(), event);

        drop(rx);
        assert!(!manager.notify("s1", event));
    }
}
