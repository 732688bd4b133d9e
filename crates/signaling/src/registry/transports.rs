//! Transport registry
//!
//! Tracks the send and receive transports of every client session. At most
//! one transport exists per `(session, role)` pair: a second registration is
//! rejected, so replacing a transport always goes through an explicit close.

use crate::session::SessionId;
use crate::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;
use tracing::{debug, info};

/// Transport identifier (assigned by the media engine)
pub type TransportId = String;

/// Direction of a transport, seen from the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportRole {
    /// Client sends media (produces)
    Send,
    /// Client receives media (consumes)
    Receive,
}

impl TransportRole {
    /// Role requested by the `sender` flag of `request:webRtcTransport`
    pub fn from_sender(sender: bool) -> Self {
        if sender {
            TransportRole::Send
        } else {
            TransportRole::Receive
        }
    }
}

impl fmt::Display for TransportRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportRole::Send => f.write_str("send"),
            TransportRole::Receive => f.write_str("receive"),
        }
    }
}

/// Connection state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    /// Created, no DTLS parameters applied
    New,
    /// DTLS parameters being applied
    Connecting,
    /// DTLS parameters applied; may produce or consume
    Connected,
    /// Closed
    Closed,
}

/// Registered transport
#[derive(Debug, Clone)]
pub struct TransportEntry {
    pub id: TransportId,
    pub session_id: SessionId,
    pub role: TransportRole,
    pub state: TransportState,
    pub created_at: Instant,
}

impl TransportEntry {
    /// New entry in state `New`
    pub fn new(id: TransportId, session_id: SessionId, role: TransportRole) -> Self {
        Self {
            id,
            session_id,
            role,
            state: TransportState::New,
            created_at: Instant::now(),
        }
    }

    /// Whether the transport may produce or consume
    pub fn is_connected(&self) -> bool {
        self.state == TransportState::Connected
    }
}

#[derive(Default)]
struct Inner {
    transports: HashMap<TransportId, TransportEntry>,
    by_slot: HashMap<(SessionId, TransportRole), TransportId>,
}

/// Registry of transports keyed by id and by `(session, role)`
#[derive(Default)]
pub struct TransportRegistry {
    inner: RwLock<Inner>,
}

impl TransportRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the `(session, role)` slot is occupied or
    /// the id is already registered.
    pub fn register(&self, entry: TransportEntry) -> Result<()> {
        let mut inner = self.inner.write();
        let slot = (entry.session_id.clone(), entry.role);

        if let Some(existing) = inner.by_slot.get(&slot) {
            return Err(Error::InvalidState(format!(
                "session {} already has a {} transport ({})",
                entry.session_id, entry.role, existing
            )));
        }
        if inner.transports.contains_key(&entry.id) {
            return Err(Error::InvalidState(format!(
                "transport {} already registered",
                entry.id
            )));
        }

        info!(
            "Registered {} transport {} for session {} (total: {})",
            entry.role,
            entry.id,
            entry.session_id,
            inner.transports.len() + 1
        );
        inner.by_slot.insert(slot, entry.id.clone());
        inner.transports.insert(entry.id.clone(), entry);

        Ok(())
    }

    /// Get the transport a session holds for `role`
    pub fn get(&self, session_id: &str, role: TransportRole) -> Result<TransportEntry> {
        let inner = self.inner.read();
        inner
            .by_slot
            .get(&(session_id.to_string(), role))
            .and_then(|id| inner.transports.get(id))
            .cloned()
            .ok_or_else(|| {
                Error::UnknownTransport(format!("no {} transport for session {}", role, session_id))
            })
    }

    /// Get a transport by id
    pub fn get_by_id(&self, transport_id: &str) -> Option<TransportEntry> {
        self.inner.read().transports.get(transport_id).cloned()
    }

    /// Check if a transport is registered
    pub fn contains(&self, transport_id: &str) -> bool {
        self.inner.read().transports.contains_key(transport_id)
    }

    /// Remove the transport a session holds for `role`
    pub fn remove(&self, session_id: &str, role: TransportRole) -> Option<TransportEntry> {
        let mut inner = self.inner.write();
        let id = inner.by_slot.remove(&(session_id.to_string(), role))?;
        let mut entry = inner.transports.remove(&id)?;
        entry.state = TransportState::Closed;
        debug!("Removed {} transport {} of session {}", role, id, session_id);
        Some(entry)
    }

    /// Remove a transport by id
    pub fn remove_by_id(&self, transport_id: &str) -> Option<TransportEntry> {
        let mut inner = self.inner.write();
        let mut entry = inner.transports.remove(transport_id)?;
        inner
            .by_slot
            .remove(&(entry.session_id.clone(), entry.role));
        entry.state = TransportState::Closed;
        debug!("Removed transport {}", transport_id);
        Some(entry)
    }

    /// Move a transport into `Connecting` before DTLS parameters are applied
    ///
    /// # Errors
    ///
    /// `UnknownTransport` if absent, `InvalidState` unless the transport is
    /// `New` or `Connecting`.
    pub fn begin_connect(&self, transport_id: &str) -> Result<TransportState> {
        let mut inner = self.inner.write();
        let entry = inner
            .transports
            .get_mut(transport_id)
            .ok_or_else(|| Error::UnknownTransport(transport_id.to_string()))?;

        match entry.state {
            TransportState::New | TransportState::Connecting => {
                let previous = entry.state;
                entry.state = TransportState::Connecting;
                debug!("Transport {} state: {:?} -> Connecting", transport_id, previous);
                Ok(previous)
            }
            state => Err(Error::InvalidState(format!(
                "transport {} is {:?}, expected new or connecting",
                transport_id, state
            ))),
        }
    }

    /// Set the state of a registered transport
    pub fn set_state(&self, transport_id: &str, state: TransportState) -> Result<()> {
        let mut inner = self.inner.write();
        let entry = inner
            .transports
            .get_mut(transport_id)
            .ok_or_else(|| Error::UnknownTransport(transport_id.to_string()))?;

        if entry.state != state {
            debug!(
                "Transport {} state: {:?} -> {:?}",
                transport_id, entry.state, state
            );
            entry.state = state;
        }

        Ok(())
    }

    /// All transports owned by a session
    pub fn for_session(&self, session_id: &str) -> Vec<TransportEntry> {
        self.inner
            .read()
            .transports
            .values()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Ids of every registered transport
    pub fn ids(&self) -> Vec<TransportId> {
        self.inner.read().transports.keys().cloned().collect()
    }

    /// Number of registered transports
    pub fn len(&self) -> usize {
        self.inner.read().transports.len()
    }

    /// Check if no transport is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, session: &str, role: TransportRole) -> TransportEntry {
        TransportEntry::new(id.to_string(), session.to_string(), role)
    }

    #[test]
    fn test_register_and_get() {
        let registry = TransportRegistry::new();
        registry.register(entry("t1", "s1", TransportRole::Send)).unwrap();
        registry.register(entry("t2", "s1", TransportRole::Receive)).unwrap();

        assert_eq!(registry.get("s1", TransportRole::Send).unwrap().id, "t1");
        assert_eq!(registry.get("s1", TransportRole::Receive).unwrap().id, "t2");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_one_transport_per_slot() {
        let registry = TransportRegistry::new();
        registry.register(entry("t1", "s1", TransportRole::Send)).unwrap();

        let err = registry
            .register(entry("t2", "s1", TransportRole::Send))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        // Other sessions are unaffected
        registry.register(entry("t3", "s2", TransportRole::Send)).unwrap();
    }

    #[test]
    fn test_unknown_transport() {
        let registry = TransportRegistry::new();
        let err = registry.get("s1", TransportRole::Send).unwrap_err();
        assert!(matches!(err, Error::UnknownTransport(_)));
    }

    #[test]
    fn test_remove_frees_slot() {
        let registry = TransportRegistry::new();
        registry.register(entry("t1", "s1", TransportRole::Send)).unwrap();

        let removed = registry.remove("s1", TransportRole::Send).unwrap();
        assert_eq!(removed.state, TransportState::Closed);
        assert!(registry.is_empty());
        registry.register(entry("t2", "s1", TransportRole::Send)).unwrap();

        let removed = registry.remove_by_id("t2").unwrap();
        assert_eq!(removed.role, TransportRole::Send);
        assert!(registry.get("s1", TransportRole::Send).is_err());
    }

    #[test]
    fn test_connect_state_machine() {
        let registry = TransportRegistry::new();
        registry.register(entry("t1", "s1", TransportRole::Send)).unwrap();

        assert_eq!(registry.begin_connect("t1").unwrap(), TransportState::New);
        // Retry while connecting is allowed
        assert_eq!(
            registry.begin_connect("t1").unwrap(),
            TransportState::Connecting
        );

        registry.set_state("t1", TransportState::Connected).unwrap();
        assert!(registry.get_by_id("t1").unwrap().is_connected());
        assert!(matches!(
            registry.begin_connect("t1"),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            registry.begin_connect("missing"),
            Err(Error::UnknownTransport(_))
        ));
    }

    #[test]
    fn test_for_session() {
        let registry = TransportRegistry::new();
        registry.register(entry("t1", "s1", TransportRole::Send)).unwrap();
        registry.register(entry("t2", "s1", TransportRole::Receive)).unwrap();
        registry.register(entry("t3", "s2", TransportRole::Send)).unwrap();

        assert_eq!(registry.for_session("s1").len(), 2);
        assert_eq!(registry.for_session("s3").len(), 0);

        let mut ids = registry.ids();
        ids.sort();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }
}
