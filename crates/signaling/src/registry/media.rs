//! Production/consumption registry
//!
//! Tracks producers and consumers and their bindings to transports. Close
//! propagation lives here as plain data transformations: closing a producer
//! or a transport returns a [`Cascade`] listing every entity that closed with
//! it, which the controller turns into engine calls and client notifications.

use super::transports::TransportId;
use crate::engine::{MediaKind, RtpParameters};
use crate::session::SessionId;
use crate::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

/// Producer identifier (assigned by the media engine)
pub type ProducerId = String;

/// Consumer identifier (assigned by the media engine)
pub type ConsumerId = String;

/// Producer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerState {
    Active,
    Closed,
}

/// Consumer lifecycle. Consumers are always created paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerState {
    Paused,
    Active,
    Closed,
}

/// Why a consumer was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CloseReason {
    /// The producer it was bound to closed
    ProducerClosed,
    /// Its own transport closed
    TransportClosed,
    /// Closed on request of its owner
    Requested,
}

/// Registered producer
#[derive(Debug, Clone)]
pub struct ProducerEntry {
    pub id: ProducerId,
    pub session_id: SessionId,
    pub transport_id: TransportId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub app_data: Value,
    pub state: ProducerState,
    seq: u64,
}

impl ProducerEntry {
    pub fn new(
        id: ProducerId,
        session_id: SessionId,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        app_data: Value,
    ) -> Self {
        Self {
            id,
            session_id,
            transport_id,
            kind,
            rtp_parameters,
            app_data,
            state: ProducerState::Active,
            seq: 0,
        }
    }
}

/// Registered consumer
#[derive(Debug, Clone)]
pub struct ConsumerEntry {
    pub id: ConsumerId,
    pub session_id: SessionId,
    pub transport_id: TransportId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub state: ConsumerState,
    seq: u64,
}

impl ConsumerEntry {
    pub fn new(
        id: ConsumerId,
        session_id: SessionId,
        transport_id: TransportId,
        producer_id: ProducerId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Self {
        Self {
            id,
            session_id,
            transport_id,
            producer_id,
            kind,
            rtp_parameters,
            state: ConsumerState::Paused,
            seq: 0,
        }
    }
}

/// Consumer removed by a cascade
#[derive(Debug, Clone)]
pub struct ClosedConsumer {
    pub entry: ConsumerEntry,
    pub reason: CloseReason,
}

/// `producerClosed` notice owed to one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerClosedNotice {
    pub session_id: SessionId,
    pub producer_id: ProducerId,
    pub consumer_ids: Vec<ConsumerId>,
}

/// Entities closed together
#[derive(Debug, Clone, Default)]
pub struct Cascade {
    /// Producers closed, in creation order
    pub producers: Vec<ProducerEntry>,
    /// Consumers closed, in creation order
    pub consumers: Vec<ClosedConsumer>,
}

impl Cascade {
    /// Check if nothing closed
    pub fn is_empty(&self) -> bool {
        self.producers.is_empty() && self.consumers.is_empty()
    }

    /// Group consumers closed because of their producer into one notice per
    /// `(session, producer)` pair.
    pub fn producer_closed_notices(&self) -> Vec<ProducerClosedNotice> {
        let mut notices: Vec<ProducerClosedNotice> = Vec::new();

        for closed in &self.consumers {
            if closed.reason != CloseReason::ProducerClosed {
                continue;
            }
            let entry = &closed.entry;
            match notices
                .iter_mut()
                .find(|n| n.session_id == entry.session_id && n.producer_id == entry.producer_id)
            {
                Some(notice) => notice.consumer_ids.push(entry.id.clone()),
                None => notices.push(ProducerClosedNotice {
                    session_id: entry.session_id.clone(),
                    producer_id: entry.producer_id.clone(),
                    consumer_ids: vec![entry.id.clone()],
                }),
            }
        }

        notices
    }

    /// Consumers closed for `reason`
    pub fn consumers_closed_by(&self, reason: CloseReason) -> impl Iterator<Item = &ConsumerEntry> {
        self.consumers
            .iter()
            .filter(move |c| c.reason == reason)
            .map(|c| &c.entry)
    }
}

#[derive(Default)]
struct Inner {
    producers: HashMap<ProducerId, ProducerEntry>,
    consumers: HashMap<ConsumerId, ConsumerEntry>,
    next_seq: u64,
}

impl Inner {
    fn take_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn remove_producers_where<F>(&mut self, pred: F) -> Vec<ProducerEntry>
    where
        F: Fn(&ProducerEntry) -> bool,
    {
        let ids: Vec<ProducerId> = self
            .producers
            .values()
            .filter(|p| pred(*p))
            .map(|p| p.id.clone())
            .collect();

        let mut removed: Vec<ProducerEntry> = ids
            .iter()
            .filter_map(|id| self.producers.remove(id))
            .map(|mut p| {
                p.state = ProducerState::Closed;
                p
            })
            .collect();
        removed.sort_by_key(|p| p.seq);
        removed
    }

    fn remove_consumers_where<F>(&mut self, pred: F) -> Vec<ConsumerEntry>
    where
        F: Fn(&ConsumerEntry) -> bool,
    {
        let ids: Vec<ConsumerId> = self
            .consumers
            .values()
            .filter(|c| pred(*c))
            .map(|c| c.id.clone())
            .collect();

        let mut removed: Vec<ConsumerEntry> = ids
            .iter()
            .filter_map(|id| self.consumers.remove(id))
            .map(|mut c| {
                c.state = ConsumerState::Closed;
                c
            })
            .collect();
        removed.sort_by_key(|c| c.seq);
        removed
    }
}

/// Registry of producers and consumers
#[derive(Default)]
pub struct MediaRegistry {
    inner: RwLock<Inner>,
}

impl MediaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a producer
    pub fn register_producer(&self, mut entry: ProducerEntry) -> Result<ProducerEntry> {
        let mut inner = self.inner.write();
        if inner.producers.contains_key(&entry.id) {
            return Err(Error::InvalidState(format!(
                "producer {} already registered",
                entry.id
            )));
        }

        entry.seq = inner.take_seq();
        entry.state = ProducerState::Active;
        info!(
            "Registered {:?} producer {} on transport {} (session {})",
            entry.kind, entry.id, entry.transport_id, entry.session_id
        );
        inner.producers.insert(entry.id.clone(), entry.clone());

        Ok(entry)
    }

    /// Register a consumer in state `Paused`
    ///
    /// # Errors
    ///
    /// `UnknownProducer` if the producer closed in the meantime.
    pub fn register_consumer(&self, mut entry: ConsumerEntry) -> Result<ConsumerEntry> {
        let mut inner = self.inner.write();
        if !inner.producers.contains_key(&entry.producer_id) {
            return Err(Error::UnknownProducer(entry.producer_id.clone()));
        }
        if inner.consumers.contains_key(&entry.id) {
            return Err(Error::InvalidState(format!(
                "consumer {} already registered",
                entry.id
            )));
        }

        entry.seq = inner.take_seq();
        entry.state = ConsumerState::Paused;
        info!(
            "Registered {:?} consumer {} of producer {} (session {})",
            entry.kind, entry.id, entry.producer_id, entry.session_id
        );
        inner.consumers.insert(entry.id.clone(), entry.clone());

        Ok(entry)
    }

    /// Get a producer by id
    pub fn producer(&self, producer_id: &str) -> Option<ProducerEntry> {
        self.inner.read().producers.get(producer_id).cloned()
    }

    /// Get a consumer by id
    pub fn consumer(&self, consumer_id: &str) -> Option<ConsumerEntry> {
        self.inner.read().consumers.get(consumer_id).cloned()
    }

    /// Most recently created live producer
    pub fn latest_producer(&self) -> Option<ProducerEntry> {
        self.inner
            .read()
            .producers
            .values()
            .max_by_key(|p| p.seq)
            .cloned()
    }

    /// Most recently created consumer of a session
    pub fn latest_consumer_for(&self, session_id: &str) -> Option<ConsumerEntry> {
        self.inner
            .read()
            .consumers
            .values()
            .filter(|c| c.session_id == session_id)
            .max_by_key(|c| c.seq)
            .cloned()
    }

    /// Producers owned by a session, in creation order
    pub fn producers_for_session(&self, session_id: &str) -> Vec<ProducerEntry> {
        let mut producers: Vec<ProducerEntry> = self
            .inner
            .read()
            .producers
            .values()
            .filter(|p| p.session_id == session_id)
            .cloned()
            .collect();
        producers.sort_by_key(|p| p.seq);
        producers
    }

    /// Consumers owned by a session, in creation order
    pub fn consumers_for_session(&self, session_id: &str) -> Vec<ConsumerEntry> {
        let mut consumers: Vec<ConsumerEntry> = self
            .inner
            .read()
            .consumers
            .values()
            .filter(|c| c.session_id == session_id)
            .cloned()
            .collect();
        consumers.sort_by_key(|c| c.seq);
        consumers
    }

    /// Set a consumer's state, returning the previous one
    pub fn set_consumer_state(
        &self,
        consumer_id: &str,
        state: ConsumerState,
    ) -> Result<ConsumerState> {
        let mut inner = self.inner.write();
        let consumer = inner
            .consumers
            .get_mut(consumer_id)
            .ok_or_else(|| Error::UnknownConsumer(consumer_id.to_string()))?;

        let previous = consumer.state;
        if previous != state {
            debug!(
                "Consumer {} state: {:?} -> {:?}",
                consumer_id, previous, state
            );
            consumer.state = state;
        }

        Ok(previous)
    }

    /// Close a producer and every consumer bound to it
    pub fn close_producer(&self, producer_id: &str) -> Option<Cascade> {
        let mut inner = self.inner.write();
        let mut producer = inner.producers.remove(producer_id)?;
        producer.state = ProducerState::Closed;

        let consumers = inner
            .remove_consumers_where(|c| c.producer_id == producer_id)
            .into_iter()
            .map(|entry| ClosedConsumer {
                entry,
                reason: CloseReason::ProducerClosed,
            })
            .collect::<Vec<_>>();

        info!(
            "Closed producer {} ({} consumer(s) closed with it)",
            producer_id,
            consumers.len()
        );

        Some(Cascade {
            producers: vec![producer],
            consumers,
        })
    }

    /// Close a single consumer
    pub fn close_consumer(&self, consumer_id: &str) -> Option<ConsumerEntry> {
        let mut consumer = self.inner.write().consumers.remove(consumer_id)?;
        consumer.state = ConsumerState::Closed;
        debug!("Closed consumer {}", consumer_id);
        Some(consumer)
    }

    /// Close everything a transport owns: its producers, its consumers, and
    /// the consumers (on any transport) of those producers.
    pub fn close_transport(&self, transport_id: &str) -> Cascade {
        let mut inner = self.inner.write();

        let producers = inner.remove_producers_where(|p| p.transport_id == transport_id);
        let producer_ids: Vec<&ProducerId> = producers.iter().map(|p| &p.id).collect();

        let mut consumers: Vec<ClosedConsumer> = inner
            .remove_consumers_where(|c| {
                c.transport_id == transport_id || producer_ids.contains(&&c.producer_id)
            })
            .into_iter()
            .map(|entry| {
                let reason = if entry.transport_id == transport_id {
                    CloseReason::TransportClosed
                } else {
                    CloseReason::ProducerClosed
                };
                ClosedConsumer { entry, reason }
            })
            .collect();
        consumers.sort_by_key(|c| c.entry.seq);

        if !producers.is_empty() || !consumers.is_empty() {
            info!(
                "Transport {} closed {} producer(s) and {} consumer(s)",
                transport_id,
                producers.len(),
                consumers.len()
            );
        }

        Cascade {
            producers,
            consumers,
        }
    }

    /// Number of live producers
    pub fn producer_count(&self) -> usize {
        self.inner.read().producers.len()
    }

    /// Number of live consumers
    pub fn consumer_count(&self) -> usize {
        self.inner.read().consumers.len()
    }
}
