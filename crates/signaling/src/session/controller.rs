//! Session controller
//!
//! Every operation follows the same shape: validate against the registries,
//! release the locks, await the engine, then re-validate before registering
//! the result. If the owner of a freshly created engine entity vanished
//! during the await, the entity is closed engine-side and the request fails.
//!
//! Requests of one session are expected in arrival order (the gateway
//! handles a connection's messages sequentially); different sessions run
//! concurrently.

use super::events::ServerEvent;
use super::session::{SessionManager, SessionState};
use crate::config::{ServerConfig, WebRtcTransportConfig};
use crate::engine::{
    is_terminal, ConsumeOptions, ConsumerDescriptor, DtlsParameters, EngineEvent, EngineRouter,
    MediaEngine, MediaKind, RtpCapabilities, RtpCapabilitiesFinalized, RtpCodecCapability,
    RtpParameters, TransportParameters,
};
use crate::registry::{
    Cascade, CloseReason, ConsumerEntry, ConsumerState, MediaRegistry, ProducerEntry, ProducerId,
    TransportEntry, TransportRegistry, TransportRole, TransportState,
};
use crate::{Error, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, OnceCell};
use tracing::{debug, error, info, warn};

/// Snapshot of controller-side entity counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub sessions: usize,
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
}

/// Negotiates transports, producers and consumers on behalf of clients
pub struct SessionController {
    engine: Arc<dyn MediaEngine>,
    router: OnceCell<Arc<dyn EngineRouter>>,
    media_codecs: Vec<RtpCodecCapability>,
    transport_options: WebRtcTransportConfig,
    sessions: SessionManager,
    transports: TransportRegistry,
    media: MediaRegistry,
}

impl SessionController {
    /// Create a controller bound to `engine`
    ///
    /// The routing context is not created until [`start`](Self::start).
    pub fn new(engine: Arc<dyn MediaEngine>, config: &ServerConfig) -> Self {
        Self {
            engine,
            router: OnceCell::new(),
            media_codecs: config.router.media_codecs.clone(),
            transport_options: config.webrtc_transport.clone(),
            sessions: SessionManager::new(config.max_sessions),
            transports: TransportRegistry::new(),
            media: MediaRegistry::new(),
        }
    }

    /// Create the routing context. Calling it again is a no-op.
    pub async fn start(&self) -> Result<()> {
        let router = self
            .router
            .get_or_try_init(|| self.engine.create_router(self.media_codecs.clone()))
            .await?;

        info!("Session controller ready (router {})", router.id());
        Ok(())
    }

    /// Check if the routing context exists
    pub fn is_ready(&self) -> bool {
        self.router.initialized()
    }

    fn router(&self) -> Result<Arc<dyn EngineRouter>> {
        self.router.get().cloned().ok_or(Error::EngineNotReady)
    }

    /// Subscribe to the engine's lifecycle events
    pub fn subscribe_engine(&self) -> broadcast::Receiver<EngineEvent> {
        self.engine.subscribe()
    }

    /// Consume engine events until the engine fails
    ///
    /// Returns `Err(Error::WorkerDied)` when the worker terminates or the
    /// event stream ends. Callers treat that as fatal.
    pub async fn run_engine_events(
        self: Arc<Self>,
        mut events: broadcast::Receiver<EngineEvent>,
    ) -> Result<()> {
        loop {
            match events.recv().await {
                Ok(event) => self.handle_engine_event(event).await?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Engine event stream lagged, {} event(s) skipped, reconciling transports",
                        skipped
                    );
                    self.reconcile_transports().await;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(Error::WorkerDied("engine event stream closed".to_string()));
                }
            }
        }
    }

    /// Close every registered transport the engine no longer carries
    ///
    /// Skipped events may have been terminal DTLS transitions, so the
    /// registry is checked against the engine's current state instead.
    async fn reconcile_transports(&self) {
        let Ok(router) = self.router() else {
            return;
        };

        for transport_id in self.transports.ids() {
            let dead = match router.dtls_state(&transport_id) {
                Some(state) => is_terminal(state),
                None => true,
            };
            if dead {
                info!("Transport {} is gone engine-side, closing it", transport_id);
                self.teardown_transport(&transport_id, true).await;
            }
        }
    }

    /// Apply one engine lifecycle event
    pub async fn handle_engine_event(&self, event: EngineEvent) -> Result<()> {
        debug!("Engine event: {}", event.name());

        match event {
            EngineEvent::DtlsStateChanged {
                transport_id,
                state,
            } if is_terminal(state) => {
                if self.transports.contains(&transport_id) {
                    info!(
                        "Transport {} DTLS {:?}, closing it",
                        transport_id, state
                    );
                    self.teardown_transport(&transport_id, true).await;
                }
                Ok(())
            }
            EngineEvent::DtlsStateChanged {
                transport_id,
                state,
            } => {
                debug!("Transport {} DTLS state {:?}", transport_id, state);
                Ok(())
            }
            EngineEvent::WorkerDied { reason } => {
                error!("Media engine worker died: {}", reason);
                Err(Error::WorkerDied(reason))
            }
        }
    }

    /// Open a session and push the router capabilities to it
    pub fn open_session(&self, session_id: &str, sink: mpsc::Sender<ServerEvent>) -> Result<()> {
        self.sessions.open(session_id.to_string(), sink)?;

        match self.router() {
            Ok(router) => {
                let event = ServerEvent::RouterCapabilities {
                    rtp_capabilities: router.rtp_capabilities(),
                };
                if self.sessions.notify(session_id, event) {
                    self.sessions
                        .advance(session_id, SessionState::CapabilitiesSent);
                }
            }
            Err(_) => warn!(
                "Session {} opened before the router is ready, capabilities not sent",
                session_id
            ),
        }

        Ok(())
    }

    /// Router capability descriptor, for `request:rtpCapabilities`
    pub fn router_capabilities(&self, session_id: &str) -> Result<RtpCapabilitiesFinalized> {
        self.sessions.ensure_open(session_id)?;
        let router = self.router()?;
        self.sessions
            .advance(session_id, SessionState::CapabilitiesSent);
        Ok(router.rtp_capabilities())
    }

    /// Create the session's transport for `role`
    ///
    /// A transport already held for the same role is closed first, with the
    /// full cascade, so its engine resources are released.
    pub async fn create_transport(
        &self,
        session_id: &str,
        role: TransportRole,
    ) -> Result<TransportParameters> {
        self.sessions.ensure_open(session_id)?;
        let router = self.router()?;

        if let Ok(existing) = self.transports.get(session_id, role) {
            info!(
                "Session {} replaces its {} transport {}",
                session_id, role, existing.id
            );
            self.teardown_transport(&existing.id, false).await;
        }

        let params = router
            .create_webrtc_transport(&self.transport_options)
            .await
            .map_err(engine_error)?;

        if !self.sessions.is_open(session_id) {
            self.discard_transport(&router, &params.id).await;
            return Err(Error::UnknownSession(session_id.to_string()));
        }

        let entry = TransportEntry::new(params.id.clone(), session_id.to_string(), role);
        if let Err(e) = self.transports.register(entry) {
            self.discard_transport(&router, &params.id).await;
            return Err(e);
        }

        self.sessions
            .advance(session_id, SessionState::TransportsNegotiating);
        Ok(params)
    }

    /// Apply the client's DTLS parameters to the session's transport for `role`
    pub async fn connect_transport(
        &self,
        session_id: &str,
        role: TransportRole,
        dtls_parameters: DtlsParameters,
    ) -> Result<()> {
        self.sessions.ensure_open(session_id)?;
        let router = self.router()?;
        let transport = self.transports.get(session_id, role)?;
        let previous = self.transports.begin_connect(&transport.id)?;

        match router.connect_transport(&transport.id, dtls_parameters).await {
            Ok(()) => {
                self.transports
                    .set_state(&transport.id, TransportState::Connected)?;
                info!(
                    "Session {} connected its {} transport {}",
                    session_id, role, transport.id
                );
                Ok(())
            }
            Err(e) => {
                warn!("Failed to connect transport {}: {}", transport.id, e);
                // The transport may have been closed meanwhile
                let _ = self.transports.set_state(&transport.id, previous);
                Err(engine_error(e))
            }
        }
    }

    /// Start producing on the session's send transport
    pub async fn produce(
        &self,
        session_id: &str,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        app_data: Value,
    ) -> Result<ProducerId> {
        self.sessions.ensure_open(session_id)?;
        let router = self.router()?;
        let transport = self.transports.get(session_id, TransportRole::Send)?;
        if !transport.is_connected() {
            return Err(Error::TransportNotConnected(transport.id));
        }

        let descriptor = router
            .produce(&transport.id, kind, rtp_parameters.clone())
            .await
            .map_err(engine_error)?;

        let entry = ProducerEntry::new(
            descriptor.id.clone(),
            session_id.to_string(),
            transport.id.clone(),
            descriptor.kind,
            rtp_parameters,
            app_data,
        );
        if let Err(e) = self.media.register_producer(entry) {
            self.discard_producer(&router, &descriptor.id).await;
            return Err(e);
        }

        // Registered after the transport was torn down: undo
        if !self.transports.contains(&transport.id) {
            self.undo_producer(&router, &descriptor.id).await;
            return Err(Error::UnknownTransport(transport.id));
        }

        self.sessions.advance(session_id, SessionState::Streaming);

        for other in self.sessions.session_ids() {
            if other != session_id {
                self.sessions.notify(
                    &other,
                    ServerEvent::NewProducer {
                        producer_id: descriptor.id.clone(),
                        kind: descriptor.kind,
                    },
                );
            }
        }

        Ok(descriptor.id)
    }

    /// Create a paused consumer on the session's receive transport
    ///
    /// Without `producer_id` the most recently created live producer is
    /// consumed.
    pub async fn consume(
        &self,
        session_id: &str,
        rtp_capabilities: RtpCapabilities,
        producer_id: Option<&str>,
    ) -> Result<ConsumerDescriptor> {
        self.sessions.ensure_open(session_id)?;
        let router = self.router()?;

        let producer = match producer_id {
            Some(id) => self
                .media
                .producer(id)
                .ok_or_else(|| Error::UnknownProducer(id.to_string()))?,
            None => self
                .media
                .latest_producer()
                .ok_or_else(|| Error::NotConsumable("no producer to consume".to_string()))?,
        };

        let transport = self.transports.get(session_id, TransportRole::Receive)?;
        if !transport.is_connected() {
            return Err(Error::TransportNotConnected(transport.id));
        }

        if !router.can_consume(&producer.id, &rtp_capabilities) {
            return Err(Error::NotConsumable(format!(
                "producer {} cannot be consumed with the given rtpCapabilities",
                producer.id
            )));
        }

        let descriptor = router
            .consume(
                &transport.id,
                ConsumeOptions {
                    producer_id: producer.id.clone(),
                    rtp_capabilities,
                    paused: true,
                },
            )
            .await
            .map_err(engine_error)?;

        let entry = ConsumerEntry::new(
            descriptor.id.clone(),
            session_id.to_string(),
            transport.id.clone(),
            producer.id.clone(),
            descriptor.kind,
            descriptor.rtp_parameters.clone(),
        );
        if let Err(e) = self.media.register_consumer(entry) {
            self.discard_consumer(&router, &descriptor.id).await;
            return Err(e);
        }

        if !self.transports.contains(&transport.id) {
            self.media.close_consumer(&descriptor.id);
            self.discard_consumer(&router, &descriptor.id).await;
            return Err(Error::UnknownTransport(transport.id));
        }

        self.sessions.advance(session_id, SessionState::Streaming);
        Ok(descriptor)
    }

    /// Resume a consumer of the session. Resuming an active consumer is a no-op.
    ///
    /// Without `consumer_id` the session's most recently created consumer is
    /// resumed.
    pub async fn resume_consumer(
        &self,
        session_id: &str,
        consumer_id: Option<&str>,
    ) -> Result<ConsumerEntry> {
        self.set_consumer_paused(session_id, consumer_id, false)
            .await
    }

    /// Pause a consumer of the session. Pausing a paused consumer is a no-op.
    pub async fn pause_consumer(
        &self,
        session_id: &str,
        consumer_id: Option<&str>,
    ) -> Result<ConsumerEntry> {
        self.set_consumer_paused(session_id, consumer_id, true)
            .await
    }

    async fn set_consumer_paused(
        &self,
        session_id: &str,
        consumer_id: Option<&str>,
        paused: bool,
    ) -> Result<ConsumerEntry> {
        self.sessions.ensure_open(session_id)?;
        let router = self.router()?;
        let mut consumer = self.session_consumer(session_id, consumer_id)?;

        let target = if paused {
            ConsumerState::Paused
        } else {
            ConsumerState::Active
        };
        if consumer.state == target {
            debug!("Consumer {} already {:?}", consumer.id, target);
            return Ok(consumer);
        }

        let applied = if paused {
            router.pause_consumer(&consumer.id).await
        } else {
            router.resume_consumer(&consumer.id).await
        };
        applied.map_err(engine_error)?;

        self.media.set_consumer_state(&consumer.id, target)?;
        info!("Consumer {} {:?}", consumer.id, target);
        consumer.state = target;
        Ok(consumer)
    }

    fn session_consumer(&self, session_id: &str, consumer_id: Option<&str>) -> Result<ConsumerEntry> {
        match consumer_id {
            Some(id) => self
                .media
                .consumer(id)
                .filter(|c| c.session_id == session_id)
                .ok_or_else(|| Error::UnknownConsumer(id.to_string())),
            None => self.media.latest_consumer_for(session_id).ok_or_else(|| {
                Error::UnknownConsumer(format!("no consumer for session {}", session_id))
            }),
        }
    }

    /// Close one of the session's producers and every consumer bound to it
    pub async fn close_producer(&self, session_id: &str, producer_id: &str) -> Result<()> {
        self.sessions.ensure_open(session_id)?;

        let owned = self
            .media
            .producer(producer_id)
            .map(|p| p.session_id == session_id)
            .unwrap_or(false);
        if !owned {
            return Err(Error::UnknownProducer(producer_id.to_string()));
        }

        let cascade = self
            .media
            .close_producer(producer_id)
            .ok_or_else(|| Error::UnknownProducer(producer_id.to_string()))?;

        if let Ok(router) = self.router() {
            self.discard_producer(&router, producer_id).await;
        }
        self.dispatch_cascade(&cascade, false);

        Ok(())
    }

    /// Withdraw a producer that lost its transport while being registered
    ///
    /// Consumers created against it in the meantime are closed and their
    /// sessions notified.
    async fn undo_producer(&self, router: &Arc<dyn EngineRouter>, producer_id: &str) {
        if let Some(cascade) = self.media.close_producer(producer_id) {
            self.dispatch_cascade(&cascade, false);
        }
        self.discard_producer(router, producer_id).await;
    }

    /// Tear down everything a session owns. Other sessions are only notified.
    pub async fn close_session(&self, session_id: &str) {
        let Some(session) = self.sessions.close(session_id) else {
            return;
        };

        for transport in self.transports.for_session(session_id) {
            self.teardown_transport(&transport.id, false).await;
        }

        info!(
            "Session {} closed after {:?} (remaining: {})",
            session_id,
            session.age(),
            self.sessions.len()
        );
    }

    /// Close a transport with its cascade, engine-side and registry-side
    ///
    /// `notify_owner` is set when the close did not come from the owner.
    async fn teardown_transport(&self, transport_id: &str, notify_owner: bool) -> Option<Cascade> {
        let entry = self.transports.remove_by_id(transport_id)?;
        let cascade = self.media.close_transport(transport_id);

        if let Ok(router) = self.router() {
            self.discard_transport(&router, transport_id).await;
        }

        self.dispatch_cascade(&cascade, notify_owner);

        if notify_owner {
            self.sessions.notify(
                &entry.session_id,
                ServerEvent::TransportClosed {
                    transport_id: entry.id.clone(),
                    role: entry.role,
                },
            );
        }

        info!(
            "Closed {} transport {} of session {}",
            entry.role, entry.id, entry.session_id
        );
        Some(cascade)
    }

    /// Turn a cascade into client notifications
    fn dispatch_cascade(&self, cascade: &Cascade, notify_transport_consumers: bool) {
        for notice in cascade.producer_closed_notices() {
            self.sessions.notify(
                &notice.session_id,
                ServerEvent::ProducerClosed {
                    producer_id: notice.producer_id,
                    consumer_ids: notice.consumer_ids,
                },
            );
        }

        if notify_transport_consumers {
            for consumer in cascade.consumers_closed_by(CloseReason::TransportClosed) {
                self.sessions.notify(
                    &consumer.session_id,
                    ServerEvent::ConsumerClosed {
                        consumer_id: consumer.id.clone(),
                        reason: CloseReason::TransportClosed,
                    },
                );
            }
        }
    }

    async fn discard_transport(&self, router: &Arc<dyn EngineRouter>, transport_id: &str) {
        if let Err(e) = router.close_transport(transport_id).await {
            warn!("Failed to close engine transport {}: {}", transport_id, e);
        }
    }

    async fn discard_producer(&self, router: &Arc<dyn EngineRouter>, producer_id: &str) {
        if let Err(e) = router.close_producer(producer_id).await {
            warn!("Failed to close engine producer {}: {}", producer_id, e);
        }
    }

    async fn discard_consumer(&self, router: &Arc<dyn EngineRouter>, consumer_id: &str) {
        if let Err(e) = router.close_consumer(consumer_id).await {
            warn!("Failed to close engine consumer {}: {}", consumer_id, e);
        }
    }

    /// Negotiation state of a session
    pub fn session_state(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.state(session_id)
    }

    /// Transport a session holds for `role`
    pub fn transport(&self, session_id: &str, role: TransportRole) -> Result<TransportEntry> {
        self.transports.get(session_id, role)
    }

    /// Registered producer
    pub fn producer(&self, producer_id: &str) -> Option<ProducerEntry> {
        self.media.producer(producer_id)
    }

    /// Registered consumer
    pub fn consumer(&self, consumer_id: &str) -> Option<ConsumerEntry> {
        self.media.consumer(consumer_id)
    }

    /// Producers of a session, in creation order
    pub fn producers_for_session(&self, session_id: &str) -> Vec<ProducerEntry> {
        self.media.producers_for_session(session_id)
    }

    /// Consumers of a session, in creation order
    pub fn consumers_for_session(&self, session_id: &str) -> Vec<ConsumerEntry> {
        self.media.consumers_for_session(session_id)
    }

    /// Entity counts
    pub fn stats(&self) -> ControllerStats {
        ControllerStats {
            sessions: self.sessions.len(),
            transports: self.transports.len(),
            producers: self.media.producer_count(),
            consumers: self.media.consumer_count(),
        }
    }
}

/// Relay engine failures as `EngineError` unless they already carry meaning
fn engine_error(error: Error) -> Error {
    match error {
        Error::EngineError(_)
        | Error::EngineNotReady
        | Error::NotConsumable(_)
        | Error::WorkerDied(_) => error,
        e if e.is_entity_error() => e,
        other => Error::EngineError(other.to_string()),
    }
}
