//! Media engine adapter
//!
//! The signaling controller never forwards media itself. Everything that
//! touches codecs, ICE, DTLS or packet routing is delegated to a media
//! engine through the [`MediaEngine`] and [`EngineRouter`] traits.
//!
//! Engine-side entities are addressed by id. Closing a transport or a
//! producer engine-side also closes its engine-side children, and closing
//! an entity that is already gone succeeds, so teardown can be retried.

pub mod types;
mod worker;

pub use types::{
    is_terminal, opus_codec, ConsumeOptions, ConsumerDescriptor, DtlsParameters, DtlsState,
    IceCandidate, IceParameters, MediaKind, ProducerDescriptor, RtpCapabilities,
    RtpCapabilitiesFinalized, RtpCodecCapability, RtpParameters, TransportParameters,
};
pub use worker::{EngineStats, MediasoupEngine, MediasoupRouter};

use crate::config::WebRtcTransportConfig;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Lifecycle events raised by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// DTLS state of a transport changed
    DtlsStateChanged {
        /// Engine transport id
        transport_id: String,
        /// New DTLS state
        state: DtlsState,
    },

    /// The engine worker process terminated
    WorkerDied {
        /// Termination cause
        reason: String,
    },
}

impl EngineEvent {
    /// Get the event name for logging/debugging
    pub fn name(&self) -> &'static str {
        match self {
            Self::DtlsStateChanged { .. } => "dtls_state_changed",
            Self::WorkerDied { .. } => "worker_died",
        }
    }
}

/// Entry point into a media engine
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create a routing context for the given codec set
    async fn create_router(
        &self,
        media_codecs: Vec<RtpCodecCapability>,
    ) -> Result<Arc<dyn EngineRouter>>;

    /// Subscribe to engine lifecycle events
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}

/// A routing context: owns transports, producers and consumers
#[async_trait]
pub trait EngineRouter: Send + Sync {
    /// Router id
    fn id(&self) -> &str;

    /// Capability descriptor handed to clients
    fn rtp_capabilities(&self) -> RtpCapabilitiesFinalized;

    /// Create a WebRTC transport and return its connection parameters
    async fn create_webrtc_transport(
        &self,
        config: &WebRtcTransportConfig,
    ) -> Result<TransportParameters>;

    /// Apply the remote DTLS parameters
    async fn connect_transport(
        &self,
        transport_id: &str,
        dtls_parameters: DtlsParameters,
    ) -> Result<()>;

    /// Close a transport together with its producers and consumers
    async fn close_transport(&self, transport_id: &str) -> Result<()>;

    /// Current DTLS state, `None` once the transport is gone engine-side
    fn dtls_state(&self, transport_id: &str) -> Option<DtlsState>;

    /// Start receiving a media stream on a transport
    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerDescriptor>;

    /// Close a producer together with its consumers
    async fn close_producer(&self, producer_id: &str) -> Result<()>;

    /// Whether a client with `rtp_capabilities` can receive `producer_id`
    fn can_consume(&self, producer_id: &str, rtp_capabilities: &RtpCapabilities) -> bool;

    /// Start sending a producer's stream on a transport
    async fn consume(
        &self,
        transport_id: &str,
        options: ConsumeOptions,
    ) -> Result<ConsumerDescriptor>;

    /// Stop sending media to a consumer
    async fn pause_consumer(&self, consumer_id: &str) -> Result<()>;

    /// Start sending media to a consumer
    async fn resume_consumer(&self, consumer_id: &str) -> Result<()>;

    /// Close a consumer
    async fn close_consumer(&self, consumer_id: &str) -> Result<()>;
}
