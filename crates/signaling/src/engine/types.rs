//! Values the controller exchanges with the engine
//!
//! RTP, ICE and DTLS payloads are mediasoup's own types. They serialise in
//! the camelCase shape a browser-side device expects, so they pass through
//! the signaling layer unchanged.

use serde::{Deserialize, Serialize};

pub use mediasoup::data_structures::{
    DtlsFingerprint, DtlsParameters, DtlsRole, DtlsState, IceCandidate, IceParameters,
};
pub use mediasoup::rtp_parameters::{
    MediaKind, MimeTypeAudio, RtpCapabilities, RtpCapabilitiesFinalized, RtpCodecCapability,
    RtpCodecParametersParameters, RtpParameters,
};

use std::num::{NonZeroU32, NonZeroU8};

/// States after which a transport can never carry media again
pub fn is_terminal(state: DtlsState) -> bool {
    matches!(state, DtlsState::Failed | DtlsState::Closed)
}

/// Opus at 48 kHz stereo, the codec every WebRTC endpoint implements
pub fn opus_codec() -> RtpCodecCapability {
    const CLOCK_RATE: NonZeroU32 = match NonZeroU32::new(48000) {
        Some(rate) => rate,
        None => panic!("zero clock rate"),
    };
    const CHANNELS: NonZeroU8 = match NonZeroU8::new(2) {
        Some(channels) => channels,
        None => panic!("zero channels"),
    };

    RtpCodecCapability::Audio {
        mime_type: MimeTypeAudio::Opus,
        preferred_payload_type: None,
        clock_rate: CLOCK_RATE,
        channels: CHANNELS,
        parameters: RtpCodecParametersParameters::default(),
        rtcp_feedback: vec![],
    }
}

/// Connection parameters of a freshly created transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParameters {
    /// Transport id
    pub id: String,

    /// Server ICE credentials
    pub ice_parameters: IceParameters,

    /// Server ICE candidates
    pub ice_candidates: Vec<IceCandidate>,

    /// Server DTLS parameters
    pub dtls_parameters: DtlsParameters,
}

/// Producer as created by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerDescriptor {
    /// Producer id
    pub id: String,

    /// Media kind
    pub kind: MediaKind,
}

/// Options for creating a consumer
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    /// Producer to consume
    pub producer_id: String,

    /// Capabilities of the consuming client
    pub rtp_capabilities: RtpCapabilities,

    /// Start the consumer paused
    pub paused: bool,
}

/// Consumer as created by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerDescriptor {
    /// Consumer id
    pub id: String,

    /// Producer being consumed
    pub producer_id: String,

    /// Media kind
    pub kind: MediaKind,

    /// Parameters the client must use to receive the stream
    pub rtp_parameters: RtpParameters,
}
