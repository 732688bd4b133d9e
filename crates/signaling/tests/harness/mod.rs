//! Shared fixtures for the signaling integration tests

#![allow(dead_code)]

use serde_json::{json, Value};
use sfu_signaling::engine::{DtlsParameters, MediaKind, RtpCapabilities, RtpParameters};
use sfu_signaling::{
    MediasoupEngine, ServerConfig, ServerEvent, SessionController, TransportRole,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Initialize test logging (safe to call from every test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,sfu_signaling=debug")
        .with_test_writer()
        .try_init();
}

/// Loopback configuration with a port range wide enough for parallel tests
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig {
        listen_address: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    config.worker.rtc_min_port = 44000;
    config.worker.rtc_max_port = 45999;
    config
}

/// Client-side DTLS parameters, as a browser sends them
pub fn client_dtls_json() -> Value {
    json!({
        "role": "client",
        "fingerprints": [{
            "algorithm": "sha-256",
            "value": "82:5A:68:3D:36:C3:0A:DE:AF:E7:32:43:D2:88:83:57:AC:2D:65:E5:80:C4:B6:FB:AF:1A:A0:21:9F:6D:0C:AD"
        }]
    })
}

/// Typed form of [`client_dtls_json`]
pub fn client_dtls() -> DtlsParameters {
    serde_json::from_value(client_dtls_json()).unwrap()
}

/// Opus send parameters as a browser would offer them
///
/// The mid follows the ssrc so several producers can share a transport.
pub fn opus_rtp_parameters_json(ssrc: u32) -> Value {
    json!({
        "mid": ssrc.to_string(),
        "codecs": [{
            "mimeType": "audio/opus",
            "payloadType": 111,
            "clockRate": 48000,
            "channels": 2,
            "parameters": {"useinbandfec": 1},
            "rtcpFeedback": []
        }],
        "headerExtensions": [],
        "encodings": [{"ssrc": ssrc}],
        "rtcp": {"cname": format!("client-{}", ssrc), "reducedSize": true}
    })
}

/// Typed form of [`opus_rtp_parameters_json`]
pub fn opus_rtp_parameters(ssrc: u32) -> RtpParameters {
    serde_json::from_value(opus_rtp_parameters_json(ssrc)).unwrap()
}

/// Receive capabilities without any codec
pub fn no_codec_capabilities() -> RtpCapabilities {
    serde_json::from_value(json!({"codecs": [], "headerExtensions": []})).unwrap()
}

/// Controller over a mediasoup worker
pub struct ControllerHarness {
    pub engine: Arc<MediasoupEngine>,
    pub controller: Arc<SessionController>,
}

impl ControllerHarness {
    /// Started controller with the test configuration
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    /// Started controller with `config`
    pub async fn with_config(config: ServerConfig) -> Self {
        let engine = Arc::new(MediasoupEngine::new(&config.worker).await.unwrap());
        let controller = Arc::new(SessionController::new(engine.clone(), &config));
        controller.start().await.unwrap();
        Self { engine, controller }
    }

    /// Open a session and return its notification stream
    pub fn open(&self, session_id: &str) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(64);
        self.controller.open_session(session_id, tx).unwrap();
        rx
    }

    /// Router capabilities as the session's device reports them back
    pub fn client_capabilities(&self, session_id: &str) -> RtpCapabilities {
        let caps = self.controller.router_capabilities(session_id).unwrap();
        serde_json::from_value(serde_json::to_value(caps).unwrap()).unwrap()
    }

    /// Create and connect a transport
    pub async fn connected_transport(&self, session_id: &str, role: TransportRole) -> String {
        let params = self
            .controller
            .create_transport(session_id, role)
            .await
            .unwrap();
        self.controller
            .connect_transport(session_id, role, client_dtls())
            .await
            .unwrap();
        params.id
    }

    /// Connect a send transport and produce audio on it
    pub async fn produce_audio(&self, session_id: &str, ssrc: u32) -> String {
        if self
            .controller
            .transport(session_id, TransportRole::Send)
            .is_err()
        {
            self.connected_transport(session_id, TransportRole::Send).await;
        }
        self.controller
            .produce(
                session_id,
                MediaKind::Audio,
                opus_rtp_parameters(ssrc),
                Value::Null,
            )
            .await
            .unwrap()
    }

    /// Connect a receive transport (if needed) and consume `producer_id`
    pub async fn consume(&self, session_id: &str, producer_id: &str) -> String {
        if self
            .controller
            .transport(session_id, TransportRole::Receive)
            .is_err()
        {
            self.connected_transport(session_id, TransportRole::Receive)
                .await;
        }
        let caps = self.client_capabilities(session_id);
        self.controller
            .consume(session_id, caps, Some(producer_id))
            .await
            .unwrap()
            .id
    }
}

/// Take every event queued so far
pub fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}
