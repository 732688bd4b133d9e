//! mediasoup-backed media engine
//!
//! One mediasoup worker hosts the routing context. Transports, producers
//! and consumers are kept here by id: dropping a mediasoup handle closes
//! the entity worker-side, and the worker closes a transport's or a
//! producer's children with it. The maps mirror that so a closed parent
//! never leaves stale children behind.

use super::types::{
    ConsumeOptions, ConsumerDescriptor, DtlsParameters, DtlsState, ProducerDescriptor,
    RtpCapabilities, RtpCapabilitiesFinalized, RtpCodecCapability, RtpParameters,
    TransportParameters,
};
use super::{EngineEvent, EngineRouter, MediaEngine, MediaKind};
use crate::config::{WebRtcTransportConfig, WorkerConfig};
use crate::{Error, Result};
use async_trait::async_trait;
use mediasoup::data_structures::{ListenInfo, Protocol};
use mediasoup::prelude::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Engine-side entity counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
}

struct ProducerSlot {
    producer: Producer,
    transport_id: String,
}

struct ConsumerSlot {
    consumer: Consumer,
    transport_id: String,
    producer_id: String,
}

/// Live mediasoup handles, keyed by id
#[derive(Default)]
struct Entities {
    transports: HashMap<String, WebRtcTransport>,
    producers: HashMap<String, ProducerSlot>,
    consumers: HashMap<String, ConsumerSlot>,
}

/// Handles taken out of [`Entities`], closed when dropped
#[derive(Default)]
struct Released {
    consumers: Vec<Consumer>,
    producers: Vec<Producer>,
    transports: Vec<WebRtcTransport>,
}

impl Entities {
    fn release_consumers(
        &mut self,
        released: &mut Released,
        closed: impl Fn(&ConsumerSlot) -> bool,
    ) {
        let ids: Vec<String> = self
            .consumers
            .iter()
            .filter(|(_, slot)| closed(slot))
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            if let Some(slot) = self.consumers.remove(&id) {
                released.consumers.push(slot.consumer);
            }
        }
    }

    fn release_producer(&mut self, producer_id: &str, released: &mut Released) {
        if let Some(slot) = self.producers.remove(producer_id) {
            released.producers.push(slot.producer);
        }
        self.release_consumers(released, |slot| slot.producer_id == producer_id);
    }

    fn release_transport(&mut self, transport_id: &str) -> Released {
        let mut released = Released::default();
        if let Some(transport) = self.transports.remove(transport_id) {
            released.transports.push(transport);
        }

        let producer_ids: Vec<String> = self
            .producers
            .iter()
            .filter(|(_, slot)| slot.transport_id == transport_id)
            .map(|(id, _)| id.clone())
            .collect();
        for producer_id in &producer_ids {
            self.release_producer(producer_id, &mut released);
        }
        self.release_consumers(&mut released, |slot| slot.transport_id == transport_id);
        released
    }
}

/// [`MediaEngine`] running a single mediasoup worker
pub struct MediasoupEngine {
    // Owns the executor the worker's channel runs on
    _worker_manager: WorkerManager,
    worker: Worker,
    events: broadcast::Sender<EngineEvent>,
    entities: Arc<Mutex<Entities>>,
}

impl MediasoupEngine {
    /// Spawn the mediasoup worker
    ///
    /// The worker binds RTC ports in `rtc_min_port..=rtc_max_port`.
    pub async fn new(config: &WorkerConfig) -> Result<Self> {
        let worker_manager = WorkerManager::new();

        let mut settings = WorkerSettings::default();
        settings.rtc_port_range = config.rtc_min_port..=config.rtc_max_port;

        let worker = worker_manager
            .create_worker(settings)
            .await
            .map_err(|e| Error::EngineError(format!("Failed to create mediasoup worker: {}", e)))?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let dead_events = events.clone();
        worker
            .on_dead(move |result| {
                let reason = match result {
                    Ok(()) => "worker exited".to_string(),
                    Err(e) => e.to_string(),
                };
                error!("mediasoup worker died: {}", reason);
                let _ = dead_events.send(EngineEvent::WorkerDied { reason });
            })
            .detach();

        info!(
            "mediasoup worker {} started (rtc ports {}-{})",
            worker.id(),
            config.rtc_min_port,
            config.rtc_max_port
        );

        Ok(Self {
            _worker_manager: worker_manager,
            worker,
            events,
            entities: Arc::new(Mutex::new(Entities::default())),
        })
    }

    /// Engine-side entity counts
    pub fn stats(&self) -> EngineStats {
        let entities = self.entities.lock();
        EngineStats {
            transports: entities.transports.len(),
            producers: entities.producers.len(),
            consumers: entities.consumers.len(),
        }
    }

    /// Whether the engine holds `consumer_id` paused
    pub fn consumer_paused(&self, consumer_id: &str) -> Option<bool> {
        self.entities
            .lock()
            .consumers
            .get(consumer_id)
            .map(|slot| slot.consumer.paused())
    }
}

#[async_trait]
impl MediaEngine for MediasoupEngine {
    async fn create_router(
        &self,
        media_codecs: Vec<RtpCodecCapability>,
    ) -> Result<Arc<dyn EngineRouter>> {
        let router = self
            .worker
            .create_router(RouterOptions::new(media_codecs))
            .await
            .map_err(|e| Error::EngineError(format!("Failed to create router: {}", e)))?;

        let id = router.id().to_string();
        info!("Router {} created on worker {}", id, self.worker.id());

        Ok(Arc::new(MediasoupRouter {
            id,
            router,
            events: self.events.clone(),
            entities: Arc::clone(&self.entities),
        }))
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

/// [`EngineRouter`] over a mediasoup router
pub struct MediasoupRouter {
    id: String,
    router: Router,
    events: broadcast::Sender<EngineEvent>,
    entities: Arc<Mutex<Entities>>,
}

impl MediasoupRouter {
    fn transport(&self, transport_id: &str) -> Result<WebRtcTransport> {
        self.entities
            .lock()
            .transports
            .get(transport_id)
            .cloned()
            .ok_or_else(|| Error::UnknownTransport(transport_id.to_string()))
    }

    fn producer_id(&self, producer_id: &str) -> Option<ProducerId> {
        self.entities
            .lock()
            .producers
            .get(producer_id)
            .map(|slot| slot.producer.id())
    }

    fn consumer(&self, consumer_id: &str) -> Result<Consumer> {
        self.entities
            .lock()
            .consumers
            .get(consumer_id)
            .map(|slot| slot.consumer.clone())
            .ok_or_else(|| Error::UnknownConsumer(consumer_id.to_string()))
    }
}

/// One listen address per enabled protocol and configured ip
fn transport_options(config: &WebRtcTransportConfig) -> Result<WebRtcTransportOptions> {
    let mut listen_infos = Vec::new();
    for listen_ip in &config.listen_ips {
        for (enabled, protocol) in [
            (config.enable_udp, Protocol::Udp),
            (config.enable_tcp, Protocol::Tcp),
        ] {
            if enabled {
                listen_infos.push(ListenInfo {
                    protocol,
                    ip: listen_ip.ip,
                    announced_address: listen_ip.announced_ip.clone(),
                    port: None,
                    port_range: None,
                    flags: None,
                    send_buffer_size: None,
                    recv_buffer_size: None,
                });
            }
        }
    }

    let mut listen_infos = listen_infos.into_iter();
    let first = listen_infos.next().ok_or_else(|| {
        Error::InvalidConfig("webrtc_transport has no enabled listen address".to_string())
    })?;
    let listen_infos = listen_infos.fold(WebRtcTransportListenInfos::new(first), |infos, info| {
        infos.insert(info)
    });

    let mut options = WebRtcTransportOptions::new(listen_infos);
    options.prefer_udp = config.prefer_udp;
    Ok(options)
}

#[async_trait]
impl EngineRouter for MediasoupRouter {
    fn id(&self) -> &str {
        &self.id
    }

    fn rtp_capabilities(&self) -> RtpCapabilitiesFinalized {
        self.router.rtp_capabilities().clone()
    }

    async fn create_webrtc_transport(
        &self,
        config: &WebRtcTransportConfig,
    ) -> Result<TransportParameters> {
        let transport = self
            .router
            .create_webrtc_transport(transport_options(config)?)
            .await
            .map_err(|e| Error::EngineError(format!("Failed to create transport: {}", e)))?;

        let id = transport.id().to_string();
        let events = self.events.clone();
        let event_transport_id = id.clone();
        transport
            .on_dtls_state_change(move |state| {
                let _ = events.send(EngineEvent::DtlsStateChanged {
                    transport_id: event_transport_id.clone(),
                    state,
                });
            })
            .detach();

        let params = TransportParameters {
            id: id.clone(),
            ice_parameters: transport.ice_parameters().clone(),
            ice_candidates: transport.ice_candidates().clone(),
            dtls_parameters: transport.dtls_parameters(),
        };

        self.entities.lock().transports.insert(id.clone(), transport);
        debug!("Transport {} created", id);
        Ok(params)
    }

    async fn connect_transport(
        &self,
        transport_id: &str,
        dtls_parameters: DtlsParameters,
    ) -> Result<()> {
        let transport = self.transport(transport_id)?;
        transport
            .connect(WebRtcTransportRemoteParameters { dtls_parameters })
            .await
            .map_err(|e| {
                Error::EngineError(format!("Failed to connect transport {}: {}", transport_id, e))
            })
    }

    async fn close_transport(&self, transport_id: &str) -> Result<()> {
        let released = self.entities.lock().release_transport(transport_id);
        debug!(
            "Transport {} closed ({} producer(s), {} consumer(s))",
            transport_id,
            released.producers.len(),
            released.consumers.len()
        );
        drop(released);
        Ok(())
    }

    fn dtls_state(&self, transport_id: &str) -> Option<DtlsState> {
        self.entities
            .lock()
            .transports
            .get(transport_id)
            .map(|transport| transport.dtls_state())
    }

    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerDescriptor> {
        let transport = self.transport(transport_id)?;
        let producer = transport
            .produce(ProducerOptions::new(kind, rtp_parameters))
            .await
            .map_err(|e| Error::EngineError(format!("Failed to produce: {}", e)))?;

        let descriptor = ProducerDescriptor {
            id: producer.id().to_string(),
            kind: producer.kind(),
        };

        let mut entities = self.entities.lock();
        if !entities.transports.contains_key(transport_id) {
            warn!(
                "Transport {} closed while producing, dropping producer {}",
                transport_id, descriptor.id
            );
            return Err(Error::UnknownTransport(transport_id.to_string()));
        }
        entities.producers.insert(
            descriptor.id.clone(),
            ProducerSlot {
                producer,
                transport_id: transport_id.to_string(),
            },
        );
        Ok(descriptor)
    }

    async fn close_producer(&self, producer_id: &str) -> Result<()> {
        let mut released = Released::default();
        self.entities
            .lock()
            .release_producer(producer_id, &mut released);
        drop(released);
        Ok(())
    }

    fn can_consume(&self, producer_id: &str, rtp_capabilities: &RtpCapabilities) -> bool {
        match self.producer_id(producer_id) {
            Some(id) => self.router.can_consume(&id, rtp_capabilities),
            None => false,
        }
    }

    async fn consume(
        &self,
        transport_id: &str,
        options: ConsumeOptions,
    ) -> Result<ConsumerDescriptor> {
        let transport = self.transport(transport_id)?;
        let producer_id = self
            .producer_id(&options.producer_id)
            .ok_or_else(|| Error::UnknownProducer(options.producer_id.clone()))?;

        let mut consumer_options = ConsumerOptions::new(producer_id, options.rtp_capabilities);
        consumer_options.paused = options.paused;

        let consumer = transport
            .consume(consumer_options)
            .await
            .map_err(|e| Error::EngineError(format!("Failed to consume: {}", e)))?;

        let descriptor = ConsumerDescriptor {
            id: consumer.id().to_string(),
            producer_id: options.producer_id.clone(),
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters().clone(),
        };

        let mut entities = self.entities.lock();
        if !entities.transports.contains_key(transport_id)
            || !entities.producers.contains_key(&options.producer_id)
        {
            warn!(
                "Consumer {} lost its transport or producer while being created",
                descriptor.id
            );
            return Err(Error::UnknownTransport(transport_id.to_string()));
        }
        entities.consumers.insert(
            descriptor.id.clone(),
            ConsumerSlot {
                consumer,
                transport_id: transport_id.to_string(),
                producer_id: options.producer_id,
            },
        );
        Ok(descriptor)
    }

    async fn pause_consumer(&self, consumer_id: &str) -> Result<()> {
        self.consumer(consumer_id)?
            .pause()
            .await
            .map_err(|e| Error::EngineError(format!("Failed to pause {}: {}", consumer_id, e)))
    }

    async fn resume_consumer(&self, consumer_id: &str) -> Result<()> {
        self.consumer(consumer_id)?
            .resume()
            .await
            .map_err(|e| Error::EngineError(format!("Failed to resume {}: {}", consumer_id, e)))
    }

    async fn close_consumer(&self, consumer_id: &str) -> Result<()> {
        let released = self.entities.lock().consumers.remove(consumer_id);
        drop(released);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::engine::types::opus_codec;
    use serde_json::json;

    fn test_worker() -> WorkerConfig {
        WorkerConfig {
            rtc_min_port: 41000,
            rtc_max_port: 41999,
        }
    }

    fn client_dtls() -> DtlsParameters {
        serde_json::from_value(json!({
            "role": "client",
            "fingerprints": [{
                "algorithm": "sha-256",
                "value": "82:5A:68:3D:36:C3:0A:DE:AF:E7:32:43:D2:88:83:57:AC:2D:65:E5:80:C4:B6:FB:AF:1A:A0:21:9F:6D:0C:AD"
            }]
        }))
        .unwrap()
    }

    fn opus_parameters() -> RtpParameters {
        serde_json::from_value(json!({
            "mid": "0",
            "codecs": [{
                "mimeType": "audio/opus",
                "payloadType": 111,
                "clockRate": 48000,
                "channels": 2,
                "parameters": {},
                "rtcpFeedback": []
            }],
            "headerExtensions": [],
            "encodings": [{"ssrc": 5555}],
            "rtcp": {"cname": "engine-test", "reducedSize": true}
        }))
        .unwrap()
    }

    async fn router(engine: &MediasoupEngine) -> Arc<dyn EngineRouter> {
        engine.create_router(vec![opus_codec()]).await.unwrap()
    }

    fn client_capabilities(router: &Arc<dyn EngineRouter>) -> RtpCapabilities {
        serde_json::from_value(serde_json::to_value(router.rtp_capabilities()).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_transport_parameters() {
        let engine = MediasoupEngine::new(&test_worker()).await.unwrap();
        let router = router(&engine).await;

        let params = router
            .create_webrtc_transport(&ServerConfig::default().webrtc_transport)
            .await
            .unwrap();

        assert!(!params.ice_candidates.is_empty());
        assert!(!params.dtls_parameters.fingerprints.is_empty());
        assert_eq!(router.dtls_state(&params.id), Some(DtlsState::New));
        assert_eq!(engine.stats().transports, 1);
    }

    #[test]
    fn test_listen_infos_follow_protocol_switches() {
        let mut config = ServerConfig::default().webrtc_transport;
        config.enable_tcp = false;
        assert!(transport_options(&config).is_ok());

        config.enable_udp = false;
        assert!(matches!(
            transport_options(&config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_close_transport_closes_children() {
        let engine = MediasoupEngine::new(&test_worker()).await.unwrap();
        let router = router(&engine).await;
        let options = ServerConfig::default().webrtc_transport;

        let send = router.create_webrtc_transport(&options).await.unwrap();
        router.connect_transport(&send.id, client_dtls()).await.unwrap();
        let producer = router
            .produce(&send.id, MediaKind::Audio, opus_parameters())
            .await
            .unwrap();

        let recv = router.create_webrtc_transport(&options).await.unwrap();
        let caps = client_capabilities(&router);
        assert!(router.can_consume(&producer.id, &caps));
        let consumer = router
            .consume(
                &recv.id,
                ConsumeOptions {
                    producer_id: producer.id.clone(),
                    rtp_capabilities: caps,
                    paused: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(engine.consumer_paused(&consumer.id), Some(true));

        router.resume_consumer(&consumer.id).await.unwrap();
        assert_eq!(engine.consumer_paused(&consumer.id), Some(false));

        router.close_transport(&send.id).await.unwrap();
        assert_eq!(
            engine.stats(),
            EngineStats {
                transports: 1,
                producers: 0,
                consumers: 0,
            }
        );
        assert!(router.dtls_state(&send.id).is_none());
        assert!(!router.can_consume(&producer.id, &client_capabilities(&router)));

        // Already gone
        router.close_transport(&send.id).await.unwrap();
        router.close_consumer(&consumer.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_entities() {
        let engine = MediasoupEngine::new(&test_worker()).await.unwrap();
        let router = router(&engine).await;

        let err = router
            .connect_transport("missing", client_dtls())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTransport(_)));

        let err = router.resume_consumer("missing").await.unwrap_err();
        assert!(matches!(err, Error::UnknownConsumer(_)));
        assert!(!router.can_consume("missing", &client_capabilities(&router)));
    }
}
