//! Two-client negotiation through the session controller
//!
//! One client produces audio, a second one consumes it.

mod harness;

use harness::{
    client_dtls, drain, init_logging, no_codec_capabilities, opus_rtp_parameters,
    ControllerHarness,
};
use serde_json::Value;
use sfu_signaling::engine::MediaKind;
use sfu_signaling::{ConsumerState, Error, ServerEvent, SessionState, TransportRole};
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_producer_and_consumer_negotiation() {
    init_logging();
    let h = ControllerHarness::new().await;

    // Client 1 connects and receives the router capabilities
    let mut alice_events = h.open("alice");
    let capabilities = match drain(&mut alice_events).as_slice() {
        [ServerEvent::RouterCapabilities { rtp_capabilities }] => rtp_capabilities.clone(),
        other => panic!("expected capabilities, got {:?}", other),
    };
    let capabilities = serde_json::to_value(capabilities).unwrap();
    let opus = capabilities["codecs"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["mimeType"] == "audio/opus")
        .expect("opus codec");
    assert_eq!(opus["kind"], "audio");
    assert_eq!(opus["clockRate"], 48000);
    assert_eq!(opus["channels"], 2);

    // Send transport
    let send = h
        .controller
        .create_transport("alice", TransportRole::from_sender(true))
        .await
        .unwrap();
    assert!(!send.id.is_empty());
    assert!(!send.ice_candidates.is_empty());
    assert!(!send.dtls_parameters.fingerprints.is_empty());
    assert_eq!(
        h.controller.session_state("alice"),
        Some(SessionState::TransportsNegotiating)
    );

    assert_ok!(
        h.controller
            .connect_transport("alice", TransportRole::Send, client_dtls())
            .await
    );

    // Client 2 connects before the producer exists
    let mut bob_events = h.open("bob");
    drain(&mut bob_events);

    let producer_id = h
        .controller
        .produce("alice", MediaKind::Audio, opus_rtp_parameters(1111), Value::Null)
        .await
        .unwrap();
    assert!(!producer_id.is_empty());
    assert_eq!(
        h.controller.session_state("alice"),
        Some(SessionState::Streaming)
    );

    assert_eq!(
        drain(&mut bob_events),
        vec![ServerEvent::NewProducer {
            producer_id: producer_id.clone(),
            kind: MediaKind::Audio,
        }]
    );
    assert!(drain(&mut alice_events).is_empty());

    // Receive transport and consumer
    let recv = h
        .controller
        .create_transport("bob", TransportRole::from_sender(false))
        .await
        .unwrap();
    assert_ne!(recv.id, send.id);
    assert_ok!(
        h.controller
            .connect_transport("bob", TransportRole::Receive, client_dtls())
            .await
    );

    let bob_caps = h.client_capabilities("bob");
    let consumer = h.controller.consume("bob", bob_caps, None).await.unwrap();
    assert!(!consumer.id.is_empty());
    assert_eq!(consumer.producer_id, producer_id);
    assert_eq!(consumer.kind, MediaKind::Audio);
    let rtp_parameters = serde_json::to_value(&consumer.rtp_parameters).unwrap();
    assert_eq!(rtp_parameters["codecs"][0]["mimeType"], "audio/opus");
    assert_eq!(
        h.controller.consumer(&consumer.id).unwrap().state,
        ConsumerState::Paused
    );

    // Resume
    let resumed = h.controller.resume_consumer("bob", None).await.unwrap();
    assert_eq!(resumed.id, consumer.id);
    assert_eq!(resumed.state, ConsumerState::Active);
    assert_eq!(
        h.controller.consumer(&consumer.id).unwrap().state,
        ConsumerState::Active
    );
    assert_eq!(h.engine.consumer_paused(&consumer.id), Some(false));
}

#[tokio::test]
async fn test_consume_before_any_produce() {
    init_logging();
    let h = ControllerHarness::new().await;
    let _events = h.open("bob");
    h.connected_transport("bob", TransportRole::Receive).await;

    let caps = h.client_capabilities("bob");
    let err = h.controller.consume("bob", caps, None).await.unwrap_err();

    assert!(matches!(err, Error::NotConsumable(_)));
    assert!(h.controller.consumers_for_session("bob").is_empty());
    assert_eq!(h.engine.stats().consumers, 0);
}

#[tokio::test]
async fn test_consume_requires_compatible_capabilities() {
    init_logging();
    let h = ControllerHarness::new().await;
    let _alice = h.open("alice");
    let _bob = h.open("bob");
    let producer_id = h.produce_audio("alice", 2222).await;
    h.connected_transport("bob", TransportRole::Receive).await;

    // A device that supports no audio codec the router offers
    let err = h
        .controller
        .consume("bob", no_codec_capabilities(), Some(&producer_id))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotConsumable(_)));

    let err = h
        .controller
        .consume("bob", no_codec_capabilities(), Some("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownProducer(_)));

    assert_eq!(h.controller.stats().consumers, 0);
}

#[tokio::test]
async fn test_resume_twice_is_a_noop() {
    init_logging();
    let h = ControllerHarness::new().await;
    let _alice = h.open("alice");
    let _bob = h.open("bob");
    let producer_id = h.produce_audio("alice", 3333).await;
    let consumer_id = h.consume("bob", &producer_id).await;

    let first = h
        .controller
        .resume_consumer("bob", Some(&consumer_id))
        .await
        .unwrap();
    let second = h
        .controller
        .resume_consumer("bob", Some(&consumer_id))
        .await
        .unwrap();

    assert_eq!(first.state, ConsumerState::Active);
    assert_eq!(second.state, ConsumerState::Active);
    assert_eq!(h.engine.consumer_paused(&consumer_id), Some(false));
}

#[tokio::test]
async fn test_multiple_producers_per_session() {
    init_logging();
    let h = ControllerHarness::new().await;
    let _alice = h.open("alice");
    let _bob = h.open("bob");

    let first = h.produce_audio("alice", 10).await;
    let second = h.produce_audio("alice", 20).await;
    assert_ne!(first, second);

    let ids: Vec<String> = h
        .controller
        .producers_for_session("alice")
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(ids, vec![first.clone(), second.clone()]);

    // Without a producer id the latest producer is consumed
    h.connected_transport("bob", TransportRole::Receive).await;
    let caps = h.client_capabilities("bob");
    let consumer = h.controller.consume("bob", caps, None).await.unwrap();
    assert_eq!(consumer.producer_id, second);

    let consumer_of_first = h.consume("bob", &first).await;
    assert_eq!(h.controller.consumers_for_session("bob").len(), 2);

    // Without a consumer id the latest consumer is resumed
    let resumed = h.controller.resume_consumer("bob", None).await.unwrap();
    assert_eq!(resumed.id, consumer_of_first);
}

#[tokio::test]
async fn test_requests_from_unknown_session() {
    init_logging();
    let h = ControllerHarness::new().await;

    assert!(matches!(
        h.controller.router_capabilities("ghost"),
        Err(Error::UnknownSession(_))
    ));
    assert_err!(
        h.controller
            .create_transport("ghost", TransportRole::Send)
            .await
    );
    assert_err!(h.controller.resume_consumer("ghost", None).await);
    assert_eq!(h.engine.stats().transports, 0);
}
