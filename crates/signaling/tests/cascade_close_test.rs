//! Close propagation: producers, transports and whole sessions

mod harness;

use harness::{drain, init_logging, ControllerHarness};
use sfu_signaling::engine::DtlsState;
use sfu_signaling::{CloseReason, ControllerStats, EngineEvent, ServerEvent, TransportRole};

fn producer_closed_notices(events: &[ServerEvent]) -> Vec<(String, Vec<String>)> {
    events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::ProducerClosed {
                producer_id,
                consumer_ids,
            } => Some((producer_id.clone(), consumer_ids.clone())),
            _ => None,
        })
        .collect()
}

/// Feed the controller a DTLS transition as the worker would report it
async fn report_dtls(h: &ControllerHarness, transport_id: &str, state: DtlsState) {
    h.controller
        .handle_engine_event(EngineEvent::DtlsStateChanged {
            transport_id: transport_id.to_string(),
            state,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_closing_producer_notifies_each_session_once() {
    init_logging();
    let h = ControllerHarness::new().await;
    let _alice = h.open("alice");
    let mut bob = h.open("bob");
    let mut carol = h.open("carol");

    let producer_id = h.produce_audio("alice", 1).await;
    let bob_first = h.consume("bob", &producer_id).await;
    let bob_second = h.consume("bob", &producer_id).await;
    let carol_consumer = h.consume("carol", &producer_id).await;
    drain(&mut bob);
    drain(&mut carol);

    h.controller
        .close_producer("alice", &producer_id)
        .await
        .unwrap();

    assert_eq!(
        producer_closed_notices(&drain(&mut bob)),
        vec![(producer_id.clone(), vec![bob_first.clone(), bob_second.clone()])]
    );
    assert_eq!(
        producer_closed_notices(&drain(&mut carol)),
        vec![(producer_id.clone(), vec![carol_consumer.clone()])]
    );

    for consumer in [&bob_first, &bob_second, &carol_consumer] {
        assert!(h.controller.consumer(consumer).is_none());
    }
    let stats = h.engine.stats();
    assert_eq!(stats.producers, 0);
    assert_eq!(stats.consumers, 0);

    // A second close finds nothing
    assert!(h
        .controller
        .close_producer("alice", &producer_id)
        .await
        .is_err());
}

#[tokio::test]
async fn test_send_transport_failure_closes_its_producers() {
    init_logging();
    let h = ControllerHarness::new().await;
    let mut alice = h.open("alice");
    let mut bob = h.open("bob");

    let first = h.produce_audio("alice", 1).await;
    let second = h.produce_audio("alice", 2).await;
    let consumer_a = h.consume("bob", &first).await;
    let consumer_b = h.consume("bob", &second).await;
    let send_id = h
        .controller
        .transport("alice", TransportRole::Send)
        .unwrap()
        .id;
    drain(&mut alice);
    drain(&mut bob);

    report_dtls(&h, &send_id, DtlsState::Failed).await;

    assert!(h.controller.producers_for_session("alice").is_empty());
    assert!(h.controller.consumers_for_session("bob").is_empty());
    assert!(h.controller.transport("alice", TransportRole::Send).is_err());
    // Bob's receive transport survives
    assert!(h.controller.transport("bob", TransportRole::Receive).is_ok());

    assert_eq!(
        drain(&mut alice),
        vec![ServerEvent::TransportClosed {
            transport_id: send_id,
            role: TransportRole::Send,
        }]
    );
    assert_eq!(
        producer_closed_notices(&drain(&mut bob)),
        vec![(first, vec![consumer_a]), (second, vec![consumer_b])]
    );
}

#[tokio::test]
async fn test_receive_transport_close_reports_consumers() {
    init_logging();
    let h = ControllerHarness::new().await;
    let _alice = h.open("alice");
    let mut bob = h.open("bob");

    let producer_id = h.produce_audio("alice", 1).await;
    let consumer_id = h.consume("bob", &producer_id).await;
    let recv_id = h
        .controller
        .transport("bob", TransportRole::Receive)
        .unwrap()
        .id;
    drain(&mut bob);

    report_dtls(&h, &recv_id, DtlsState::Closed).await;

    let events = drain(&mut bob);
    assert!(events.contains(&ServerEvent::ConsumerClosed {
        consumer_id: consumer_id.clone(),
        reason: CloseReason::TransportClosed,
    }));
    assert!(events.contains(&ServerEvent::TransportClosed {
        transport_id: recv_id,
        role: TransportRole::Receive,
    }));

    // The producer is untouched
    assert!(h.controller.producer(&producer_id).is_some());
    assert!(h.controller.consumer(&consumer_id).is_none());
}

#[tokio::test]
async fn test_non_terminal_dtls_state_is_ignored() {
    init_logging();
    let h = ControllerHarness::new().await;
    let _alice = h.open("alice");
    let send_id = h.connected_transport("alice", TransportRole::Send).await;

    report_dtls(&h, &send_id, DtlsState::Connecting).await;
    report_dtls(&h, &send_id, DtlsState::Connected).await;

    assert!(h.controller.transport("alice", TransportRole::Send).is_ok());
}

#[tokio::test]
async fn test_recreating_a_transport_does_not_leak() {
    init_logging();
    let h = ControllerHarness::new().await;
    let _alice = h.open("alice");
    let mut bob = h.open("bob");

    let producer_id = h.produce_audio("alice", 1).await;
    let consumer_id = h.consume("bob", &producer_id).await;
    drain(&mut bob);

    // Same (session, role) again
    let replacement = h
        .controller
        .create_transport("alice", TransportRole::Send)
        .await
        .unwrap();

    assert_eq!(
        h.controller
            .transport("alice", TransportRole::Send)
            .unwrap()
            .id,
        replacement.id
    );
    let stats = h.engine.stats();
    assert_eq!(stats.transports, 2);
    assert_eq!(stats.producers, 0);
    assert_eq!(stats.consumers, 0);

    // The old transport's producer went with it
    assert!(h.controller.producer(&producer_id).is_none());
    assert!(h.controller.consumer(&consumer_id).is_none());
    assert_eq!(
        producer_closed_notices(&drain(&mut bob)),
        vec![(producer_id, vec![consumer_id])]
    );
}

#[tokio::test]
async fn test_disconnect_only_affects_own_entities() {
    init_logging();
    let h = ControllerHarness::new().await;
    let _alice = h.open("alice");
    let mut bob = h.open("bob");
    let _carol = h.open("carol");

    let producer_id = h.produce_audio("alice", 1).await;
    let bob_consumer = h.consume("bob", &producer_id).await;
    let carol_consumer = h.consume("carol", &producer_id).await;
    drain(&mut bob);

    // A consumer leaving does not disturb the producer or other consumers
    h.controller.close_session("carol").await;
    assert!(h.controller.producer(&producer_id).is_some());
    assert!(h.controller.consumer(&bob_consumer).is_some());
    assert!(h.controller.consumer(&carol_consumer).is_none());
    assert!(drain(&mut bob).is_empty());

    // The producer leaving closes bob's consumer and tells bob
    h.controller.close_session("alice").await;
    assert!(h.controller.consumer(&bob_consumer).is_none());
    assert_eq!(
        producer_closed_notices(&drain(&mut bob)),
        vec![(producer_id, vec![bob_consumer])]
    );
    assert!(h.controller.transport("bob", TransportRole::Receive).is_ok());

    h.controller.close_session("bob").await;
    assert_eq!(h.controller.stats(), ControllerStats::default());

    let stats = h.engine.stats();
    assert_eq!(stats.transports, 0);
    assert_eq!(stats.producers, 0);
    assert_eq!(stats.consumers, 0);
}
