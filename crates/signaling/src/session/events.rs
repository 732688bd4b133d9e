//! Server-initiated notifications
//!
//! These events flow from the session controller to a session's connection
//! and are written to the client as JSON-RPC notifications (no `id`).

use crate::engine::{MediaKind, RtpCapabilitiesFinalized};
use crate::registry::{CloseReason, ConsumerId, ProducerId, TransportId, TransportRole};
use crate::signaling::protocol::methods;
use serde_json::{json, Value};

/// Notification pushed to a client
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Router capabilities, sent once on connect
    RouterCapabilities {
        /// Capability descriptor of the routing context
        rtp_capabilities: RtpCapabilitiesFinalized,
    },

    /// Another session started producing
    NewProducer {
        /// New producer id
        producer_id: ProducerId,
        /// Media kind
        kind: MediaKind,
    },

    /// A producer this session consumed closed
    ProducerClosed {
        /// Closed producer id
        producer_id: ProducerId,
        /// Consumers of this session closed with it
        consumer_ids: Vec<ConsumerId>,
    },

    /// A consumer closed outside the session's control
    ConsumerClosed {
        /// Closed consumer id
        consumer_id: ConsumerId,
        /// Why it closed
        reason: CloseReason,
    },

    /// The engine closed one of the session's transports
    TransportClosed {
        /// Closed transport id
        transport_id: TransportId,
        /// Role the transport had
        role: TransportRole,
    },
}

impl ServerEvent {
    /// JSON-RPC method name of the notification
    pub fn method(&self) -> &'static str {
        match self {
            Self::RouterCapabilities { .. } => methods::GET_RTP_CAPABILITIES,
            Self::NewProducer { .. } => methods::NEW_PRODUCER,
            Self::ProducerClosed { .. } => methods::PRODUCER_CLOSED,
            Self::ConsumerClosed { .. } => methods::CONSUMER_CLOSED,
            Self::TransportClosed { .. } => methods::TRANSPORT_CLOSED,
        }
    }

    /// JSON-RPC params of the notification
    pub fn params(&self) -> Value {
        match self {
            Self::RouterCapabilities { rtp_capabilities } => json!({
                "rtpCapabilities": rtp_capabilities,
            }),
            Self::NewProducer { producer_id, kind } => json!({
                "producerId": producer_id,
                "kind": kind,
            }),
            Self::ProducerClosed {
                producer_id,
                consumer_ids,
            } => json!({
                "producerId": producer_id,
                "consumerIds": consumer_ids,
            }),
            Self::ConsumerClosed {
                consumer_id,
                reason,
            } => json!({
                "consumerId": consumer_id,
                "reason": reason,
            }),
            Self::TransportClosed { transport_id, role } => json!({
                "transportId": transport_id,
                "role": role,
            }),
        }
    }
}
