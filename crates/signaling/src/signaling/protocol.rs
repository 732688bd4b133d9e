//! JSON-RPC 2.0 signaling protocol types

use crate::engine::{DtlsParameters, MediaKind, RtpCapabilities, RtpParameters};
use crate::session::ServerEvent;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

/// JSON-RPC 2.0 protocol version
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request
///
/// A request without `id` is a notification and gets no response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Method name to invoke
    pub method: String,

    /// Method parameters
    #[serde(default)]
    pub params: Value,

    /// Request ID for matching with response
    ///
    /// `"id": null` is a request with a null id, not a notification.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Value>,
}

/// Keeps an explicit `null` as `Some(Value::Null)`; only a missing field is `None`
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// JSON-RPC 2.0 response (success)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Result data
    pub result: Value,

    /// Request ID this response corresponds to
    pub id: Value,
}

/// JSON-RPC 2.0 error response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Error details
    pub error: ErrorObject,

    /// Request ID this error corresponds to
    pub id: Value,
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    /// Error code
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Server-initiated JSON-RPC 2.0 notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcNotification {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Notification name
    pub method: String,

    /// Notification payload
    pub params: Value,
}

/// JSON-RPC 2.0 error codes
pub mod error_codes {
    /// Invalid JSON was received
    pub const PARSE_ERROR: i32 = -32700;

    /// The JSON sent is not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;

    /// The method does not exist / is not available
    pub const METHOD_NOT_FOUND: i32 = -32601;

    /// Invalid method parameter(s)
    pub const INVALID_PARAMS: i32 = -32602;

    /// Internal JSON-RPC error
    pub const INTERNAL_ERROR: i32 = -32603;

    // Signaling-specific error codes

    /// Routing context not created yet
    pub const ENGINE_NOT_READY: i32 = -32010;

    /// Media engine rejected the operation
    pub const ENGINE_ERROR: i32 = -32011;

    /// Transport not registered for the session
    pub const UNKNOWN_TRANSPORT: i32 = -32012;

    /// Producer not registered
    pub const UNKNOWN_PRODUCER: i32 = -32013;

    /// Consumer not registered for the session
    pub const UNKNOWN_CONSUMER: i32 = -32014;

    /// Session not open
    pub const UNKNOWN_SESSION: i32 = -32015;

    /// Producer cannot be consumed with the given capabilities
    pub const NOT_CONSUMABLE: i32 = -32016;

    /// Transport has not been connected
    pub const TRANSPORT_NOT_CONNECTED: i32 = -32017;

    /// Operation not allowed in the current state
    pub const INVALID_STATE: i32 = -32018;
}

/// Method names
pub mod methods {
    /// C→S: router capabilities
    pub const REQUEST_RTP_CAPABILITIES: &str = "request:rtpCapabilities";

    /// C→S: create a send or receive transport
    pub const REQUEST_WEBRTC_TRANSPORT: &str = "request:webRtcTransport";

    /// C→S: connect the send transport
    pub const TRANSPORT_CONNECT: &str = "transportConnect";

    /// C→S: produce on the send transport
    pub const TRANSPORT_PRODUCE: &str = "transportProduce";

    /// C→S: connect the receive transport
    pub const TRANSPORT_RECV_CONNECT: &str = "transportRecvConnect";

    /// C→S: consume a producer on the receive transport
    pub const CONSUME: &str = "consume";

    /// C→S: resume a consumer
    pub const CONSUMER_RESUME: &str = "consumerResume";

    /// C→S: pause a consumer
    pub const CONSUMER_PAUSE: &str = "consumerPause";

    /// C→S: close one of the session's producers
    pub const PRODUCER_CLOSE: &str = "producerClose";

    /// S→C: router capabilities on connect
    pub const GET_RTP_CAPABILITIES: &str = "get:rtpCapabilities";

    /// S→C: another session started producing
    pub const NEW_PRODUCER: &str = "newProducer";

    /// S→C: a consumed producer closed
    pub const PRODUCER_CLOSED: &str = "producerClosed";

    /// S→C: a consumer closed with its transport
    pub const CONSUMER_CLOSED: &str = "consumerClosed";

    /// S→C: the engine closed a transport
    pub const TRANSPORT_CLOSED: &str = "transportClosed";
}

/// Parameters for `request:webRtcTransport`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebRtcTransportParams {
    /// true for a send transport, false for a receive transport
    pub sender: bool,
}

/// Parameters for `transportConnect` and `transportRecvConnect`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransportConnectParams {
    /// Client DTLS parameters
    pub dtls_parameters: DtlsParameters,
}

/// Parameters for `transportProduce`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProduceParams {
    /// Media kind
    pub kind: MediaKind,

    /// Client RTP send parameters
    pub rtp_parameters: RtpParameters,

    /// Opaque application data
    #[serde(default)]
    pub app_data: Value,
}

/// Parameters for `consume`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeParams {
    /// Client receive capabilities
    pub rtp_capabilities: RtpCapabilities,

    /// Producer to consume; the latest producer when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer_id: Option<String>,
}

/// Parameters for `consumerResume` and `consumerPause`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerParams {
    /// Consumer to act on; the session's latest consumer when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_id: Option<String>,
}

/// Parameters for `producerClose`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProducerCloseParams {
    /// Producer to close
    pub producer_id: String,
}

/// Decode method parameters; missing params decode as `{}`
pub fn parse_params<T: DeserializeOwned>(params: Value) -> crate::Result<T> {
    let params = match params {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(params).map_err(|e| crate::Error::InvalidParams(e.to_string()))
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request
    pub fn new(method: impl Into<String>, params: Value, id: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to serialize JSON-RPC request: {}", e))
        })
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::SerializationError(format!(
                "Failed to deserialize JSON-RPC request: {}",
                e
            ))
        })
    }
}

impl JsonRpcResponse {
    /// Create a new JSON-RPC response
    pub fn new(result: Value, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result,
            id,
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!(
                "Failed to serialize JSON-RPC response: {}",
                e
            ))
        })
    }
}

impl JsonRpcError {
    /// Create a new JSON-RPC error
    pub fn new(code: i32, message: String, id: Value) -> Self {
        Self::from_object(
            ErrorObject {
                code,
                message,
                data: None,
            },
            id,
        )
    }

    /// Wrap an error object
    pub fn from_object(error: ErrorObject, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            error,
            id,
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to serialize JSON-RPC error: {}", e))
        })
    }
}

impl From<crate::Error> for ErrorObject {
    fn from(error: crate::Error) -> Self {
        Self {
            code: error.rpc_code(),
            message: error.to_string(),
            data: Some(json!({ "kind": error.kind() })),
        }
    }
}

impl JsonRpcNotification {
    /// Notification carrying a server event
    pub fn from_event(event: &ServerEvent) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: event.method().to_string(),
            params: event.params(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!(
                "Failed to serialize JSON-RPC notification: {}",
                e
            ))
        })
    }
}
