//! Error types for the signaling controller

use crate::signaling::protocol::error_codes;

/// Result type alias using signaling Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating media sessions
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Routing context has not been created yet
    #[error("Media engine not ready")]
    EngineNotReady,

    /// The media engine rejected an operation
    #[error("Media engine error: {0}")]
    EngineError(String),

    /// Transport not registered for the session
    #[error("Unknown transport: {0}")]
    UnknownTransport(String),

    /// Producer not registered
    #[error("Unknown producer: {0}")]
    UnknownProducer(String),

    /// Consumer not registered for the session
    #[error("Unknown consumer: {0}")]
    UnknownConsumer(String),

    /// Session not open
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// Capability mismatch between producer and consuming client
    #[error("Cannot consume: {0}")]
    NotConsumable(String),

    /// Transport exists but DTLS parameters have not been applied
    #[error("Transport not connected: {0}")]
    TransportNotConnected(String),

    /// Operation not allowed in the entity's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Media engine worker terminated
    #[error("Media engine worker died: {0}")]
    WorkerDied(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Request parameters could not be decoded
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Worker death cannot be recovered per session; the process restarts.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::WorkerDied(_))
    }

    /// Check if this error references an entity that is not registered
    pub fn is_entity_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownTransport(_)
                | Error::UnknownProducer(_)
                | Error::UnknownConsumer(_)
                | Error::UnknownSession(_)
        )
    }

    /// Stable tag carried in the `data.kind` field of error responses
    pub fn kind(&self) -> &'static str {
        match self {
            Error::EngineNotReady => "EngineNotReady",
            Error::EngineError(_) => "EngineError",
            Error::UnknownTransport(_) => "UnknownTransport",
            Error::UnknownProducer(_) => "UnknownProducer",
            Error::UnknownConsumer(_) => "UnknownConsumer",
            Error::UnknownSession(_) => "UnknownSession",
            Error::NotConsumable(_) => "NotConsumable",
            Error::TransportNotConnected(_) => "TransportNotConnected",
            Error::InvalidState(_) => "InvalidState",
            Error::WorkerDied(_) => "WorkerDied",
            Error::InvalidConfig(_) => "InvalidConfig",
            Error::InvalidParams(_) => "InvalidParams",
            Error::SerializationError(_) => "SerializationError",
            Error::WebSocketError(_) => "WebSocketError",
            Error::IoError(_) => "IoError",
            Error::Other(_) => "Internal",
        }
    }

    /// JSON-RPC error code used when this error is relayed to a client
    pub fn rpc_code(&self) -> i32 {
        match self {
            Error::EngineNotReady => error_codes::ENGINE_NOT_READY,
            Error::EngineError(_) | Error::WorkerDied(_) => error_codes::ENGINE_ERROR,
            Error::UnknownTransport(_) => error_codes::UNKNOWN_TRANSPORT,
            Error::UnknownProducer(_) => error_codes::UNKNOWN_PRODUCER,
            Error::UnknownConsumer(_) => error_codes::UNKNOWN_CONSUMER,
            Error::UnknownSession(_) => error_codes::UNKNOWN_SESSION,
            Error::NotConsumable(_) => error_codes::NOT_CONSUMABLE,
            Error::TransportNotConnected(_) => error_codes::TRANSPORT_NOT_CONNECTED,
            Error::InvalidState(_) => error_codes::INVALID_STATE,
            Error::InvalidParams(_) | Error::SerializationError(_) => error_codes::INVALID_PARAMS,
            Error::InvalidConfig(_)
            | Error::WebSocketError(_)
            | Error::IoError(_)
            | Error::Other(_) => error_codes::INTERNAL_ERROR,
        }
    }
}
