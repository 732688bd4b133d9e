//! WebSocket message handler for JSON-RPC 2.0 signaling
//!
//! Handles individual WebSocket connections and processes JSON-RPC messages.
//! Messages of one connection are handled one at a time, in arrival order.

use crate::registry::TransportRole;
use crate::session::{ServerEvent, SessionController};
use crate::signaling::protocol::{
    error_codes, methods, parse_params, ConsumeParams, ConsumerParams, ErrorObject, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ProduceParams, ProducerCloseParams,
    TransportConnectParams, WebRtcTransportParams, JSONRPC_VERSION,
};
use crate::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Capacity of the per-connection outbound queue
const OUTBOUND_CAPACITY: usize = 128;

/// Capacity of the per-session notification queue
const EVENT_CAPACITY: usize = 128;

/// Handle a single WebSocket connection until it closes or the server stops
pub async fn handle_connection(
    stream: TcpStream,
    controller: Arc<SessionController>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = stream.peer_addr()?;
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| Error::WebSocketError(e.to_string()))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // Channel for sending messages back to this connection
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_tx.send(msg).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let session_id = Uuid::new_v4().to_string();
    let (event_tx, mut event_rx) = mpsc::channel::<ServerEvent>(EVENT_CAPACITY);

    if let Err(e) = controller.open_session(&session_id, event_tx) {
        warn!("Rejecting connection from {}: {}", addr, e);
        let _ = tx.send(Message::Close(None)).await;
        drop(tx);
        let _ = writer.await;
        return Ok(());
    }
    info!("Session {} connected from {}", session_id, addr);

    // Task to forward notifications into the outbound queue
    let notify_tx = tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match JsonRpcNotification::from_event(&event).to_json() {
                Ok(text) => {
                    if notify_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Failed to encode {} notification: {}", event.method(), e),
            }
        }
    });

    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_message(&text, &session_id, &controller).await {
                        if tx.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = tx.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("WebSocket connection closed by client: {}", addr);
                    break;
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!("Session {} sent a binary frame, ignored", session_id);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("WebSocket error on session {}: {}", session_id, e);
                    break;
                }
            },
            _ = shutdown.recv() => {
                debug!("Closing session {} for server shutdown", session_id);
                let _ = tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    // Cleanup on disconnect
    info!("Cleaning up session: {}", session_id);
    controller.close_session(&session_id).await;

    forwarder.abort();
    let _ = forwarder.await;
    drop(tx);
    let _ = writer.await;

    Ok(())
}

/// Handle one text frame, returning the reply to send if any
pub(crate) async fn handle_message(
    text: &str,
    session_id: &str,
    controller: &SessionController,
) -> Option<String> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            let error = JsonRpcError::new(
                error_codes::PARSE_ERROR,
                format!("Failed to parse JSON: {}", e),
                Value::Null,
            );
            return encode(error.to_json());
        }
    };

    // Valid JSON that is not a request object
    let echoed_id = value.get("id").cloned().unwrap_or(Value::Null);
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            let error = JsonRpcError::new(
                error_codes::INVALID_REQUEST,
                format!("Invalid request: {}", e),
                echoed_id,
            );
            return encode(error.to_json());
        }
    };

    if request.jsonrpc != JSONRPC_VERSION {
        let Some(id) = request.id else {
            warn!(
                "Session {} sent a jsonrpc {:?} notification, dropped",
                session_id, request.jsonrpc
            );
            return None;
        };
        let error = JsonRpcError::new(
            error_codes::INVALID_REQUEST,
            format!("Unsupported jsonrpc version {:?}", request.jsonrpc),
            id,
        );
        return encode(error.to_json());
    }

    debug!("Session {} -> {}", session_id, request.method);
    let id = request.id.clone();
    let method = request.method.clone();
    let outcome = dispatch(request, session_id, controller).await;

    if let Err(error) = &outcome {
        debug!(
            "Session {} {} failed: {} ({})",
            session_id, method, error.message, error.code
        );
    }

    // Notifications get no reply
    let id = id?;
    match outcome {
        Ok(result) => encode(JsonRpcResponse::new(result, id).to_json()),
        Err(error) => encode(JsonRpcError::from_object(error, id).to_json()),
    }
}

fn encode(json: Result<String>) -> Option<String> {
    match json {
        Ok(text) => Some(text),
        Err(e) => {
            error!("Failed to encode reply: {}", e);
            None
        }
    }
}

/// Route a request to the controller
async fn dispatch(
    request: JsonRpcRequest,
    session_id: &str,
    controller: &SessionController,
) -> std::result::Result<Value, ErrorObject> {
    let params = request.params;

    let result = match request.method.as_str() {
        methods::REQUEST_RTP_CAPABILITIES => {
            let rtp_capabilities = controller.router_capabilities(session_id)?;
            json!({ "rtpCapabilities": rtp_capabilities })
        }
        methods::REQUEST_WEBRTC_TRANSPORT => {
            let params: WebRtcTransportParams = parse_params(params)?;
            let transport = controller
                .create_transport(session_id, TransportRole::from_sender(params.sender))
                .await?;
            json!({ "params": transport })
        }
        methods::TRANSPORT_CONNECT => {
            let params: TransportConnectParams = parse_params(params)?;
            controller
                .connect_transport(session_id, TransportRole::Send, params.dtls_parameters)
                .await?;
            json!({ "connected": true })
        }
        methods::TRANSPORT_RECV_CONNECT => {
            let params: TransportConnectParams = parse_params(params)?;
            controller
                .connect_transport(session_id, TransportRole::Receive, params.dtls_parameters)
                .await?;
            json!({ "connected": true })
        }
        methods::TRANSPORT_PRODUCE => {
            let params: ProduceParams = parse_params(params)?;
            let id = controller
                .produce(session_id, params.kind, params.rtp_parameters, params.app_data)
                .await?;
            json!({ "id": id })
        }
        methods::CONSUME => {
            let params: ConsumeParams = parse_params(params)?;
            let consumer = controller
                .consume(
                    session_id,
                    params.rtp_capabilities,
                    params.producer_id.as_deref(),
                )
                .await?;
            json!({ "params": consumer })
        }
        methods::CONSUMER_RESUME => {
            let params: ConsumerParams = parse_params(params)?;
            let consumer = controller
                .resume_consumer(session_id, params.consumer_id.as_deref())
                .await?;
            json!({ "resumed": true, "consumerId": consumer.id })
        }
        methods::CONSUMER_PAUSE => {
            let params: ConsumerParams = parse_params(params)?;
            let consumer = controller
                .pause_consumer(session_id, params.consumer_id.as_deref())
                .await?;
            json!({ "paused": true, "consumerId": consumer.id })
        }
        methods::PRODUCER_CLOSE => {
            let params: ProducerCloseParams = parse_params(params)?;
            controller
                .close_producer(session_id, &params.producer_id)
                .await?;
            json!({ "closed": true, "producerId": params.producer_id })
        }
        other => {
            return Err(ErrorObject {
                code: error_codes::METHOD_NOT_FOUND,
                message: format!("Unknown method: {}", other),
                data: None,
            });
        }
    };

    Ok(result)
}
