//! WebSocket signaling server
//!
//! Binds the signaling endpoint and runs the accept loop on the current
//! runtime. Every accepted connection is handled on its own task.

use super::handler::handle_connection;
use crate::session::SessionController;
use crate::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// WebSocket signaling server
pub struct SignalingServer {
    /// Address to bind
    addr: SocketAddr,

    /// Controller every connection talks to
    controller: Arc<SessionController>,
}

impl SignalingServer {
    /// Create a new signaling server
    pub fn new(addr: SocketAddr, controller: Arc<SessionController>) -> Self {
        Self { addr, controller }
    }

    /// Get the configured address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bind the endpoint and start accepting connections
    ///
    /// Fails if the address cannot be bound. The returned handle reports the
    /// bound address, which differs from the configured one for port 0.
    pub async fn start(self) -> Result<SignalingServerHandle> {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!("Failed to bind signaling server to {}: {}", self.addr, e);
            e
        })?;
        let local_addr = listener.local_addr()?;
        info!("Signaling server listening on ws://{}", local_addr);

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut shutdown_rx = shutdown_tx.subscribe();
        let connection_shutdown = shutdown_tx.clone();
        let controller = self.controller;

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                info!("Accepted WebSocket connection from {}", peer_addr);
                                let controller = Arc::clone(&controller);
                                let shutdown = connection_shutdown.subscribe();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, controller, shutdown).await {
                                        error!("WebSocket connection error from {}: {}", peer_addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept WebSocket connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Signaling server received shutdown signal");
                        break;
                    }
                }
            }

            info!("Signaling server accept loop exited");
        });

        Ok(SignalingServerHandle {
            local_addr,
            shutdown_tx,
            task: Some(task),
        })
    }
}

/// Handle for controlling a running signaling server
pub struct SignalingServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl SignalingServerHandle {
    /// Address the server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and close every open connection
    pub async fn shutdown(mut self) {
        info!("Sending shutdown signal to signaling server");
        let _ = self.shutdown_tx.send(());

        if let Some(task) = self.task.take() {
            let _ = task.await;
            info!("Signaling server stopped");
        }
    }
}
