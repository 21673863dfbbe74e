//! WebSocket server front-end.
//!
//! Accepts browser connections, decodes frames into bridge inputs and
//! writes bridge output back out: control events as Text frames carrying
//! JSON, terminal bytes as Binary frames. Each connection gets its own
//! [`SessionBridge`](crate::bridge::SessionBridge) task; the server only
//! owns the listener, the registry and the shutdown token.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use protocol::messages::ClientMessage;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::{ClientInput, Outbound, SessionBridge};
use crate::hosts::HostResolver;
use crate::session::{SessionRegistry, ShellConnector};

/// Capacity of the daemon→client frame queue.
const OUTBOUND_CAPACITY: usize = 256;

/// Capacity of the client→bridge input queue.
const INBOUND_CAPACITY: usize = 64;

/// The WebSocket listener and the shared pieces every connection needs.
pub struct BridgeServer<C> {
    listener: TcpListener,
    resolver: Arc<HostResolver>,
    registry: Arc<SessionRegistry>,
    connector: Arc<C>,
    shutdown: CancellationToken,
}

impl<C: ShellConnector> BridgeServer<C> {
    /// Binds the listener.
    pub async fn bind(listen: &str, resolver: HostResolver, connector: C) -> Result<Self> {
        let listener = TcpListener::bind(listen)
            .await
            .with_context(|| format!("Failed to bind {}", listen))?;

        Ok(Self {
            listener,
            resolver: Arc::new(resolver),
            registry: Arc::new(SessionRegistry::new()),
            connector: Arc::new(connector),
            shutdown: CancellationToken::new(),
        })
    }

    /// The bound address, useful with an ephemeral port.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("No local address")
    }

    /// The session registry shared by all connections.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// The backend connector shared by all connections.
    pub fn connector(&self) -> Arc<C> {
        Arc::clone(&self.connector)
    }

    /// Token observed by every connection; cancel to shut down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accepts connections until shutdown, then ends every registered
    /// backend session.
    pub async fn run(self) -> Result<()> {
        info!(addr = %self.local_addr()?, "WebShell daemon listening");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let resolver = Arc::clone(&self.resolver);
                            let registry = Arc::clone(&self.registry);
                            let connector = Arc::clone(&self.connector);
                            let shutdown = self.shutdown.clone();
                            tokio::spawn(async move {
                                handle_connection(stream, peer, resolver, registry, connector, shutdown)
                                    .await;
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        // Exit guarantee: every registered handle receives end().
        self.registry.drain().await;
        info!("WebShell daemon stopped");
        Ok(())
    }
}

/// Runs one client connection: WebSocket handshake, frame adaptation and
/// the session bridge itself.
async fn handle_connection<C: ShellConnector>(
    stream: TcpStream,
    peer: SocketAddr,
    resolver: Arc<HostResolver>,
    registry: Arc<SessionRegistry>,
    connector: Arc<C>,
    shutdown: CancellationToken,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(peer = %peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let connection_id = Uuid::new_v4().to_string();
    info!(peer = %peer, connection_id = %connection_id, "Client connected");

    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);
    let (in_tx, in_rx) = mpsc::channel::<ClientInput>(INBOUND_CAPACITY);

    // Writer: bridge output to WebSocket frames, Close on completion.
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let message = match frame {
                Outbound::Control(msg) => match msg.to_json() {
                    Ok(json) => WsMessage::Text(json),
                    Err(e) => {
                        warn!(error = %e, "Failed to encode control frame");
                        continue;
                    }
                },
                Outbound::Data(bytes) => WsMessage::Binary(bytes),
            };
            if sink.send(message).await.is_err() {
                return;
            }
        }
        let _ = sink.send(WsMessage::Close(None)).await;
    });

    // Reader: WebSocket frames to bridge inputs.
    let reader_id = connection_id.clone();
    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let input = match frame {
                Ok(WsMessage::Text(text)) => match ClientMessage::from_json(&text) {
                    Ok(msg) => ClientInput::Control(msg),
                    Err(e) => {
                        warn!(connection_id = %reader_id, error = %e, "Ignoring malformed control frame");
                        continue;
                    }
                },
                Ok(WsMessage::Binary(bytes)) => ClientInput::Data(bytes),
                Ok(WsMessage::Close(_)) => break,
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) | Ok(WsMessage::Frame(_)) => {
                    continue;
                }
                Err(e) => {
                    debug!(connection_id = %reader_id, error = %e, "Client channel error");
                    break;
                }
            };
            if in_tx.send(input).await.is_err() {
                return;
            }
        }
        let _ = in_tx.send(ClientInput::Closed).await;
    });

    SessionBridge::new(connection_id.clone(), resolver, registry, connector, out_tx)
        .run(in_rx, shutdown)
        .await;

    // The bridge dropped its outbound sender; the writer flushes what is
    // left and closes the socket. The reader has nothing left to feed.
    reader.abort();
    let _ = writer.await;

    info!(connection_id = %connection_id, "Client connection finished");
}
