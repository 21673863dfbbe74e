//! Per-connection session orchestration.
//!
//! [`SessionBridge`] is the state machine owning one client connection's
//! lifecycle: it accepts the connect request, resolves the target,
//! establishes and owns the backend session, relays terminal I/O and
//! resize events in both directions, and guarantees exactly-once cleanup
//! on whichever side terminates first.
//!
//! All of a connection's events — decoded client frames, backend session
//! events and the outcomes of spawned connect/shell tasks — are processed
//! by a single `select!` loop, so transitions are atomic with respect to
//! the connection. Slow backend operations run as spawned tasks reporting
//! back into the loop; a completion arriving after teardown is discarded
//! and its handle is ended.

use std::sync::Arc;

use protocol::error::BridgeError;
use protocol::messages::{ClientMessage, ServerMessage, ViewportDims};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::hosts::HostResolver;
use crate::resize::ResizeCoordinator;
use crate::session::{
    ConnectionId, SessionEvent, SessionHandle, SessionRegistry, ShellConnector, ShellRequest,
};

/// Capacity of the internal event channel feeding the bridge loop.
const INTERNAL_CHANNEL_CAPACITY: usize = 64;

/// Connection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Client channel open, no connect request yet.
    Idle,
    /// Target resolved, backend handshake in flight.
    Connecting,
    /// Backend session up, shell allocation in flight.
    Ready,
    /// Shell allocated, relay active.
    Streaming,
    /// Teardown in progress.
    Closing,
    /// Terminated normally.
    Closed,
    /// Terminated by a failure.
    Errored,
}

impl Phase {
    /// Whether the connection has finished for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Closed | Phase::Errored)
    }
}

/// Input events from the client channel, decoded by the transport layer.
#[derive(Debug)]
pub enum ClientInput {
    /// A control frame.
    Control(ClientMessage),
    /// Raw terminal input bytes.
    Data(Vec<u8>),
    /// The client channel itself closed.
    Closed,
}

/// Frames destined for the client channel.
#[derive(Debug, PartialEq, Eq)]
pub enum Outbound {
    /// A control frame.
    Control(ServerMessage),
    /// Raw terminal output bytes.
    Data(Vec<u8>),
}

/// Events reported back into the bridge loop by its own spawned tasks.
enum Internal {
    /// Outcome of the backend connect task.
    Connected(
        Result<(Arc<dyn SessionHandle>, mpsc::Receiver<SessionEvent>), BridgeError>,
    ),
    /// Outcome of the shell allocation task.
    ShellReady(Result<(), BridgeError>),
    /// An event from the backend session.
    Backend(SessionEvent),
}

/// The per-connection state machine.
pub struct SessionBridge<C: ShellConnector> {
    id: ConnectionId,
    resolver: Arc<HostResolver>,
    registry: Arc<SessionRegistry>,
    connector: Arc<C>,
    outbound: mpsc::Sender<Outbound>,
    phase: Phase,
    resize: ResizeCoordinator,
    term: String,
    handle: Option<Arc<dyn SessionHandle>>,
    /// Pump forwarding backend events into the bridge loop.
    relay_task: Option<JoinHandle<()>>,
    internal_tx: mpsc::Sender<Internal>,
    internal_rx: Option<mpsc::Receiver<Internal>>,
}

impl<C: ShellConnector> SessionBridge<C> {
    /// Creates the bridge for one client connection.
    pub fn new(
        id: ConnectionId,
        resolver: Arc<HostResolver>,
        registry: Arc<SessionRegistry>,
        connector: Arc<C>,
        outbound: mpsc::Sender<Outbound>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_CHANNEL_CAPACITY);

        Self {
            id,
            resolver,
            registry,
            connector,
            outbound,
            phase: Phase::Idle,
            resize: ResizeCoordinator::new(),
            term: String::new(),
            handle: None,
            relay_task: None,
            internal_tx,
            internal_rx: Some(internal_rx),
        }
    }

    /// Runs the connection to completion.
    pub async fn run(mut self, mut inputs: mpsc::Receiver<ClientInput>, shutdown: CancellationToken) {
        debug!(connection_id = %self.id, "Session bridge started");

        let mut internal_rx = self.internal_rx.take().expect("run is called once");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.teardown(Phase::Closed, "server shutting down").await;
                }
                input = inputs.recv() => {
                    let input = input.unwrap_or(ClientInput::Closed);
                    self.on_client_input(input).await;
                }
                Some(event) = internal_rx.recv() => {
                    self.on_internal_event(event).await;
                }
            }

            if self.phase.is_terminal() {
                break;
            }
        }

        // Late completions queued behind the teardown still get their
        // handles ended.
        internal_rx.close();
        while let Some(event) = internal_rx.recv().await {
            if let Internal::Connected(Ok((handle, _events))) = event {
                handle.end().await;
            }
        }

        debug!(connection_id = %self.id, phase = ?self.phase, "Session bridge finished");
    }

    async fn on_client_input(&mut self, input: ClientInput) {
        match input {
            ClientInput::Control(ClientMessage::Connect {
                host,
                term,
                rows,
                cols,
            }) => {
                self.on_connect_request(host, term, rows, cols).await;
            }
            ClientInput::Control(ClientMessage::Resize { dims }) => {
                self.on_viewport_change(dims).await;
            }
            ClientInput::Control(ClientMessage::Disconnect) => {
                self.teardown(Phase::Closed, "client requested disconnect").await;
            }
            ClientInput::Data(bytes) => {
                self.on_client_data(bytes).await;
            }
            ClientInput::Closed => {
                self.teardown(Phase::Closed, "client channel closed").await;
            }
        }
    }

    async fn on_connect_request(&mut self, host: String, term: String, rows: u16, cols: u16) {
        if self.phase != Phase::Idle {
            warn!(
                connection_id = %self.id,
                phase = ?self.phase,
                "Ignoring connect request outside Idle"
            );
            return;
        }

        self.phase = Phase::Connecting;
        self.term = term;
        self.resize.record_initial(ViewportDims::cells(rows, cols));

        let config = match self.resolver.resolve(&host) {
            Some(config) => config.clone(),
            None => {
                warn!(connection_id = %self.id, host = %host, "Unknown host requested");
                let err = BridgeError::UnknownHost { host };
                self.notify(ServerMessage::connect_error(&err)).await;
                self.teardown(Phase::Errored, "host not found").await;
                return;
            }
        };

        info!(connection_id = %self.id, host = %config.id, "Opening backend session");

        let connector = Arc::clone(&self.connector);
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = connector.connect(&config).await;
            if let Err(unsent) = internal.send(Internal::Connected(result)).await {
                // The bridge is gone; the late session must still be ended.
                if let Internal::Connected(Ok((handle, _events))) = unsent.0 {
                    handle.end().await;
                }
            }
        });
    }

    async fn on_client_data(&mut self, bytes: Vec<u8>) {
        if self.phase != Phase::Streaming {
            trace!(
                connection_id = %self.id,
                phase = ?self.phase,
                len = bytes.len(),
                "Dropping client input outside Streaming"
            );
            return;
        }

        if let Some(handle) = &self.handle {
            if let Err(err) = handle.write(&bytes).await {
                warn!(connection_id = %self.id, error = %err, "Backend write failed");
                self.notify(ServerMessage::connect_error(&err)).await;
                self.teardown(Phase::Errored, "backend write failed").await;
            }
        }
    }

    async fn on_viewport_change(&mut self, dims: ViewportDims) {
        if let Some(dims) = self.resize.on_viewport_change(dims, self.phase) {
            if let Some(handle) = &self.handle {
                if let Err(err) = handle.resize(dims).await {
                    warn!(connection_id = %self.id, error = %err, "Resize forwarding failed");
                }
            }
        }
    }

    async fn on_internal_event(&mut self, event: Internal) {
        match event {
            Internal::Connected(Ok((handle, events))) => {
                self.on_backend_connected(handle, events).await;
            }
            Internal::Connected(Err(err)) => {
                if self.phase != Phase::Connecting {
                    debug!(
                        connection_id = %self.id,
                        error = %err,
                        "Discarding connect failure after teardown"
                    );
                    return;
                }
                warn!(connection_id = %self.id, error = %err, "Backend connect failed");
                self.notify(ServerMessage::connect_error(&err)).await;
                self.teardown(Phase::Errored, "backend connect failed").await;
            }
            Internal::ShellReady(result) => {
                self.on_shell_ready(result).await;
            }
            Internal::Backend(event) => {
                self.on_backend_event(event).await;
            }
        }
    }

    async fn on_backend_connected(
        &mut self,
        handle: Arc<dyn SessionHandle>,
        mut events: mpsc::Receiver<SessionEvent>,
    ) {
        if self.phase != Phase::Connecting {
            // Teardown already started; the result is discarded.
            debug!(connection_id = %self.id, "Backend ready after teardown, ending it");
            handle.end().await;
            return;
        }

        self.phase = Phase::Ready;
        self.handle = Some(Arc::clone(&handle));
        self.registry.register(&self.id, Arc::clone(&handle)).await;
        self.notify(ServerMessage::ConnectSuccess {
            connection_id: self.id.clone(),
        })
        .await;

        // Pump backend events into the single bridge loop.
        let internal = self.internal_tx.clone();
        self.relay_task = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if internal.send(Internal::Backend(event)).await.is_err() {
                    break;
                }
            }
        }));

        // Request the shell with the dimensions current right now; the
        // request-supplied term never touches host connection parameters.
        let dims = self
            .resize
            .latest()
            .unwrap_or_else(|| ViewportDims::cells(24, 80));
        let req = ShellRequest {
            term: self.term.clone(),
            dims,
        };
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = handle.open_shell(&req).await;
            let _ = internal.send(Internal::ShellReady(result)).await;
        });
    }

    async fn on_shell_ready(&mut self, result: Result<(), BridgeError>) {
        if self.phase != Phase::Ready {
            debug!(
                connection_id = %self.id,
                "Discarding shell allocation outcome after teardown"
            );
            return;
        }

        match result {
            Ok(()) => {
                debug!(connection_id = %self.id, "Streaming");
                self.phase = Phase::Streaming;

                // Apply dimensions that changed while the shell was being
                // allocated.
                if let Some(dims) = self.resize.take_pending() {
                    if let Some(handle) = &self.handle {
                        if let Err(err) = handle.resize(dims).await {
                            warn!(connection_id = %self.id, error = %err, "Initial resize failed");
                        }
                    }
                }
            }
            Err(err) => {
                warn!(connection_id = %self.id, error = %err, "Shell allocation failed");
                self.notify(ServerMessage::connect_error(&err)).await;
                self.teardown(Phase::Errored, "shell allocation failed").await;
            }
        }
    }

    async fn on_backend_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Data(bytes) => {
                if !matches!(self.phase, Phase::Ready | Phase::Streaming) {
                    trace!(connection_id = %self.id, "Dropping late backend bytes");
                    return;
                }
                self.send_data(bytes).await;
            }
            SessionEvent::Error(reason) => {
                if self.phase.is_terminal() {
                    return;
                }
                let err = BridgeError::StreamFault(reason);
                warn!(connection_id = %self.id, error = %err, "Backend stream fault");
                self.notify(ServerMessage::connect_error(&err)).await;
                self.teardown(Phase::Errored, "backend stream fault").await;
            }
            SessionEvent::Closed => {
                if self.phase.is_terminal() {
                    return;
                }
                info!(connection_id = %self.id, "Backend session closed");
                self.teardown(Phase::Closed, "backend closed").await;
            }
        }
    }

    /// Enters a terminal phase exactly once: ends the backend session,
    /// removes the registry entry and stops all relaying.
    async fn teardown(&mut self, target: Phase, reason: &str) {
        debug_assert!(target.is_terminal());
        if self.phase.is_terminal() {
            return;
        }

        debug!(
            connection_id = %self.id,
            from = ?self.phase,
            to = ?target,
            reason,
            "Tearing down connection"
        );
        self.phase = Phase::Closing;

        // The relay pump holds the backend event receiver; stopping it
        // first unblocks the channel owner if the event queue is full.
        if let Some(task) = self.relay_task.take() {
            task.abort();
        }

        if let Some(handle) = self.handle.take() {
            handle.end().await;
        }
        self.registry.deregister(&self.id);

        self.phase = target;
    }

    async fn notify(&self, msg: ServerMessage) {
        if self.outbound.send(Outbound::Control(msg)).await.is_err() {
            debug!(connection_id = %self.id, "Client channel writer gone");
        }
    }

    async fn send_data(&self, bytes: Vec<u8>) {
        if self.outbound.send(Outbound::Data(bytes)).await.is_err() {
            debug!(connection_id = %self.id, "Client channel writer gone");
        }
    }
}
