//! SSH-backed backend sessions.
//!
//! [`SshConnector`] establishes and authenticates the transport;
//! [`SshSession`] owns one live session and its shell channel. The channel
//! is driven by a single owner task; `write`, `resize` and `end` are
//! commands sent to that task, so channel I/O is never contended.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use protocol::error::BridgeError;
use protocol::messages::ViewportDims;
use russh::client;
use russh::{Channel, ChannelMsg, Disconnect};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{HandleStatus, SessionEvent, SessionHandle, ShellConnector, ShellRequest, StatusCell};
use crate::config::SshConfig;
use crate::hosts::HostConfig;

/// Capacity of the backend event channel handed to the orchestrator.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the command channel into the channel owner task.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Commands for the channel owner task.
enum ChannelCommand {
    /// Write input bytes to the shell.
    Write(Vec<u8>),
    /// Forward new pseudo-terminal dimensions.
    Resize(ViewportDims),
    /// Terminate; acknowledged once no further events will be emitted.
    End(oneshot::Sender<()>),
}

/// russh client callbacks for one backend session.
struct ClientHandler {
    events: mpsc::Sender<SessionEvent>,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Targets come from the operator-managed allow-list; host key
        // pinning is left to the deployment.
        Ok(true)
    }

    async fn auth_banner(
        &mut self,
        banner: &str,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        let text = normalize_newlines(banner);
        let _ = self.events.send(SessionEvent::Data(text.into_bytes())).await;
        Ok(())
    }
}

/// Opens SSH sessions for resolved hosts.
pub struct SshConnector {
    tuning: SshConfig,
}

impl SshConnector {
    /// Creates a connector with the configured transport tuning.
    pub fn new(tuning: SshConfig) -> Self {
        Self { tuning }
    }
}

#[async_trait]
impl ShellConnector for SshConnector {
    async fn connect(
        &self,
        host: &HostConfig,
    ) -> Result<(Arc<dyn SessionHandle>, mpsc::Receiver<SessionEvent>), BridgeError> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let config = Arc::new(client::Config {
            keepalive_interval: Some(Duration::from_secs(self.tuning.keepalive_interval_secs)),
            keepalive_max: self.tuning.keepalive_count_max,
            ..Default::default()
        });

        let handler = ClientHandler {
            events: events_tx.clone(),
        };

        info!(
            host = %host.id,
            address = %host.address,
            port = host.port,
            "Connecting to backend host"
        );

        let connect_timeout = Duration::from_secs(self.tuning.connect_timeout_secs);
        let mut session = tokio::time::timeout(
            connect_timeout,
            client::connect(config, (host.address.as_str(), host.port), handler),
        )
        .await
        .map_err(|_| {
            BridgeError::HandshakeFailure(format!("connection to {} timed out", host.address))
        })?
        .map_err(|e| BridgeError::HandshakeFailure(e.to_string()))?;

        authenticate(&mut session, host).await?;

        info!(host = %host.id, user = %host.username, "Backend session authenticated");

        let handle = SshSession::ready(host.id.clone(), session, events_tx);
        Ok((Arc::new(handle), events_rx))
    }
}

/// Runs the authentication ladder: password, then keyboard-interactive
/// answering every prompt with the password, then public key.
async fn authenticate(
    session: &mut client::Handle<ClientHandler>,
    host: &HostConfig,
) -> Result<(), BridgeError> {
    if let Some(password) = &host.password {
        let ok = session
            .authenticate_password(host.username.as_str(), password.as_str())
            .await
            .map_err(|e| BridgeError::HandshakeFailure(format!("password auth failed: {}", e)))?;
        if ok {
            return Ok(());
        }

        debug!(host = %host.id, "Password rejected, trying keyboard-interactive");
        if keyboard_interactive_auth(session, &host.username, password).await? {
            return Ok(());
        }
    }

    if let Some(key_file) = &host.key_file {
        match load_key(key_file).await {
            Ok(key_pair) => {
                let ok = session
                    .authenticate_publickey(host.username.as_str(), Arc::new(key_pair))
                    .await
                    .map_err(|e| {
                        BridgeError::HandshakeFailure(format!("public key auth failed: {}", e))
                    })?;
                if ok {
                    return Ok(());
                }
                debug!(host = %host.id, "Public key rejected");
            }
            Err(e) => warn!(host = %host.id, error = %e, "Failed to load identity file"),
        }
    }

    Err(BridgeError::HandshakeFailure(format!(
        "all authentication methods rejected for user {}",
        host.username
    )))
}

/// Keyboard-interactive round trip. The server may send several info
/// requests; every prompt is answered with the configured password.
async fn keyboard_interactive_auth(
    session: &mut client::Handle<ClientHandler>,
    user: &str,
    password: &str,
) -> Result<bool, BridgeError> {
    use client::KeyboardInteractiveAuthResponse as Response;

    let mut response = session
        .authenticate_keyboard_interactive_start(user, None)
        .await
        .map_err(|e| {
            BridgeError::HandshakeFailure(format!("keyboard-interactive auth failed: {}", e))
        })?;

    loop {
        match response {
            Response::Success => return Ok(true),
            Response::Failure => return Ok(false),
            Response::InfoRequest { prompts, .. } => {
                let answers = prompts.iter().map(|_| password.to_string()).collect();
                response = session
                    .authenticate_keyboard_interactive_respond(answers)
                    .await
                    .map_err(|e| {
                        BridgeError::HandshakeFailure(format!(
                            "keyboard-interactive auth failed: {}",
                            e
                        ))
                    })?;
            }
        }
    }
}

/// Loads and decodes a private key file.
async fn load_key(path: &Path) -> Result<russh_keys::key::KeyPair, BridgeError> {
    let data = tokio::fs::read(path).await.map_err(|e| {
        BridgeError::HandshakeFailure(format!("failed to read identity file: {}", e))
    })?;

    russh_keys::decode_secret_key(&String::from_utf8_lossy(&data), None)
        .map_err(|e| BridgeError::HandshakeFailure(format!("failed to decode private key: {}", e)))
}

/// One live SSH session and, once allocated, its shell channel.
pub struct SshSession {
    host_id: String,
    status: Arc<StatusCell>,
    /// Present until the shell channel is opened or the session is ended;
    /// the owner task takes it over afterwards.
    session: tokio::sync::Mutex<Option<client::Handle<ClientHandler>>>,
    /// Commands for the channel owner task, once streaming.
    commands: std::sync::Mutex<Option<mpsc::Sender<ChannelCommand>>>,
    events: mpsc::Sender<SessionEvent>,
}

impl SshSession {
    /// Wraps an authenticated session in a Ready handle.
    fn ready(
        host_id: String,
        session: client::Handle<ClientHandler>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let status = StatusCell::new(HandleStatus::Connecting);
        status.advance(HandleStatus::Ready);

        Self {
            host_id,
            status: Arc::new(status),
            session: tokio::sync::Mutex::new(Some(session)),
            commands: std::sync::Mutex::new(None),
            events,
        }
    }

    fn command_sender(&self) -> Option<mpsc::Sender<ChannelCommand>> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionHandle for SshSession {
    fn status(&self) -> HandleStatus {
        self.status.get()
    }

    async fn open_shell(&self, req: &ShellRequest) -> Result<(), BridgeError> {
        let mut guard = self.session.lock().await;
        let session = match guard.as_mut() {
            Some(session) => session,
            None => {
                return Err(BridgeError::ShellAllocationFailure(
                    "session already ended".to_string(),
                ))
            }
        };

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| BridgeError::ShellAllocationFailure(e.to_string()))?;

        channel
            .request_pty(
                false,
                &req.term,
                u32::from(req.dims.cols),
                u32::from(req.dims.rows),
                req.dims.pixel_width,
                req.dims.pixel_height,
                &[],
            )
            .await
            .map_err(|e| BridgeError::ShellAllocationFailure(e.to_string()))?;
        channel
            .request_shell(false)
            .await
            .map_err(|e| BridgeError::ShellAllocationFailure(e.to_string()))?;

        // The owner task takes the session over for the rest of its life.
        let session = guard.take().expect("session present");
        drop(guard);

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        *self.commands.lock().unwrap() = Some(cmd_tx);

        if !self.status.advance(HandleStatus::Streaming) {
            // Ended while the shell was being allocated; discard it.
            self.commands.lock().unwrap().take();
            let _ = session
                .disconnect(Disconnect::ByApplication, "session ended", "")
                .await;
            return Err(BridgeError::ShellAllocationFailure(
                "session ended during shell allocation".to_string(),
            ));
        }

        debug!(host = %self.host_id, term = %req.term, rows = req.dims.rows, cols = req.dims.cols, "Shell allocated");

        tokio::spawn(run_channel(
            channel,
            session,
            cmd_rx,
            self.events.clone(),
            Arc::clone(&self.status),
            self.host_id.clone(),
        ));

        Ok(())
    }

    async fn write(&self, data: &[u8]) -> Result<(), BridgeError> {
        match self.command_sender() {
            Some(commands) => commands
                .send(ChannelCommand::Write(data.to_vec()))
                .await
                .map_err(|_| BridgeError::StreamFault("shell channel is gone".to_string())),
            None => Err(BridgeError::StreamFault(
                "no shell allocated".to_string(),
            )),
        }
    }

    async fn resize(&self, dims: ViewportDims) -> Result<(), BridgeError> {
        match self.command_sender() {
            Some(commands) => commands
                .send(ChannelCommand::Resize(dims))
                .await
                .map_err(|_| BridgeError::StreamFault("shell channel is gone".to_string())),
            None => {
                debug!(host = %self.host_id, "Resize before shell allocation, recorded upstream");
                Ok(())
            }
        }
    }

    async fn end(&self) {
        if !self.status.advance(HandleStatus::Ended) {
            // Already terminal; the single termination effect has happened.
            return;
        }

        let commands = self.commands.lock().unwrap().take();
        if let Some(commands) = commands {
            let (ack_tx, ack_rx) = oneshot::channel();
            if commands.send(ChannelCommand::End(ack_tx)).await.is_ok() {
                // Wait for the owner task so no event is emitted after this
                // call returns.
                let _ = ack_rx.await;
            }
            return;
        }

        let session = self.session.lock().await.take();
        if let Some(session) = session {
            debug!(host = %self.host_id, "Disconnecting backend session before shell allocation");
            let _ = session.disconnect(Disconnect::ByApplication, "", "").await;
        }
    }
}

/// Owns the shell channel: applies commands and relays channel messages to
/// session events until either side terminates.
async fn run_channel(
    mut channel: Channel<client::Msg>,
    session: client::Handle<ClientHandler>,
    mut commands: mpsc::Receiver<ChannelCommand>,
    events: mpsc::Sender<SessionEvent>,
    status: Arc<StatusCell>,
    host_id: String,
) {
    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(ChannelCommand::Write(data)) => {
                    if let Err(e) = channel.data(&data[..]).await {
                        warn!(host = %host_id, error = %e, "Failed to write to shell channel");
                        status.advance(HandleStatus::Errored);
                        let _ = events.send(SessionEvent::Error(e.to_string())).await;
                        break;
                    }
                }
                Some(ChannelCommand::Resize(dims)) => {
                    if let Err(e) = channel
                        .window_change(
                            u32::from(dims.cols),
                            u32::from(dims.rows),
                            dims.pixel_width,
                            dims.pixel_height,
                        )
                        .await
                    {
                        warn!(host = %host_id, error = %e, "Window change rejected");
                    }
                }
                Some(ChannelCommand::End(ack)) => {
                    debug!(host = %host_id, "Ending shell channel");
                    disconnect(&session).await;
                    let _ = ack.send(());
                    return;
                }
                // Handle dropped without an explicit end; release the session.
                None => {
                    disconnect(&session).await;
                    return;
                }
            },
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    if events.send(SessionEvent::Data(data.to_vec())).await.is_err() {
                        // Receiver gone: the connection is tearing down.
                        disconnect(&session).await;
                        return;
                    }
                }
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    if let Ok(text) = std::str::from_utf8(&data) {
                        debug!(host = %host_id, stderr = %text, "Shell stderr");
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!(host = %host_id, exit_status, "Shell exit status");
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    info!(host = %host_id, "Shell channel closed by remote");
                    status.advance(HandleStatus::Ended);
                    let _ = events.send(SessionEvent::Closed).await;
                    disconnect(&session).await;
                    return;
                }
                Some(_) => {}
            },
        }
    }

    // Reached only after a write failure; release the transport.
    disconnect(&session).await;
}

async fn disconnect(session: &client::Handle<ClientHandler>) {
    let _ = session.disconnect(Disconnect::ByApplication, "", "").await;
}

/// Bare newlines in pre-session text (banners) confuse terminal renderers;
/// emit CRLF.
fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}
