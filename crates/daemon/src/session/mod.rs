//! Backend session handles and the process-wide registry.
//!
//! A backend session is one live remote shell owned by exactly one client
//! connection. The orchestrator talks to it through the [`SessionHandle`]
//! trait so that tests can substitute an in-memory backend for the SSH
//! implementation.

pub mod registry;
pub mod ssh;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use protocol::error::BridgeError;
use protocol::messages::ViewportDims;
use tokio::sync::mpsc;

use crate::hosts::HostConfig;

pub use registry::SessionRegistry;
pub use ssh::{SshConnector, SshSession};

/// Opaque identity correlating a client connection to its backend session.
pub type ConnectionId = String;

/// Events emitted by a backend session.
///
/// The receiver is handed out exactly once when the session is created;
/// there is no other subscription mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Output bytes to relay to the client, verbatim.
    Data(Vec<u8>),
    /// The backend failed mid-session.
    Error(String),
    /// The shell or the session underneath it closed.
    Closed,
}

/// Lifecycle status of a backend session handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    /// Transport handshake/authentication in progress.
    Connecting,
    /// Handshake complete, shell not yet allocated.
    Ready,
    /// Shell allocated, relay active.
    Streaming,
    /// Terminated normally.
    Ended,
    /// Terminated by a failure.
    Errored,
}

impl HandleStatus {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, HandleStatus::Ended | HandleStatus::Errored)
    }

    /// Whether `next` is a legal successor of `self`.
    fn permits(self, next: HandleStatus) -> bool {
        use HandleStatus::*;
        match (self, next) {
            (Connecting, Ready) => true,
            (Ready, Streaming) => true,
            // Termination is legal from any live state.
            (from, Ended | Errored) if !from.is_terminal() => true,
            _ => false,
        }
    }
}

/// Handle status behind a guarded transition function.
///
/// All status changes go through [`advance`](StatusCell::advance), which
/// rejects illegal transitions; in particular, a second attempt to end an
/// already-terminal handle reports `false`, which is what makes `end()`
/// idempotent.
#[derive(Debug)]
pub(crate) struct StatusCell(Mutex<HandleStatus>);

impl StatusCell {
    pub(crate) fn new(initial: HandleStatus) -> Self {
        Self(Mutex::new(initial))
    }

    pub(crate) fn get(&self) -> HandleStatus {
        *self.0.lock().unwrap()
    }

    /// Applies the transition if it is legal. Returns whether this call
    /// performed it.
    pub(crate) fn advance(&self, next: HandleStatus) -> bool {
        let mut status = self.0.lock().unwrap();
        if status.permits(next) {
            *status = next;
            true
        } else {
            false
        }
    }
}

/// Parameters for allocating the remote shell.
///
/// Merged from the connect request (`term`) and the viewport dimensions
/// current at allocation time; host connection parameters are never
/// affected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellRequest {
    /// Terminal type, e.g. `xterm-256color`.
    pub term: String,
    /// Viewport dimensions to size the pseudo-terminal with.
    pub dims: ViewportDims,
}

/// One live backend shell session.
///
/// Implementations must guarantee that `end` is idempotent (multiple calls
/// have the effect of exactly one) and that no `Data` event is emitted
/// after the first `end` call returns.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// Current lifecycle status.
    fn status(&self) -> HandleStatus;

    /// Allocates the remote shell. Legal once, from the Ready status.
    async fn open_shell(&self, req: &ShellRequest) -> Result<(), BridgeError>;

    /// Writes input bytes to the shell, verbatim.
    async fn write(&self, data: &[u8]) -> Result<(), BridgeError>;

    /// Forwards new viewport dimensions to the backend pseudo-terminal.
    /// Fire-and-forget; last write wins.
    async fn resize(&self, dims: ViewportDims) -> Result<(), BridgeError>;

    /// Terminates the session and releases its resources. Idempotent.
    async fn end(&self);
}

/// Opens backend sessions for resolved hosts.
///
/// The trait seam between the orchestrator and the SSH transport; tests
/// substitute an in-memory implementation.
#[async_trait]
pub trait ShellConnector: Send + Sync + 'static {
    /// Establishes the transport and authenticates against `host`.
    ///
    /// On success the returned handle is in the Ready status and the
    /// receiver carries every event the session will ever emit.
    async fn connect(
        &self,
        host: &HostConfig,
    ) -> Result<(Arc<dyn SessionHandle>, mpsc::Receiver<SessionEvent>), BridgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_happy_path() {
        let cell = StatusCell::new(HandleStatus::Connecting);
        assert_eq!(cell.get(), HandleStatus::Connecting);

        assert!(cell.advance(HandleStatus::Ready));
        assert!(cell.advance(HandleStatus::Streaming));
        assert!(cell.advance(HandleStatus::Ended));
        assert_eq!(cell.get(), HandleStatus::Ended);
    }

    #[test]
    fn test_end_is_guarded_exactly_once() {
        let cell = StatusCell::new(HandleStatus::Streaming);

        // First termination wins; every later attempt is rejected.
        assert!(cell.advance(HandleStatus::Ended));
        assert!(!cell.advance(HandleStatus::Ended));
        assert!(!cell.advance(HandleStatus::Errored));
        assert_eq!(cell.get(), HandleStatus::Ended);
    }

    #[test]
    fn test_no_skipping_ready() {
        let cell = StatusCell::new(HandleStatus::Connecting);
        assert!(!cell.advance(HandleStatus::Streaming));
        assert_eq!(cell.get(), HandleStatus::Connecting);
    }

    #[test]
    fn test_no_resurrection_from_terminal() {
        let cell = StatusCell::new(HandleStatus::Connecting);
        assert!(cell.advance(HandleStatus::Errored));

        assert!(!cell.advance(HandleStatus::Ready));
        assert!(!cell.advance(HandleStatus::Streaming));
        assert_eq!(cell.get(), HandleStatus::Errored);
    }

    #[test]
    fn test_termination_legal_from_any_live_state() {
        for live in [
            HandleStatus::Connecting,
            HandleStatus::Ready,
            HandleStatus::Streaming,
        ] {
            let cell = StatusCell::new(live);
            assert!(cell.advance(HandleStatus::Ended), "from {:?}", live);
        }
    }

    #[test]
    fn test_terminal_predicate() {
        assert!(HandleStatus::Ended.is_terminal());
        assert!(HandleStatus::Errored.is_terminal());
        assert!(!HandleStatus::Connecting.is_terminal());
        assert!(!HandleStatus::Ready.is_terminal());
        assert!(!HandleStatus::Streaming.is_terminal());
    }
}
