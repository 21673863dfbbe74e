//! Error taxonomy for the session bridge.

use thiserror::Error;

/// Failures a bridged session can run into, from resolution to mid-stream.
///
/// Every backend-origin failure is surfaced to the client as a single
/// `connect-error` notification carrying the stable [`kind`](BridgeError::kind)
/// string as its reason. None of these are retried automatically; retry is a
/// new `connect` request from the client.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The requested target identifier is not in the configured allow-list.
    #[error("unknown host: {host}")]
    UnknownHost {
        /// The identifier the client asked for.
        host: String,
    },

    /// The backend transport failed before a session existed
    /// (network, protocol negotiation, or authentication).
    #[error("handshake failure: {0}")]
    HandshakeFailure(String),

    /// The session came up but the shell channel could not be allocated.
    #[error("shell allocation failure: {0}")]
    ShellAllocationFailure(String),

    /// The backend session failed mid-stream.
    #[error("stream fault: {0}")]
    StreamFault(String),

    /// The client tore the connection down. A normal terminal transition,
    /// not a failure; never surfaced as an error notification.
    #[error("client disconnected")]
    ClientDisconnected,

    /// A control frame could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(String),
}

impl BridgeError {
    /// Stable kind string used as the client-visible `reason` field.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::UnknownHost { .. } => "UnknownHost",
            BridgeError::HandshakeFailure(_) => "HandshakeFailure",
            BridgeError::ShellAllocationFailure(_) => "ShellAllocationFailure",
            BridgeError::StreamFault(_) => "StreamFault",
            BridgeError::ClientDisconnected => "ClientDisconnected",
            BridgeError::Malformed(_) => "MalformedMessage",
        }
    }

    /// Whether this variant represents an actual failure rather than a
    /// normal teardown.
    pub fn is_failure(&self) -> bool {
        !matches!(self, BridgeError::ClientDisconnected)
    }
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        let err = BridgeError::UnknownHost {
            host: "h0".to_string(),
        };
        assert_eq!(err.kind(), "UnknownHost");

        assert_eq!(
            BridgeError::HandshakeFailure("auth rejected".into()).kind(),
            "HandshakeFailure"
        );
        assert_eq!(
            BridgeError::ShellAllocationFailure("pty refused".into()).kind(),
            "ShellAllocationFailure"
        );
        assert_eq!(
            BridgeError::StreamFault("connection reset".into()).kind(),
            "StreamFault"
        );
        assert_eq!(BridgeError::ClientDisconnected.kind(), "ClientDisconnected");
    }

    #[test]
    fn test_display_includes_detail() {
        let err = BridgeError::HandshakeFailure("keepalive exceeded".into());
        assert_eq!(err.to_string(), "handshake failure: keepalive exceeded");

        let err = BridgeError::UnknownHost {
            host: "h0".to_string(),
        };
        assert_eq!(err.to_string(), "unknown host: h0");
    }

    #[test]
    fn test_client_disconnect_is_not_a_failure() {
        assert!(!BridgeError::ClientDisconnected.is_failure());
        assert!(BridgeError::StreamFault("eof".into()).is_failure());
        assert!(BridgeError::UnknownHost { host: "x".into() }.is_failure());
    }
}
