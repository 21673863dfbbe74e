//! Control messages for the browser↔daemon WebSocket channel.
//!
//! Control events travel as Text frames carrying a kebab-case `type`-tagged
//! JSON object; terminal bytes travel as Binary frames in both directions,
//! verbatim. Field names are camelCase on the wire to match the browser
//! client.

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Viewport dimensions reported by the terminal widget.
///
/// Rows/cols size the remote pseudo-terminal; the pixel dimensions are
/// forwarded opportunistically and may be zero when the widget does not
/// report them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportDims {
    /// Terminal height in rows.
    pub rows: u16,
    /// Terminal width in columns.
    pub cols: u16,
    /// Viewport width in pixels, if known.
    #[serde(rename = "pixelWidth", default)]
    pub pixel_width: u32,
    /// Viewport height in pixels, if known.
    #[serde(rename = "pixelHeight", default)]
    pub pixel_height: u32,
}

impl ViewportDims {
    /// Dimensions with no pixel information.
    pub fn cells(rows: u16, cols: u16) -> Self {
        Self {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// Control events sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Request to open a session on an allow-listed host.
    ///
    /// `term`, `rows` and `cols` size the remote shell allocation only;
    /// they never override host connection parameters.
    Connect {
        /// Target identifier to resolve against the allow-list.
        host: String,
        /// Terminal type to request, e.g. `xterm-256color`.
        term: String,
        /// Initial terminal height in rows.
        rows: u16,
        /// Initial terminal width in columns.
        cols: u16,
    },

    /// Viewport change notification.
    Resize {
        /// The new viewport dimensions.
        #[serde(flatten)]
        dims: ViewportDims,
    },

    /// Explicit teardown request.
    Disconnect,
}

/// Control events sent by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// The shell is ready; terminal bytes follow as Binary frames.
    ConnectSuccess {
        /// Opaque identity correlating this client connection to its
        /// backend session.
        #[serde(rename = "connectionId")]
        connection_id: String,
    },

    /// Resolution, handshake, shell-allocation or mid-stream failure.
    ConnectError {
        /// Stable failure kind, e.g. `UnknownHost`.
        reason: String,
        /// Human-readable detail passed through from the backend.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl ClientMessage {
    /// Decode a control frame.
    pub fn from_json(text: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(text).map_err(|e| BridgeError::Malformed(e.to_string()))
    }

    /// Encode for a Text frame.
    pub fn to_json(&self) -> Result<String, BridgeError> {
        serde_json::to_string(self).map_err(|e| BridgeError::Malformed(e.to_string()))
    }
}

impl ServerMessage {
    /// Decode a control frame.
    pub fn from_json(text: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(text).map_err(|e| BridgeError::Malformed(e.to_string()))
    }

    /// Encode for a Text frame.
    pub fn to_json(&self) -> Result<String, BridgeError> {
        serde_json::to_string(self).map_err(|e| BridgeError::Malformed(e.to_string()))
    }

    /// Build the failure notification for a bridge error.
    pub fn connect_error(err: &BridgeError) -> Self {
        ServerMessage::ConnectError {
            reason: err.kind().to_string(),
            message: Some(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_roundtrip() {
        let msg = ClientMessage::Connect {
            host: "web-1".to_string(),
            term: "xterm".to_string(),
            rows: 24,
            cols: 80,
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"connect""#));

        let decoded = ClientMessage::from_json(&json).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_connect_wire_format() {
        let json = r#"{"type":"connect","host":"web-1","term":"xterm","rows":24,"cols":80}"#;
        let msg = ClientMessage::from_json(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Connect {
                host: "web-1".to_string(),
                term: "xterm".to_string(),
                rows: 24,
                cols: 80,
            }
        );
    }

    #[test]
    fn test_resize_uses_camel_case_pixel_fields() {
        let json =
            r#"{"type":"resize","rows":50,"cols":120,"pixelWidth":960,"pixelHeight":600}"#;
        let msg = ClientMessage::from_json(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Resize {
                dims: ViewportDims {
                    rows: 50,
                    cols: 120,
                    pixel_width: 960,
                    pixel_height: 600,
                }
            }
        );
    }

    #[test]
    fn test_resize_pixel_fields_default_to_zero() {
        let json = r#"{"type":"resize","rows":50,"cols":120}"#;
        let msg = ClientMessage::from_json(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Resize {
                dims: ViewportDims::cells(50, 120),
            }
        );
    }

    #[test]
    fn test_disconnect_is_tag_only() {
        let msg = ClientMessage::Disconnect;
        assert_eq!(msg.to_json().unwrap(), r#"{"type":"disconnect"}"#);

        let decoded = ClientMessage::from_json(r#"{"type":"disconnect"}"#).unwrap();
        assert_eq!(decoded, ClientMessage::Disconnect);
    }

    #[test]
    fn test_connect_success_wire_format() {
        let msg = ServerMessage::ConnectSuccess {
            connection_id: "abc-123".to_string(),
        };
        assert_eq!(
            msg.to_json().unwrap(),
            r#"{"type":"connect-success","connectionId":"abc-123"}"#
        );
    }

    #[test]
    fn test_connect_error_from_bridge_error() {
        let err = BridgeError::UnknownHost {
            host: "h0".to_string(),
        };
        let msg = ServerMessage::connect_error(&err);
        match &msg {
            ServerMessage::ConnectError { reason, message } => {
                assert_eq!(reason, "UnknownHost");
                assert_eq!(message.as_deref(), Some("unknown host: h0"));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"connect-error""#));
        assert!(json.contains(r#""reason":"UnknownHost""#));
    }

    #[test]
    fn test_connect_error_message_is_optional() {
        let json = r#"{"type":"connect-error","reason":"StreamFault"}"#;
        let msg = ServerMessage::from_json(json).unwrap();
        assert_eq!(
            msg,
            ServerMessage::ConnectError {
                reason: "StreamFault".to_string(),
                message: None,
            }
        );
    }

    #[test]
    fn test_malformed_control_frame_is_rejected() {
        let result = ClientMessage::from_json(r#"{"type":"warp-drive"}"#);
        assert!(matches!(result, Err(BridgeError::Malformed(_))));

        let result = ClientMessage::from_json("not json at all");
        assert!(matches!(result, Err(BridgeError::Malformed(_))));
    }
}
