//! # WebShell Protocol Library
//!
//! Message definitions and the error taxonomy for the WebShell session
//! bridge: the channel between a browser-based terminal and the daemon
//! that owns the backend shell sessions.
//!
//! ## Wire format
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Control events (Text frames, JSON)    │  connect / resize / disconnect
//! │                                         │  connect-success / connect-error
//! ├─────────────────────────────────────────┤
//! │   Terminal bytes (Binary frames)        │  verbatim, both directions
//! ├─────────────────────────────────────────┤
//! │          Transport (WebSocket)          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use protocol::{ClientMessage, ServerMessage};
//!
//! let frame = r#"{"type":"connect","host":"web-1","term":"xterm","rows":24,"cols":80}"#;
//! let msg = ClientMessage::from_json(frame).unwrap();
//! assert!(matches!(msg, ClientMessage::Connect { .. }));
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: control message definitions
//! - [`error`]: the bridge error taxonomy

pub mod error;
pub mod messages;

pub use error::{BridgeError, Result};
pub use messages::{ClientMessage, ServerMessage, ViewportDims};
