//! # WebShell Daemon Library
//!
//! This crate provides the daemon (server) functionality for WebShell,
//! bridging browser-based terminals to interactive SSH shell sessions.
//!
//! ## Overview
//!
//! The daemon accepts WebSocket connections from browser terminals and,
//! per connection, owns at most one backend SSH session:
//!
//! - **Host Resolver**: strict allow-list lookup of configured targets
//! - **Session Bridge**: the per-connection state machine relaying
//!   terminal I/O and resize events with exactly-once cleanup
//! - **Backend Session Handles**: ownership wrappers around live SSH
//!   sessions with idempotent teardown
//! - **Session Registry**: the process-wide identity → session map
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Bridge Server                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   browser ──ws──▶ ┌───────────────┐      ┌──────────────────┐  │
//! │                   │ Session Bridge │─────▶│ SSH Session      │  │
//! │   browser ──ws──▶ │ (one per conn) │      │ Handle (russh)   │  │
//! │                   └───────┬───────┘      └──────────────────┘  │
//! │                           │                                     │
//! │      ┌──────────────┐  ┌──┴───────────┐                        │
//! │      │ Host Resolver │  │   Session    │                        │
//! │      │ (allow-list)  │  │   Registry   │                        │
//! │      └──────────────┘  └──────────────┘                        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::config::Config;
//! use daemon::hosts::HostResolver;
//! use daemon::server::BridgeServer;
//! use daemon::session::SshConnector;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     config.validate()?;
//!
//!     let resolver = HostResolver::new(config.hosts.clone());
//!     let connector = SshConnector::new(config.ssh);
//!
//!     let server = BridgeServer::bind(&config.server.listen, resolver, connector).await?;
//!     server.run().await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: configuration loading and validation
//! - [`hosts`]: the target allow-list and resolver
//! - [`session`]: backend session handles and the registry
//! - [`bridge`]: the per-connection state machine
//! - [`resize`]: viewport resize coordination
//! - [`server`]: the WebSocket front-end

pub mod bridge;
pub mod config;
pub mod hosts;
pub mod resize;
pub mod server;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export host types for convenience
pub use hosts::{HostConfig, HostResolver};

// Re-export session types for convenience
pub use session::{
    ConnectionId, HandleStatus, SessionEvent, SessionHandle, SessionRegistry, ShellConnector,
    ShellRequest, SshConnector, SshSession,
};

// Re-export bridge types for convenience
pub use bridge::{ClientInput, Outbound, Phase, SessionBridge};

// Re-export resize types for convenience
pub use resize::ResizeCoordinator;

// Re-export server types for convenience
pub use server::BridgeServer;
