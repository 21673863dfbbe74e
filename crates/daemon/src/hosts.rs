//! Target host allow-list and resolution.
//!
//! The daemon only opens backend sessions to hosts the operator has
//! configured. Resolution is a pure, strict-match lookup; an unknown
//! identifier is reported to the orchestrator without any connection
//! attempt.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Connection parameters for one allow-listed target host.
///
/// Loaded from the `[[hosts]]` entries of the configuration file and never
/// mutated afterwards. The request-supplied terminal parameters never
/// override any of these fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// Identifier clients request this host by.
    pub id: String,

    /// Address to connect to (hostname or IP).
    pub address: String,

    /// SSH port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Login user.
    pub username: String,

    /// Password, also used to answer keyboard-interactive prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Path to a private key file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
}

fn default_port() -> u16 {
    22
}

/// Resolves requested target identifiers against the configured allow-list.
#[derive(Debug, Default)]
pub struct HostResolver {
    hosts: Vec<HostConfig>,
}

impl HostResolver {
    /// Creates a resolver over the configured hosts.
    pub fn new(hosts: Vec<HostConfig>) -> Self {
        Self { hosts }
    }

    /// Looks up a host by its exact identifier.
    ///
    /// Pure lookup with no side effects. Returns `None` for identifiers
    /// that are not configured; the caller is responsible for reporting
    /// the failure to the client.
    pub fn resolve(&self, host_id: &str) -> Option<&HostConfig> {
        self.hosts.iter().find(|h| h.id == host_id)
    }

    /// Iterates over all configured hosts.
    pub fn iter(&self) -> impl Iterator<Item = &HostConfig> {
        self.hosts.iter()
    }

    /// Returns the number of configured hosts.
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Returns whether no hosts are configured.
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
