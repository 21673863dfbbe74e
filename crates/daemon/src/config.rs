//! Configuration management for the WebShell daemon.
//!
//! This module provides TOML-based configuration file loading.
//! The default configuration path is `~/.config/webshell/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hosts::HostConfig;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("listen address is not parseable: {0}")]
    InvalidListenAddr(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("connect_timeout_secs must be between 1 and 600, got {0}")]
    InvalidConnectTimeout(u64),

    #[error("host {0} is configured more than once")]
    DuplicateHostId(String),

    #[error("host {0} has port 0")]
    InvalidHostPort(String),

    #[error("host {0} has neither a password nor a key_file")]
    MissingCredentials(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the WebShell daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// WebSocket server configuration.
    pub server: ServerConfig,

    /// SSH transport tuning shared by all hosts.
    pub ssh: SshConfig,

    /// Allow-list of reachable target hosts.
    pub hosts: Vec<HostConfig>,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// WebSocket server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub listen: String,
}

/// SSH transport tuning shared by all hosts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SshConfig {
    /// Handshake + authentication deadline in seconds.
    pub connect_timeout_secs: u64,

    /// Interval between transport keepalive probes in seconds.
    pub keepalive_interval_secs: u64,

    /// Unanswered keepalive probes tolerated before the session is
    /// considered dead.
    pub keepalive_count_max: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8022".to_string(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 20,
            keepalive_interval_secs: 120,
            keepalive_count_max: 10,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("webshell")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - WEBSHELL_LISTEN: Override the WebSocket listen address
    /// - WEBSHELL_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(listen) = std::env::var("WEBSHELL_LISTEN") {
            if !listen.is_empty() {
                tracing::info!("Overriding listen address from environment: {}", listen);
                self.server.listen = listen;
            }
        }

        if let Ok(level) = std::env::var("WEBSHELL_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::InvalidListenAddr(self.server.listen.clone()));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        if self.ssh.connect_timeout_secs < 1 || self.ssh.connect_timeout_secs > 600 {
            return Err(ConfigError::InvalidConnectTimeout(
                self.ssh.connect_timeout_secs,
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for host in &self.hosts {
            if !seen.insert(host.id.as_str()) {
                return Err(ConfigError::DuplicateHostId(host.id.clone()));
            }
            if host.port == 0 {
                return Err(ConfigError::InvalidHostPort(host.id.clone()));
            }
            if host.password.is_none() && host.key_file.is_none() {
                return Err(ConfigError::MissingCredentials(host.id.clone()));
            }
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    ///
    /// The default path is `~/.config/webshell/config.toml`.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn host(id: &str) -> HostConfig {
        HostConfig {
            id: id.to_string(),
            address: "192.168.0.10".to_string(),
            port: 22,
            username: "user".to_string(),
            password: Some("secret".to_string()),
            key_file: None,
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.server.listen, "127.0.0.1:8022");
        assert_eq!(config.ssh.connect_timeout_secs, 20);
        assert_eq!(config.ssh.keepalive_interval_secs, 120);
        assert_eq!(config.ssh.keepalive_count_max, 10);
        assert!(config.hosts.is_empty());
    }

    #[test]
    fn test_from_toml_empty() {
        // Empty TOML should use all defaults
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[daemon]
log_level = "debug"

[server]
listen = "0.0.0.0:9000"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        // Other values should be defaults
        assert_eq!(config.ssh.connect_timeout_secs, 20);
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[daemon]
log_level = "trace"

[server]
listen = "127.0.0.1:8900"

[ssh]
connect_timeout_secs = 10
keepalive_interval_secs = 60
keepalive_count_max = 3

[[hosts]]
id = "web-1"
address = "10.0.0.5"
port = 2222
username = "deploy"
password = "hunter2"

[[hosts]]
id = "db-1"
address = "10.0.0.6"
username = "admin"
key_file = "/etc/webshell/keys/db-1"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.daemon.log_level, "trace");
        assert_eq!(config.server.listen, "127.0.0.1:8900");
        assert_eq!(config.ssh.connect_timeout_secs, 10);
        assert_eq!(config.ssh.keepalive_interval_secs, 60);
        assert_eq!(config.ssh.keepalive_count_max, 3);

        assert_eq!(config.hosts.len(), 2);
        assert_eq!(config.hosts[0].id, "web-1");
        assert_eq!(config.hosts[0].port, 2222);
        assert_eq!(config.hosts[1].id, "db-1");
        // Port defaults to 22 when omitted
        assert_eq!(config.hosts[1].port, 22);
        assert_eq!(
            config.hosts[1].key_file,
            Some(PathBuf::from("/etc/webshell/keys/db-1"))
        );
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let toml = r#"
[daemon
log_level = "debug"
"#;
        let result = Config::from_toml(toml);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_roundtrip() {
        let mut original = Config::default();
        original.daemon.log_level = "warn".to_string();
        original.hosts.push(host("web-1"));

        let toml = original.to_toml().unwrap();
        let loaded = Config::from_toml(&toml).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        fs::write(
            &config_path,
            r#"
[server]
listen = "127.0.0.1:8123"
"#,
        )
        .unwrap();

        let config = Config::load(&config_path).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:8123");
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        fs::write(&config_path, "invalid [ toml").unwrap();

        let result = Config::load(&config_path);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("webshell"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_listen_addr() {
        let mut config = Config::default();
        config.server.listen = "not-an-address".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidListenAddr("not-an-address".to_string()))
        );

        config.server.listen = "0.0.0.0:8022".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();

        for level in ["trace", "debug", "info", "warn", "error", "WARN", "Info"] {
            config.daemon.log_level = level.to_string();
            assert!(config.validate().is_ok(), "level {} should be valid", level);
        }

        config.daemon.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    fn test_validate_connect_timeout_bounds() {
        let mut config = Config::default();

        config.ssh.connect_timeout_secs = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidConnectTimeout(0))
        );

        config.ssh.connect_timeout_secs = 601;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidConnectTimeout(601))
        );

        config.ssh.connect_timeout_secs = 1;
        assert!(config.validate().is_ok());

        config.ssh.connect_timeout_secs = 600;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_duplicate_host_id() {
        let mut config = Config::default();
        config.hosts.push(host("web-1"));
        config.hosts.push(host("web-1"));

        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateHostId("web-1".to_string()))
        );
    }

    #[test]
    fn test_validate_host_port_zero() {
        let mut config = Config::default();
        let mut bad = host("web-1");
        bad.port = 0;
        config.hosts.push(bad);

        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidHostPort("web-1".to_string()))
        );
    }

    #[test]
    fn test_validate_missing_credentials() {
        let mut config = Config::default();
        let mut bad = host("web-1");
        bad.password = None;
        bad.key_file = None;
        config.hosts.push(bad);

        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingCredentials("web-1".to_string()))
        );
    }

    #[test]
    fn test_validate_key_file_only_is_sufficient() {
        let mut config = Config::default();
        let mut key_only = host("web-1");
        key_only.password = None;
        key_only.key_file = Some(PathBuf::from("/etc/webshell/keys/web-1"));
        config.hosts.push(key_only);

        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial_test::serial]
    fn test_env_override_listen() {
        std::env::set_var("WEBSHELL_LISTEN", "0.0.0.0:9999");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.server.listen, "0.0.0.0:9999");

        std::env::remove_var("WEBSHELL_LISTEN");
    }

    #[test]
    #[serial_test::serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("WEBSHELL_LISTEN", "");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.server.listen, "127.0.0.1:8022");

        std::env::remove_var("WEBSHELL_LISTEN");
    }

    #[test]
    #[serial_test::serial]
    fn test_env_override_log_level() {
        std::env::remove_var("WEBSHELL_LISTEN");
        std::env::set_var("WEBSHELL_LOG_LEVEL", "debug");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.daemon.log_level, "debug");

        std::env::remove_var("WEBSHELL_LOG_LEVEL");
    }
}
