//! WebShell Daemon
//!
//! Bridges browser terminals to SSH shell sessions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use daemon::config::{default_config_path, Config};
use daemon::hosts::HostResolver;
use daemon::server::BridgeServer;
use daemon::session::SshConnector;

/// WebShell Daemon - bridges browser terminals to SSH shell sessions.
#[derive(Parser, Debug)]
#[command(name = "webshell-daemon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the WebShell daemon
    Start {
        /// Override the WebSocket listen address
        #[arg(long, value_name = "ADDR")]
        listen: Option<String>,
    },

    /// Load and validate the configuration, then exit
    CheckConfig,

    /// List configured hosts (credentials are never printed)
    Hosts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;
    config.apply_env_overrides();

    // Initialize tracing
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.clone()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Start { listen } => {
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            config
                .validate()
                .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

            if config.hosts.is_empty() {
                tracing::warn!("No hosts configured; every connect request will fail");
            }

            tracing::info!("WebShell daemon starting...");

            let resolver = HostResolver::new(config.hosts.clone());
            let connector = SshConnector::new(config.ssh);
            let server = BridgeServer::bind(&config.server.listen, resolver, connector).await?;

            let shutdown = server.shutdown_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Ctrl-C received, shutting down");
                    shutdown.cancel();
                }
            });

            server.run().await
        }

        Commands::CheckConfig => {
            config
                .validate()
                .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
            println!(
                "{}: OK ({} host{})",
                config_path.display(),
                config.hosts.len(),
                if config.hosts.len() == 1 { "" } else { "s" }
            );
            Ok(())
        }

        Commands::Hosts => {
            if config.hosts.is_empty() {
                println!("No hosts configured");
            }
            for host in &config.hosts {
                println!("{}  {}@{}:{}", host.id, host.username, host.address, host.port);
            }
            Ok(())
        }
    }
}
