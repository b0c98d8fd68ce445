//! sockman chat server: entry point.
//!
//! # Usage
//!
//! ```text
//! sockman-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>             TOML config file
//!   --host <HOST>               Listen host [config default: 127.0.0.1]
//!   --port <PORT>               Listen port [config default: 10000]
//!   --max-connections <N>       Connection ceiling [config default: 10]
//!   --alive-interval <SECS>     Keepalive interval, 0 disables [config default: 3600]
//!   --advertised-host <HOST>    Host named in the handshake reply
//! ```
//!
//! Every option can also come from a `SOCKMAN_*` environment variable.
//! Command-line values override the config file, which overrides defaults.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sockman_server::domain::ServerConfig;
use sockman_server::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// JSON chat server over WebSocket.
#[derive(Debug, Parser)]
#[command(name = "sockman-server", about = "WebSocket chat server on the sockman reactor", version)]
struct Cli {
    /// TOML config file; a missing file means defaults.
    #[arg(long, env = "SOCKMAN_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "SOCKMAN_HOST")]
    host: Option<String>,

    #[arg(long, env = "SOCKMAN_PORT")]
    port: Option<u16>,

    #[arg(long, env = "SOCKMAN_MAX_CONNECTIONS")]
    max_connections: Option<usize>,

    /// Seconds of silence before a ping is sent; 0 disables keepalive.
    #[arg(long, env = "SOCKMAN_ALIVE_INTERVAL")]
    alive_interval: Option<u64>,

    #[arg(long, env = "SOCKMAN_ADVERTISED_HOST")]
    advertised_host: Option<String>,
}

impl Cli {
    /// Loads the config file (if any) and applies the overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed.
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("failed to load config '{}'", path.display()))?,
            None => ServerConfig::default(),
        };
        if let Some(host) = self.host {
            config.reactor.host = host;
        }
        if let Some(port) = self.port {
            config.reactor.port = port;
        }
        if let Some(max) = self.max_connections {
            config.reactor.max_connections = max;
        }
        if let Some(secs) = self.alive_interval {
            config.reactor.alive_interval_secs = secs;
        }
        if self.advertised_host.is_some() {
            config.advertised_host = self.advertised_host;
        }
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Cli::parse().into_server_config()?;
    info!(
        "sockman chat server starting: {}:{} (max {} connections)",
        config.reactor.host, config.reactor.port, config.reactor.max_connections
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    run_server(config, running).await?;
    info!("sockman chat server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_arguments_yield_default_config() {
        // Arrange
        let cli = Cli::parse_from(["sockman-server"]);

        // Act
        let config = cli.into_server_config().unwrap();

        // Assert
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_port_and_host_override() {
        let cli = Cli::parse_from(["sockman-server", "--host", "0.0.0.0", "--port", "9999"]);
        let config = cli.into_server_config().unwrap();
        assert_eq!(config.reactor.host, "0.0.0.0");
        assert_eq!(config.reactor.port, 9999);
    }

    #[test]
    fn test_alive_interval_zero_disables_keepalive() {
        let cli = Cli::parse_from(["sockman-server", "--alive-interval", "0"]);
        let config = cli.into_server_config().unwrap();
        assert_eq!(config.reactor.alive_interval_secs, 0);
    }

    #[test]
    fn test_advertised_host_override() {
        let cli = Cli::parse_from(["sockman-server", "--advertised-host", "chat.example.com"]);
        let config = cli.into_server_config().unwrap();
        assert_eq!(config.advertised_host(), "chat.example.com");
    }

    #[test]
    fn test_invalid_port_is_rejected_by_parser() {
        let result = Cli::try_parse_from(["sockman-server", "--port", "70000"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_config_file_falls_back_to_defaults() {
        let cli = Cli::parse_from(["sockman-server", "--config", "/nonexistent/sockman.toml", "--max-connections", "3"]);
        let config = cli.into_server_config().unwrap();
        assert_eq!(config.reactor.max_connections, 3);
        assert_eq!(config.reactor.port, 10000);
    }
}
