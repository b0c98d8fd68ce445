//! sockman console client: entry point.
//!
//! ```text
//! sockman-client [OPTIONS]
//!
//! Options:
//!   --config <PATH>         TOML config file
//!   --host <HOST>           Server host [config default: 127.0.0.1]
//!   --port <PORT>           Server port [config default: 10000]
//!   --retry <N>             Connection attempts [config default: 3]
//!   --user <NAME>           Enter the chat under this name
//!   --message <TEXT>        Chat message to send; repeatable
//! ```
//!
//! Received events are logged at `info`.  Ctrl+C closes the connection with
//! code 1000 and exits.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sockman_client::domain::{entrance_request, message_request, ClientConfig};
use sockman_client::infrastructure::run_client;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Console chat client for sockman-server.
#[derive(Debug, Parser)]
#[command(name = "sockman-client", about = "WebSocket chat client on the sockman reactor", version)]
struct Cli {
    #[arg(long, env = "SOCKMAN_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "SOCKMAN_HOST")]
    host: Option<String>,

    #[arg(long, env = "SOCKMAN_PORT")]
    port: Option<u16>,

    #[arg(long, env = "SOCKMAN_RETRY")]
    retry: Option<u32>,

    /// Sends an `entrance` request with this name before any message.
    #[arg(long)]
    user: Option<String>,

    /// Sends a `message` request; may be given several times.
    #[arg(long = "message")]
    messages: Vec<String>,
}

impl Cli {
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed.
    fn into_client_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)
                .with_context(|| format!("failed to load config '{}'", path.display()))?,
            None => ClientConfig::default(),
        };
        if let Some(host) = &self.host {
            config.reactor.host = host.clone();
        }
        if let Some(port) = self.port {
            config.reactor.port = port;
        }
        if let Some(retry) = self.retry {
            config.retry = retry;
        }
        Ok(config)
    }

    /// The requests to queue right after connecting, in order.
    fn requests(&self) -> Vec<Value> {
        self.user
            .iter()
            .map(|user| entrance_request(user))
            .chain(self.messages.iter().map(|text| message_request(text)))
            .collect()
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli.into_client_config()?;
    let requests = cli.requests();
    info!(
        "sockman client connecting to {}:{}",
        config.reactor.host, config.reactor.port
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, closing");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    run_client(config, requests, running).await?;
    info!("sockman client stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
