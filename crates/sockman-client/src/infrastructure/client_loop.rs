//! The reactor loop of the console client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use sockman_core::{ConnectionId, Reactor, ReactorError, TransportKind};
use sockman_websocket::{client_units, ClientOptions, CloseFrame, WsClient};
use tracing::{error, info, warn};

use crate::application::{console_commands, dispatch, on_emergency, ConsoleCommands};
use crate::domain::ClientConfig;

pub type ConsoleReactor = Reactor<WsClient, ConsoleCommands>;

/// Ticks granted to the close handshake on shutdown.
const CLOSE_TICKS: usize = 1000;

/// # Errors
///
/// Fails when the readiness poller cannot be created.
pub fn build_reactor(config: &ClientConfig) -> Result<ConsoleReactor, ReactorError> {
    let options = ClientOptions::new(&config.reactor.host, config.reactor.port)
        .with_max_payload(config.max_payload)
        .on_forced_close(|cid, code| warn!(%cid, ?code, "server closed with an unexpected code"));

    Ok(Reactor::new(config.reactor.clone(), client_units(&options))?
        .with_commands(console_commands())
        .with_dispatcher(dispatch)
        .with_emergency(on_emergency))
}

/// Connects over TCP with the configured retries and starts the handshake.
///
/// # Errors
///
/// [`ReactorError::Resolve`] or [`ReactorError::Connect`].
pub fn connect(reactor: &mut ConsoleReactor, config: &ClientConfig) -> Result<ConnectionId, ReactorError> {
    reactor.connect(
        &config.reactor.host,
        config.reactor.port,
        TransportKind::Tcp,
        config.retry,
        config.retry_interval(),
    )
}

/// Ticks until `running` is cleared or the server goes away.  A stop request
/// starts a normal close first; every socket is closed on the way out.
///
/// # Errors
///
/// The first failing tick's error.
pub fn drive(reactor: &mut ConsoleReactor, cid: ConnectionId, running: &AtomicBool) -> Result<(), ReactorError> {
    let result = loop {
        if !running.load(Ordering::Relaxed) || reactor.client_count() == 0 {
            break Ok(());
        }
        if let Err(e) = reactor.run_once() {
            error!("tick failed: {e}");
            break Err(e);
        }
    };

    if result.is_ok() && reactor.close(cid, CloseFrame::normal()) {
        for _ in 0..CLOSE_TICKS {
            if reactor.client_count() == 0 || reactor.run_once().is_err() {
                break;
            }
        }
    }
    reactor.shutdown_all();
    result
}

/// Connects, queues `requests`, then runs until stopped.
///
/// # Errors
///
/// Returns an error if the connection cannot be made or the loop fails.
pub async fn run_client(config: ClientConfig, requests: Vec<Value>, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut reactor = build_reactor(&config).context("failed to create reactor")?;
        let cid = connect(&mut reactor, &config).with_context(|| {
            format!("failed to connect to {}:{}", config.reactor.host, config.reactor.port)
        })?;
        info!(%cid, "connected");

        for request in &requests {
            reactor
                .send(cid, request)
                .with_context(|| format!("failed to queue {request}"))?;
        }
        drive(&mut reactor, cid, &running).context("reactor loop failed")
    })
    .await
    .context("reactor task panicked")?
}
