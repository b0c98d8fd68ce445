//! The reactor loop of the chat server.
//!
//! The reactor is single-threaded and not `Send`, so [`run_server`] builds
//! and drives it inside one blocking task.  The loop stops when `running` is
//! cleared or a tick fails; either way every socket is closed on the way out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use sockman_core::{Reactor, ReactorError};
use sockman_websocket::{server_units, ServerOptions, WsServer};
use tracing::{error, info, warn};

use crate::application::{chat_commands, dispatch, on_emergency, ChatCommands};
use crate::domain::ServerConfig;

pub type ChatReactor = Reactor<WsServer, ChatCommands>;

/// Wires the WebSocket server units, the chat commands and the hooks.
///
/// # Errors
///
/// Fails when the readiness poller cannot be created.
pub fn build_reactor(config: &ServerConfig) -> Result<ChatReactor, ReactorError> {
    let options = ServerOptions::new(config.advertised_host(), config.reactor.port)
        .with_max_payload(config.max_payload)
        .on_forced_close(|cid, code| warn!(%cid, ?code, "peer closed with an unexpected code"));

    Ok(Reactor::new(config.reactor.clone(), server_units(&options))?
        .with_commands(chat_commands())
        .with_dispatcher(dispatch)
        .with_emergency(on_emergency))
}

/// Ticks until `running` is cleared, then closes every socket.
///
/// # Errors
///
/// The first failing tick's error, after the sockets were closed.
pub fn drive(reactor: &mut ChatReactor, running: &AtomicBool) -> Result<(), ReactorError> {
    let result = loop {
        if !running.load(Ordering::Relaxed) {
            break Ok(());
        }
        if let Err(e) = reactor.run_once() {
            error!("tick failed: {e}");
            break Err(e);
        }
    };
    reactor.shutdown_all();
    result
}

/// Listens on the configured address and serves until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the listener cannot be opened or the loop fails.
pub async fn run_server(config: ServerConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut reactor = build_reactor(&config).context("failed to create reactor")?;
        let (host, port) = (&config.reactor.host, config.reactor.port);
        reactor
            .listen(host, port)
            .with_context(|| format!("failed to listen on {host}:{port}"))?;
        info!(addr = ?reactor.local_addr(), "chat server listening");

        drive(&mut reactor, &running).context("reactor loop failed")
    })
    .await
    .context("reactor task panicked")?
}
