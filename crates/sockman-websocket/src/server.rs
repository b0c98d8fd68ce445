//! The server-side WebSocket protocol definition.
//!
//! | Queue  | Sequence                                                        |
//! |--------|-----------------------------------------------------------------|
//! | ACCEPT | `Start` (read request) → `Create` (build reply) → `Send`        |
//! | RECV   | `Start` → `Length` → `Mask` → `Payload` [→ `PongCreate` → `PongSending`] |
//! | SEND   | `Start` → `Sending`                                             |
//! | CLOSE  | `Start` → `Sending`                                             |
//! | ALIVE  | `Start` → `Sending` → `Recv` → … as RECV                        |

use std::rc::Rc;

use sockman_core::{
    protocol_unit, CommandSet, ConnectionId, EntryStatus, ProtocolContext, ProtocolQueue,
    ProtocolSet, ProtocolUnits, QueueRole, UnitError, UnitErrorCode, UnitResult,
};
use tracing::{debug, info};

use crate::codec::{MaskingRole, DEFAULT_MAX_PAYLOAD};
use crate::handshake::{self, find_header_end, parse_request, HandshakeError, HANDSHAKE_RETRY, MAX_HEADER_BYTES};
use crate::session::{CloseFrame, WsScratch};
use crate::units::{self, flush, FrameOptions, FrameStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerQueue {
    Accept,
    Recv,
    Send,
    Close,
    Alive,
}

impl ProtocolQueue for ServerQueue {
    fn for_role(role: QueueRole) -> Option<Self> {
        match role {
            QueueRole::Accept => Some(ServerQueue::Accept),
            QueueRole::Recv => Some(ServerQueue::Recv),
            QueueRole::Send => Some(ServerQueue::Send),
            QueueRole::Close => Some(ServerQueue::Close),
            QueueRole::Alive => Some(ServerQueue::Alive),
            QueueRole::Connect => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerStatus {
    Start,
    Create,
    Send,
    Length,
    Mask,
    Payload,
    Sending,
    Recv,
    PongCreate,
    PongSending,
}

impl EntryStatus for ServerStatus {
    const START: Self = ServerStatus::Start;
}

impl FrameStatus for ServerStatus {
    const LENGTH: Self = ServerStatus::Length;
    const MASK: Self = ServerStatus::Mask;
    const PAYLOAD: Self = ServerStatus::Payload;
    const SENDING: Self = ServerStatus::Sending;
    const RECV: Self = ServerStatus::Recv;
    const PONG_CREATE: Self = ServerStatus::PongCreate;
    const PONG_SENDING: Self = ServerStatus::PongSending;
}

/// Protocol definition of a WebSocket server.
#[derive(Debug)]
pub struct WsServer;

impl ProtocolSet for WsServer {
    type Queue = ServerQueue;
    type Status = ServerStatus;
    type Scratch = WsScratch;
    type CloseParam = CloseFrame;
}

/// Settings of [`server_units`].
#[derive(Clone)]
pub struct ServerOptions {
    /// Advertised in `WebSocket-Origin` and `WebSocket-Location`.
    pub host: String,
    pub port: u16,
    pub max_payload: u64,
    pub on_forced_close: Option<units::ForcedCloseHook>,
}

impl ServerOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            max_payload: DEFAULT_MAX_PAYLOAD,
            on_forced_close: None,
        }
    }

    pub fn with_max_payload(mut self, max_payload: u64) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Installs a callback run when a peer closes with an unexpected code.
    pub fn on_forced_close<F>(mut self, hook: F) -> Self
    where
        F: Fn(ConnectionId, Option<u16>) + 'static,
    {
        self.on_forced_close = Some(Rc::new(hook));
        self
    }

    fn frames(&self) -> FrameOptions {
        FrameOptions {
            role: MaskingRole::Server,
            max_payload: self.max_payload,
            on_forced_close: self.on_forced_close.clone(),
        }
    }
}

/// Builds the unit table of the server protocol.
pub fn server_units<C: CommandSet>(options: &ServerOptions) -> ProtocolUnits<WsServer, C> {
    let frames = options.frames();
    let mut table = ProtocolUnits::<WsServer, C>::new();

    let (host, port) = (options.host.clone(), options.port);
    table.add_status_unit(ServerQueue::Accept, ServerStatus::Start, protocol_unit(accept_read::<C>));
    table.add_status_unit(
        ServerQueue::Accept,
        ServerStatus::Create,
        protocol_unit(move |ctx| accept_create(ctx, &host, port)),
    );
    table.add_status_unit(ServerQueue::Accept, ServerStatus::Send, protocol_unit(accept_send::<C>));

    units::register_receive_units(&mut table, ServerQueue::Recv, ServerStatus::Start, &frames);
    units::register_send_units(&mut table, ServerQueue::Send, &frames);
    units::register_close_units(&mut table, ServerQueue::Close, &frames);
    units::register_alive_units(&mut table, ServerQueue::Alive, &frames);
    table
}

pub(crate) fn handshake_failed(e: HandshakeError) -> UnitError {
    UnitError::new(UnitErrorCode::HandshakeFail, e.to_string())
}

/// Accumulates the request until the blank line, then parses it.
fn accept_read<C: CommandSet>(ctx: &mut ProtocolContext<'_, WsServer, C>) -> UnitResult<Option<ServerStatus>> {
    let Some(chunk) = ctx.recv()? else {
        return Ok(Some(ServerStatus::Start));
    };
    let scratch = ctx.scratch()?;
    scratch.handshake.extend_from_slice(&chunk);

    let end = match find_header_end(&scratch.handshake) {
        Some(end) if end <= MAX_HEADER_BYTES => end,
        None if scratch.handshake.len() <= MAX_HEADER_BYTES => return Ok(Some(ServerStatus::Start)),
        _ => return Err(handshake_failed(HandshakeError::TooLarge { limit: MAX_HEADER_BYTES }).into()),
    };
    let rest = scratch.handshake.split_off(end);
    let request = parse_request(&scratch.handshake).map_err(handshake_failed)?;
    scratch.handshake.clear();
    scratch.request = Some(request);

    if !rest.is_empty() {
        ctx.unread(&rest)?;
    }
    Ok(Some(ServerStatus::Create))
}

fn accept_create<C: CommandSet>(
    ctx: &mut ProtocolContext<'_, WsServer, C>,
    host: &str,
    port: u16,
) -> UnitResult<Option<ServerStatus>> {
    let scratch = ctx.scratch()?;
    let Some(request) = scratch.request.take() else {
        return Err(UnitError::new(UnitErrorCode::HandshakeFail, "no upgrade request parsed").into());
    };
    let verdict = handshake::answer(&request, host, port);
    let accepted = verdict.is_accept();
    scratch.accepted = accepted;
    if !accepted {
        debug!(cid = %ctx.id(), path = %request.path, "rejecting upgrade request");
    }
    ctx.set_sending_data(verdict.into_bytes())?;
    Ok(Some(ServerStatus::Send))
}

/// Flushes the reply.  An accepted upgrade ends ACCEPT; a rejected one waits
/// for another request until [`HANDSHAKE_RETRY`] rejections.
fn accept_send<C: CommandSet>(ctx: &mut ProtocolContext<'_, WsServer, C>) -> UnitResult<Option<ServerStatus>> {
    if flush(ctx, ServerStatus::Send, None)?.is_some() {
        return Ok(Some(ServerStatus::Send));
    }
    let cid = ctx.id();
    let scratch = ctx.scratch()?;
    if scratch.accepted {
        scratch.open = true;
        scratch.handshake_retry = 0;
        info!(%cid, "websocket handshake complete");
        return Ok(None);
    }

    scratch.handshake_retry += 1;
    if scratch.handshake_retry >= HANDSHAKE_RETRY {
        return Err(UnitError::new(
            UnitErrorCode::HandshakeFail,
            format!("upgrade rejected {} times", scratch.handshake_retry),
        )
        .into());
    }
    Ok(Some(ServerStatus::Start))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use sockman_core::Raw;

    struct NoCommands;

    impl CommandSet for NoCommands {
        type Queue = ServerQueue;
        type Status = ServerStatus;
        type Session = ();
        type Codec = Raw;
    }

    #[test]
    fn test_every_queue_is_registered() {
        let table = server_units::<NoCommands>(&ServerOptions::new("localhost", 10000));

        for queue in [
            ServerQueue::Accept,
            ServerQueue::Recv,
            ServerQueue::Send,
            ServerQueue::Close,
            ServerQueue::Alive,
        ] {
            assert!(table.is_set_queue(queue), "{queue:?} missing");
        }
        assert_eq!(ServerQueue::for_role(QueueRole::Connect), None);
    }

    #[test]
    fn test_alive_queue_carries_full_receive_sequence() {
        let table = server_units::<NoCommands>(&ServerOptions::new("localhost", 10000));

        for status in [
            ServerStatus::Start,
            ServerStatus::Sending,
            ServerStatus::Recv,
            ServerStatus::Length,
            ServerStatus::Mask,
            ServerStatus::Payload,
            ServerStatus::PongCreate,
            ServerStatus::PongSending,
        ] {
            assert!(table.unit(ServerQueue::Alive, status).is_some(), "{status:?} missing");
        }
        assert!(table.unit(ServerQueue::Recv, ServerStatus::Recv).is_none());
    }

    #[test]
    fn test_accept_sequence_has_three_steps() {
        let table = server_units::<NoCommands>(&ServerOptions::new("localhost", 10000));
        assert_eq!(
            table.status_names(ServerQueue::Accept).len(),
            3,
            "Start, Create, Send"
        );
    }
}
