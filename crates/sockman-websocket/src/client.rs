//! The client-side WebSocket protocol definition.
//!
//! Identical to the server apart from the CONNECT queue, which sends the
//! upgrade request and reads the response, and from masking every frame it
//! sends.

use std::rc::Rc;

use sockman_core::{
    protocol_unit, CommandSet, ConnectionId, EntryStatus, ProtocolContext, ProtocolQueue,
    ProtocolSet, ProtocolUnits, QueueRole, UnitResult,
};
use tracing::{info, warn};

use crate::codec::{MaskingRole, DEFAULT_MAX_PAYLOAD};
use crate::handshake::{build_request, client_key, find_header_end, parse_response, HandshakeError, MAX_HEADER_BYTES};
use crate::server::handshake_failed;
use crate::session::{CloseFrame, WsScratch};
use crate::units::{self, flush, FrameOptions, FrameStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientQueue {
    Connect,
    Recv,
    Send,
    Close,
    Alive,
}

impl ProtocolQueue for ClientQueue {
    fn for_role(role: QueueRole) -> Option<Self> {
        match role {
            QueueRole::Connect => Some(ClientQueue::Connect),
            QueueRole::Recv => Some(ClientQueue::Recv),
            QueueRole::Send => Some(ClientQueue::Send),
            QueueRole::Close => Some(ClientQueue::Close),
            QueueRole::Alive => Some(ClientQueue::Alive),
            QueueRole::Accept => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientStatus {
    Start,
    Send,
    Recv,
    Length,
    Payload,
    Sending,
    PongCreate,
    PongSending,
    /// Never entered: clients receive unmasked frames.
    Mask,
}

impl EntryStatus for ClientStatus {
    const START: Self = ClientStatus::Start;
}

impl FrameStatus for ClientStatus {
    const LENGTH: Self = ClientStatus::Length;
    const MASK: Self = ClientStatus::Mask;
    const PAYLOAD: Self = ClientStatus::Payload;
    const SENDING: Self = ClientStatus::Sending;
    const RECV: Self = ClientStatus::Recv;
    const PONG_CREATE: Self = ClientStatus::PongCreate;
    const PONG_SENDING: Self = ClientStatus::PongSending;
}

/// Protocol definition of a WebSocket client.
#[derive(Debug)]
pub struct WsClient;

impl ProtocolSet for WsClient {
    type Queue = ClientQueue;
    type Status = ClientStatus;
    type Scratch = WsScratch;
    type CloseParam = CloseFrame;
}

/// Settings of [`client_units`].
#[derive(Clone)]
pub struct ClientOptions {
    /// Server host and port, sent in the `Host` header.
    pub host: String,
    pub port: u16,
    pub max_payload: u64,
    pub on_forced_close: Option<units::ForcedCloseHook>,
}

impl ClientOptions {
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

    pub fn on_forced_close<F>(mut self, hook: F) -> Self
    where
        F: Fn(ConnectionId, Option<u16>) + 'static,
    {
        self.on_forced_close = Some(Rc::new(hook));
        self
    }

    fn frames(&self) -> FrameOptions {
        FrameOptions {
            role: MaskingRole::Client,
            max_payload: self.max_payload,
            on_forced_close: self.on_forced_close.clone(),
        }
    }
}

/// Builds the unit table of the client protocol.
pub fn client_units<C: CommandSet>(options: &ClientOptions) -> ProtocolUnits<WsClient, C> {
    let frames = options.frames();
    let mut table = ProtocolUnits::<WsClient, C>::new();

    let (host, port) = (options.host.clone(), options.port);
    table.add_status_unit(
        ClientQueue::Connect,
        ClientStatus::Start,
        protocol_unit(move |ctx| {
            ctx.set_sending_data(build_request(&host, port, &client_key()))?;
            flush(ctx, ClientStatus::Send, Some(ClientStatus::Recv))
        }),
    );
    table.add_status_unit(
        ClientQueue::Connect,
        ClientStatus::Send,
        protocol_unit(|ctx| flush(ctx, ClientStatus::Send, Some(ClientStatus::Recv))),
    );
    table.add_status_unit(ClientQueue::Connect, ClientStatus::Recv, protocol_unit(connect_read::<C>));

    units::register_receive_units(&mut table, ClientQueue::Recv, ClientStatus::Start, &frames);
    units::register_send_units(&mut table, ClientQueue::Send, &frames);
    units::register_close_units(&mut table, ClientQueue::Close, &frames);
    units::register_alive_units(&mut table, ClientQueue::Alive, &frames);
    table
}

/// Reads the response header block.  Its status is logged, not enforced.
fn connect_read<C: CommandSet>(ctx: &mut ProtocolContext<'_, WsClient, C>) -> UnitResult<Option<ClientStatus>> {
    let Some(chunk) = ctx.recv()? else {
        return Ok(Some(ClientStatus::Recv));
    };
    let cid = ctx.id();
    let scratch = ctx.scratch()?;
    scratch.handshake.extend_from_slice(&chunk);

    let end = match find_header_end(&scratch.handshake) {
        Some(end) if end <= MAX_HEADER_BYTES => end,
        None if scratch.handshake.len() <= MAX_HEADER_BYTES => return Ok(Some(ClientStatus::Recv)),
        _ => return Err(handshake_failed(HandshakeError::TooLarge { limit: MAX_HEADER_BYTES }).into()),
    };
    let rest = scratch.handshake.split_off(end);
    let response = parse_response(&scratch.handshake).map_err(handshake_failed)?;
    scratch.handshake.clear();
    scratch.open = true;

    if response.code == 101 {
        info!(%cid, "websocket handshake complete");
    } else {
        warn!(%cid, code = response.code, "server answered the upgrade without 101");
    }
    if !rest.is_empty() {
        ctx.unread(&rest)?;
    }
    Ok(None)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
