//! Status units shared by the server and client definitions.
//!
//! Both roles receive, send, close and ping in the same way; only the
//! [`MaskingRole`] differs.  The functions here register those units on any
//! protocol definition whose scratch is [`WsScratch`], whose close payload is
//! [`CloseFrame`] and whose status enum implements [`FrameStatus`].
//!
//! # Receive sequence
//!
//! ```text
//! start ─2 B─► LENGTH ─2|8 B─► MASK ─4 B─► PAYLOAD ─► close / pong / ping / data
//!   │            (skipped when the length fits in 7 bits, MASK skipped for clients)
//!   └── nothing for RECEIVE_EMPTY_RETRY ticks ─► alive_check(10 s)
//! ```

use std::rc::Rc;

use sockman_core::{
    protocol_unit, CommandSet, ConnectionId, EntryStatus, Flush, Halt, ProtocolContext,
    ProtocolSet, ProtocolUnits, UnitError, UnitErrorCode, UnitResult,
};
use tracing::{debug, warn};

use crate::codec::{
    apply_mask, check_length, close_code, close_payload, decode_extended_length, encode_frame,
    FrameError, FrameHead, MaskingRole, Opcode,
};
use crate::handshake::{RECEIVE_EMPTY_ALIVE_TIMEOUT, RECEIVE_EMPTY_RETRY};
use crate::session::{CloseFrame, FrameInProgress, Fragments, WsScratch};

/// Status constants the shared units move between.
pub trait FrameStatus: EntryStatus {
    const LENGTH: Self;
    const MASK: Self;
    const PAYLOAD: Self;
    const SENDING: Self;
    /// Receive start inside the ALIVE queue.
    const RECV: Self;
    const PONG_CREATE: Self;
    const PONG_SENDING: Self;
}

/// Called with the connection and the received code when the peer closes
/// with a code other than the one we asked for.
pub type ForcedCloseHook = Rc<dyn Fn(ConnectionId, Option<u16>)>;

/// Settings captured by the frame units.
#[derive(Clone)]
pub struct FrameOptions {
    pub role: MaskingRole,
    pub max_payload: u64,
    pub on_forced_close: Option<ForcedCloseHook>,
}

fn malformed(e: FrameError) -> Halt {
    Halt::Failed(UnitError::new(UnitErrorCode::MalformedFrame, e.to_string()))
}

/// Maps a flush result to the pending or the done status.
pub(crate) fn flush<P, C>(
    ctx: &mut ProtocolContext<'_, P, C>,
    pending: P::Status,
    done: Option<P::Status>,
) -> UnitResult<Option<P::Status>>
where
    P: ProtocolSet,
    C: CommandSet,
{
    match ctx.sending()? {
        Flush::Done => Ok(done),
        Flush::Pending => Ok(Some(pending)),
    }
}

// ── Registration ──────────────────────────────────────────────────────────────

/// Registers the frame receive sequence on `queue`, entered at `start`.
pub fn register_receive_units<P, C>(
    units: &mut ProtocolUnits<P, C>,
    queue: P::Queue,
    start: P::Status,
    options: &FrameOptions,
) where
    P: ProtocolSet<Scratch = WsScratch, CloseParam = CloseFrame>,
    P::Status: FrameStatus,
    C: CommandSet,
{
    let o = options.clone();
    units.add_status_unit(queue, start, protocol_unit(move |ctx| receive_head(ctx, &o, start)));
    let o = options.clone();
    units.add_status_unit(queue, P::Status::LENGTH, protocol_unit(move |ctx| receive_length(ctx, &o)));
    units.add_status_unit(queue, P::Status::MASK, protocol_unit(|ctx| receive_mask(ctx)));
    let o = options.clone();
    units.add_status_unit(queue, P::Status::PAYLOAD, protocol_unit(move |ctx| receive_payload(ctx, &o)));
    let role = options.role;
    units.add_status_unit(
        queue,
        P::Status::PONG_CREATE,
        protocol_unit(move |ctx: &mut ProtocolContext<'_, P, C>| {
            let ping = std::mem::take(&mut ctx.scratch()?.pong);
            ctx.set_sending_data(encode_frame(Opcode::Pong, &ping, role.outbound_key()))?;
            Ok(Some(P::Status::PONG_SENDING))
        }),
    );
    units.add_status_unit(
        queue,
        P::Status::PONG_SENDING,
        protocol_unit(|ctx| flush(ctx, P::Status::PONG_SENDING, None)),
    );
}

/// Registers SEND: the pickup payload goes out as one FIN text frame.
pub fn register_send_units<P, C>(units: &mut ProtocolUnits<P, C>, queue: P::Queue, options: &FrameOptions)
where
    P: ProtocolSet<Scratch = WsScratch, CloseParam = CloseFrame>,
    P::Status: FrameStatus,
    C: CommandSet,
{
    let role = options.role;
    units.add_status_unit(
        queue,
        P::Status::START,
        protocol_unit(move |ctx| {
            let Some(payload) = ctx.take_send_pickup() else {
                return Err(UnitError::new(UnitErrorCode::SendingDataSetFail, "no payload picked up").into());
            };
            ctx.set_sending_data(encode_frame(Opcode::Text, &payload, role.outbound_key()))?;
            Ok(Some(P::Status::SENDING))
        }),
    );
    units.add_status_unit(
        queue,
        P::Status::SENDING,
        protocol_unit(|ctx| flush(ctx, P::Status::SENDING, None)),
    );
}

/// Registers CLOSE: sends the registered code and reason, then waits idle
/// for the peer's answer.
pub fn register_close_units<P, C>(units: &mut ProtocolUnits<P, C>, queue: P::Queue, options: &FrameOptions)
where
    P: ProtocolSet<Scratch = WsScratch, CloseParam = CloseFrame>,
    P::Status: FrameStatus,
    C: CommandSet,
{
    let role = options.role;
    units.add_status_unit(
        queue,
        P::Status::START,
        protocol_unit(move |ctx: &mut ProtocolContext<'_, P, C>| {
            let Some(close) = ctx.close_param().cloned() else {
                return Err(UnitError::new(UnitErrorCode::CloseFail, "close requested without a close frame").into());
            };
            let payload = close_payload(close.code, &close.reason);
            ctx.set_sending_data(encode_frame(Opcode::Close, &payload, role.outbound_key()))?;
            Ok(Some(P::Status::SENDING))
        }),
    );
    units.add_status_unit(
        queue,
        P::Status::SENDING,
        protocol_unit(|ctx| flush(ctx, P::Status::SENDING, None)),
    );
}

/// Registers ALIVE: a ping carrying the connection id, then the receive
/// sequence entered at [`FrameStatus::RECV`].
pub fn register_alive_units<P, C>(units: &mut ProtocolUnits<P, C>, queue: P::Queue, options: &FrameOptions)
where
    P: ProtocolSet<Scratch = WsScratch, CloseParam = CloseFrame>,
    P::Status: FrameStatus,
    C: CommandSet,
{
    let role = options.role;
    units.add_status_unit(
        queue,
        P::Status::START,
        protocol_unit(move |ctx| {
            let payload = ctx.id().to_string().into_bytes();
            ctx.set_sending_data(encode_frame(Opcode::Ping, &payload, role.outbound_key()))?;
            Ok(Some(P::Status::SENDING))
        }),
    );
    units.add_status_unit(
        queue,
        P::Status::SENDING,
        protocol_unit(|ctx| flush(ctx, P::Status::SENDING, Some(P::Status::RECV))),
    );
    register_receive_units(units, queue, P::Status::RECV, options);
}

// ── Receive steps ─────────────────────────────────────────────────────────────

fn receive_head<P, C>(
    ctx: &mut ProtocolContext<'_, P, C>,
    options: &FrameOptions,
    stay: P::Status,
) -> UnitResult<Option<P::Status>>
where
    P: ProtocolSet<Scratch = WsScratch, CloseParam = CloseFrame>,
    P::Status: FrameStatus,
    C: CommandSet,
{
    if !ctx.is_receiving() {
        ctx.set_receiving_size(2)?;
    }
    let Some(bytes) = ctx.receiving()? else {
        let scratch = ctx.scratch()?;
        scratch.recv_retry += 1;
        if scratch.recv_retry < RECEIVE_EMPTY_RETRY {
            return Ok(Some(stay));
        }
        scratch.recv_retry = 0;
        debug!(cid = %ctx.id(), "frame header overdue, checking liveness");
        return Err(ctx.alive_check(RECEIVE_EMPTY_ALIVE_TIMEOUT));
    };

    let head = FrameHead::parse([bytes[0], bytes[1]], options.role).map_err(malformed)?;
    let scratch = ctx.scratch()?;
    scratch.recv_retry = 0;
    scratch.frame = FrameInProgress {
        head: Some(head),
        length: u64::from(head.length_code),
        mask: None,
    };
    match head.extended_length_size() {
        0 => after_length(ctx, options),
        size => {
            ctx.set_receiving_size(size)?;
            Ok(Some(P::Status::LENGTH))
        }
    }
}

fn receive_length<P, C>(ctx: &mut ProtocolContext<'_, P, C>, options: &FrameOptions) -> UnitResult<Option<P::Status>>
where
    P: ProtocolSet<Scratch = WsScratch, CloseParam = CloseFrame>,
    P::Status: FrameStatus,
    C: CommandSet,
{
    let Some(bytes) = ctx.receiving()? else {
        return Ok(Some(P::Status::LENGTH));
    };
    ctx.scratch()?.frame.length = decode_extended_length(&bytes).map_err(malformed)?;
    after_length(ctx, options)
}

fn after_length<P, C>(ctx: &mut ProtocolContext<'_, P, C>, options: &FrameOptions) -> UnitResult<Option<P::Status>>
where
    P: ProtocolSet<Scratch = WsScratch, CloseParam = CloseFrame>,
    P::Status: FrameStatus,
    C: CommandSet,
{
    let length = ctx.scratch()?.frame.length;
    check_length(length, options.max_payload).map_err(malformed)?;
    if options.role.expects_masked_inbound() {
        ctx.set_receiving_size(4)?;
        return Ok(Some(P::Status::MASK));
    }
    begin_payload(ctx, length)
}

fn receive_mask<P, C>(ctx: &mut ProtocolContext<'_, P, C>) -> UnitResult<Option<P::Status>>
where
    P: ProtocolSet<Scratch = WsScratch, CloseParam = CloseFrame>,
    P::Status: FrameStatus,
    C: CommandSet,
{
    let Some(bytes) = ctx.receiving()? else {
        return Ok(Some(P::Status::MASK));
    };
    let scratch = ctx.scratch()?;
    scratch.frame.mask = Some([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let length = scratch.frame.length;
    begin_payload(ctx, length)
}

fn begin_payload<P, C>(ctx: &mut ProtocolContext<'_, P, C>, length: u64) -> UnitResult<Option<P::Status>>
where
    P: ProtocolSet<Scratch = WsScratch, CloseParam = CloseFrame>,
    P::Status: FrameStatus,
    C: CommandSet,
{
    let size = usize::try_from(length).map_err(|_| {
        malformed(FrameError::PayloadTooLarge {
            length,
            max: usize::MAX as u64,
        })
    })?;
    ctx.set_receiving_size(size)?;
    Ok(Some(P::Status::PAYLOAD))
}

fn receive_payload<P, C>(ctx: &mut ProtocolContext<'_, P, C>, options: &FrameOptions) -> UnitResult<Option<P::Status>>
where
    P: ProtocolSet<Scratch = WsScratch, CloseParam = CloseFrame>,
    P::Status: FrameStatus,
    C: CommandSet,
{
    let Some(mut payload) = ctx.receiving()? else {
        return Ok(Some(P::Status::PAYLOAD));
    };
    let frame = std::mem::take(&mut ctx.scratch()?.frame);
    let Some(head) = frame.head else {
        return Err(UnitError::new(UnitErrorCode::MalformedFrame, "payload without a frame header").into());
    };
    if let Some(key) = frame.mask {
        apply_mask(&mut payload, key);
    }

    match head.opcode {
        Opcode::Close => on_close(ctx, options, &payload),
        Opcode::Pong => {
            debug!(cid = %ctx.id(), "pong received");
            Ok(None)
        }
        Opcode::Ping => {
            ctx.scratch()?.pong = payload;
            Ok(Some(P::Status::PONG_CREATE))
        }
        Opcode::Text | Opcode::Binary | Opcode::Continuation => deliver(ctx, options, head, payload),
    }
}

fn on_close<P, C>(
    ctx: &mut ProtocolContext<'_, P, C>,
    options: &FrameOptions,
    payload: &[u8],
) -> UnitResult<Option<P::Status>>
where
    P: ProtocolSet<Scratch = WsScratch, CloseParam = CloseFrame>,
    C: CommandSet,
{
    let received = close_code(payload);
    let expected = ctx.close_param().map(|close| close.code);
    if expected.is_some() && received == expected {
        debug!(cid = %ctx.id(), code = ?received, "close acknowledged");
        return Err(Halt::RequestedClose);
    }

    warn!(cid = %ctx.id(), ?received, ?expected, "peer closed the connection");
    if let Some(hook) = &options.on_forced_close {
        hook(ctx.id(), received);
    }
    Err(Halt::ForcedClose)
}

/// Pushes a complete data message, reassembling fragments first.
fn deliver<P, C>(
    ctx: &mut ProtocolContext<'_, P, C>,
    options: &FrameOptions,
    head: FrameHead,
    payload: Vec<u8>,
) -> UnitResult<Option<P::Status>>
where
    P: ProtocolSet<Scratch = WsScratch, CloseParam = CloseFrame>,
    C: CommandSet,
{
    let scratch = ctx.scratch()?;
    let message = match (head.opcode, scratch.fragments.take()) {
        (Opcode::Continuation, None) => return Err(malformed(FrameError::UnexpectedContinuation)),
        (Opcode::Continuation, Some(mut partial)) => {
            partial.data.extend_from_slice(&payload);
            check_length(partial.data.len() as u64, options.max_payload).map_err(malformed)?;
            if !head.fin {
                scratch.fragments = Some(partial);
                return Ok(None);
            }
            partial.data
        }
        (_, Some(_)) => return Err(malformed(FrameError::InterleavedMessage)),
        (opcode, None) => {
            if !head.fin {
                scratch.fragments = Some(Fragments { opcode, data: payload });
                return Ok(None);
            }
            payload
        }
    };
    ctx.push_recv(message)?;
    Ok(None)
}
