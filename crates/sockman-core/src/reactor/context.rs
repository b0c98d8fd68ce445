//! The per-connection facades handed to status units.
//!
//! [`ProtocolContext`] is what protocol (framing) units see: sized and raw
//! receive, buffered send, the protocol scratch record and keepalive control.
//! [`CommandContext`] is what application units see: typed messages, the send
//! stack and broadcast.  Both borrow the descriptor store for the duration of
//! one callback and address the connection they were created for.

use std::net::SocketAddr;

use crate::domain::descriptor::{ConnectionId, Flush};
use crate::domain::units::{CommandSet, InboundMessage, OutboundMessage, ProtocolSet, StateSlot};
use crate::engine::{Halt, StatusUnitEngine, UnitResult, UnitState};
use crate::error::{UnitError, UnitErrorCode};

use super::store::{CloseRequest, Connections};

/// A boxed protocol status unit.
pub type ProtocolUnit<P, C> =
    Box<dyn Fn(&mut ProtocolContext<'_, P, C>) -> UnitResult<Option<<P as ProtocolSet>::Status>>>;

/// A boxed command status unit.
pub type CommandUnit<P, C> =
    Box<dyn Fn(&mut CommandContext<'_, P, C>) -> UnitResult<Option<<C as CommandSet>::Status>>>;

/// Unit table of a protocol definition.
pub type ProtocolUnits<P, C> =
    StatusUnitEngine<<P as ProtocolSet>::Queue, <P as ProtocolSet>::Status, ProtocolUnit<P, C>>;

/// Unit table of a command definition.
pub type CommandUnits<P, C> =
    StatusUnitEngine<<C as CommandSet>::Queue, <C as CommandSet>::Status, CommandUnit<P, C>>;

/// Boxes a closure as a [`ProtocolUnit`].
///
/// Going through this function pins the closure's argument to the
/// higher-ranked context type, which plain `Box::new` cannot infer.
pub fn protocol_unit<P, C, F>(f: F) -> ProtocolUnit<P, C>
where
    P: ProtocolSet,
    C: CommandSet,
    F: Fn(&mut ProtocolContext<'_, P, C>) -> UnitResult<Option<P::Status>> + 'static,
{
    Box::new(f)
}

/// Boxes a closure as a [`CommandUnit`].
pub fn command_unit<P, C, F>(f: F) -> CommandUnit<P, C>
where
    P: ProtocolSet,
    C: CommandSet,
    F: Fn(&mut CommandContext<'_, P, C>) -> UnitResult<Option<C::Status>> + 'static,
{
    Box::new(f)
}

fn emergency(cid: ConnectionId) -> Halt {
    Halt::Failed(UnitError::new(
        UnitErrorCode::EmergencyShutdown,
        format!("emergency shutdown requested on {cid}"),
    ))
}

// ── Protocol context ──────────────────────────────────────────────────────────

/// Context of a protocol status unit.
pub struct ProtocolContext<'r, P: ProtocolSet, C: CommandSet> {
    conns: &'r mut Connections<P, C>,
    cid: ConnectionId,
}

impl<'r, P: ProtocolSet, C: CommandSet> ProtocolContext<'r, P, C> {
    pub(crate) fn new(conns: &'r mut Connections<P, C>, cid: ConnectionId) -> Self {
        Self { conns, cid }
    }

    pub fn id(&self) -> ConnectionId {
        self.cid
    }

    pub fn queue(&self) -> Option<P::Queue> {
        self.state().map(|(queue, _)| queue)
    }

    pub fn status(&self) -> Option<P::Status> {
        self.state().map(|(_, status)| status)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.conns.get(self.cid)?.peer
    }

    // ── I/O ──────────────────────────────────────────────────────────────────

    /// Starts a sized receive of exactly `size` bytes.
    ///
    /// # Errors
    ///
    /// `CONNECTION_GONE` if the connection no longer exists.
    pub fn set_receiving_size(&mut self, size: usize) -> Result<(), UnitError> {
        self.conns.set_receiving_size(self.cid, size)
    }

    /// Continues the sized receive; `Some` once complete.
    ///
    /// # Errors
    ///
    /// `RECEIVING_FAIL` without a size set or when the stream ended.
    pub fn receiving(&mut self) -> Result<Option<Vec<u8>>, UnitError> {
        self.conns.receiving(self.cid)
    }

    pub fn is_receiving(&self) -> bool {
        self.conns.is_receiving(self.cid)
    }

    /// Whatever is buffered, up to the receive buffer size.
    ///
    /// # Errors
    ///
    /// `RECEIVING_FAIL` once the stream has ended.
    pub fn recv(&mut self) -> Result<Option<Vec<u8>>, UnitError> {
        self.conns.recv(self.cid)
    }

    /// Returns `bytes` to the front of the inbound buffer.
    ///
    /// # Errors
    ///
    /// `CONNECTION_GONE` if the connection no longer exists.
    pub fn unread(&mut self, bytes: &[u8]) -> Result<(), UnitError> {
        self.conns.unread(self.cid, bytes)
    }

    /// # Errors
    ///
    /// `CONNECTION_GONE` if the connection no longer exists.
    pub fn set_sending_data(&mut self, data: Vec<u8>) -> Result<(), UnitError> {
        self.conns.set_sending_data(self.cid, data)
    }

    /// Flushes as much pending send data as the socket accepts.
    ///
    /// # Errors
    ///
    /// `SENDING_FAIL` without data set or when the write fails.
    pub fn sending(&mut self) -> Result<Flush, UnitError> {
        self.conns.sending(self.cid)
    }

    pub fn is_sending(&self) -> bool {
        self.conns.is_sending(self.cid)
    }

    // ── Per-connection state ─────────────────────────────────────────────────

    /// # Errors
    ///
    /// `CONNECTION_GONE` if the connection no longer exists.
    pub fn scratch(&mut self) -> Result<&mut P::Scratch, UnitError> {
        Ok(&mut self.conns.descriptor_mut(self.cid)?.scratch)
    }

    /// # Errors
    ///
    /// `CONNECTION_GONE` if the connection no longer exists.
    pub fn session(&mut self) -> Result<&mut C::Session, UnitError> {
        Ok(&mut self.conns.descriptor_mut(self.cid)?.session)
    }

    pub fn session_of(&mut self, cid: ConnectionId) -> Option<&mut C::Session> {
        Some(&mut self.conns.get_mut(cid)?.session)
    }

    /// Takes the payload the reactor popped from the send stack when it
    /// started SEND.
    pub fn take_send_pickup(&mut self) -> Option<Vec<u8>> {
        self.conns.get_mut(self.cid)?.send_pickup.take()
    }

    /// Pushes a decoded payload onto the receive stack.
    ///
    /// # Errors
    ///
    /// `CONNECTION_GONE` if the connection no longer exists.
    pub fn push_recv(&mut self, payload: Vec<u8>) -> Result<(), UnitError> {
        self.conns.push_recv_raw(self.cid, payload)
    }

    /// Pushes raw bytes onto the send stack, bypassing the codec.
    ///
    /// # Errors
    ///
    /// `CONNECTION_GONE` if the connection no longer exists.
    pub fn push_send(&mut self, payload: Vec<u8>) -> Result<(), UnitError> {
        self.conns.push_send_raw(self.cid, payload)
    }

    /// The payload registered by the last `close()`.
    pub fn close_param(&self) -> Option<&P::CloseParam> {
        self.conns.get(self.cid)?.close_param.as_ref()
    }

    // ── Control ──────────────────────────────────────────────────────────────

    /// Starts the CLOSE queue of `cid` with `param`.
    ///
    /// # Errors
    ///
    /// Raises [`Halt::Abort`] when `cid` is this connection and CLOSE was
    /// started, so the caller's status is not written back.
    pub fn close(&mut self, cid: ConnectionId, param: P::CloseParam) -> UnitResult<bool> {
        match self.conns.request_close(cid, param) {
            CloseRequest::UnknownConnection => Ok(false),
            CloseRequest::NoCloseQueue => Ok(true),
            CloseRequest::Started if cid == self.cid => Err(Halt::Abort),
            CloseRequest::Started => Ok(true),
        }
    }

    /// Starts an alive check with a `timeout_secs` override.  Always returns
    /// [`Halt::Abort`] so the caller can write `return Err(ctx.alive_check(10))`.
    pub fn alive_check(&mut self, timeout_secs: u64) -> Halt {
        match self.conns.start_alive_check(self.cid, timeout_secs) {
            Ok(()) => Halt::Abort,
            Err(e) => Halt::Failed(e),
        }
    }

    pub fn abort_current_unit(&self) -> Halt {
        Halt::Abort
    }

    /// A failure that runs the emergency callback and shuts this connection
    /// down.
    pub fn emergency_shutdown(&self) -> Halt {
        emergency(self.cid)
    }

    // ── Store queries ────────────────────────────────────────────────────────

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.conns.client_ids()
    }

    pub fn client_count(&self) -> usize {
        self.conns.client_count()
    }

    pub fn is_command_running(&self) -> bool {
        self.conns
            .get(self.cid)
            .is_some_and(|d| d.command_state.is_some())
    }

    /// Shuts `cid` down without the emergency callback.  False for unknown ids.
    pub fn shutdown(&mut self, cid: ConnectionId) -> bool {
        self.conns.shutdown(cid)
    }
}

impl<P: ProtocolSet, C: CommandSet> UnitState<P::Queue, P::Status> for ProtocolContext<'_, P, C> {
    fn state(&self) -> StateSlot<P::Queue, P::Status> {
        self.conns.get(self.cid).and_then(|d| d.protocol_state)
    }

    fn set_state(&mut self, next: StateSlot<P::Queue, P::Status>) {
        if let Some(d) = self.conns.get_mut(self.cid) {
            d.protocol_state = next;
        }
    }
}

// ── Command context ───────────────────────────────────────────────────────────

/// Context of a command status unit, the dispatcher and the emergency
/// callback.
pub struct CommandContext<'r, P: ProtocolSet, C: CommandSet> {
    conns: &'r mut Connections<P, C>,
    cid: ConnectionId,
}

impl<'r, P: ProtocolSet, C: CommandSet> CommandContext<'r, P, C> {
    pub(crate) fn new(conns: &'r mut Connections<P, C>, cid: ConnectionId) -> Self {
        Self { conns, cid }
    }

    pub fn id(&self) -> ConnectionId {
        self.cid
    }

    pub fn queue(&self) -> Option<C::Queue> {
        self.state().map(|(queue, _)| queue)
    }

    pub fn status(&self) -> Option<C::Status> {
        self.state().map(|(_, status)| status)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.conns.get(self.cid)?.peer
    }

    /// The message the dispatcher selected the running queue for.
    pub fn received(&self) -> Option<&InboundMessage<C>> {
        self.conns.get(self.cid)?.received.as_ref()
    }

    /// Pops and unserializes the next queued message.
    ///
    /// # Errors
    ///
    /// `RECEIVE_DATA_STACK_FAIL` when the payload does not unserialize.
    pub fn next_received(&mut self) -> Result<Option<InboundMessage<C>>, UnitError> {
        self.conns.pop_message(self.cid)
    }

    /// Serializes `message` onto this connection's send stack.
    ///
    /// # Errors
    ///
    /// `SEND_DATA_STACK_FAIL` when serialization fails.
    pub fn send(&mut self, message: &OutboundMessage<C>) -> Result<(), UnitError> {
        self.conns.send_message(self.cid, message)
    }

    /// Serializes `message` onto another connection's send stack.
    ///
    /// # Errors
    ///
    /// `SEND_DATA_STACK_FAIL` when serialization fails, `CONNECTION_GONE` for
    /// unknown ids.
    pub fn send_to(&mut self, cid: ConnectionId, message: &OutboundMessage<C>) -> Result<(), UnitError> {
        self.conns.send_message(cid, message)
    }

    /// Pushes `message` to every client, optionally skipping this one.
    /// Returns how many connections received it.
    ///
    /// # Errors
    ///
    /// `SEND_DATA_STACK_FAIL` when serialization fails.
    pub fn broadcast(&mut self, message: &OutboundMessage<C>, exclude_self: bool) -> Result<usize, UnitError> {
        let me = self.cid;
        self.conns
            .broadcast(message, |cid, _| !(exclude_self && cid == me))
    }

    /// Pushes `message` to every client whose session satisfies `filter`.
    ///
    /// # Errors
    ///
    /// `SEND_DATA_STACK_FAIL` when serialization fails.
    pub fn broadcast_filtered<F>(&mut self, message: &OutboundMessage<C>, filter: F) -> Result<usize, UnitError>
    where
        F: FnMut(ConnectionId, &C::Session) -> bool,
    {
        self.conns.broadcast(message, filter)
    }

    /// Starts the CLOSE queue of `cid`.  False for unknown connections, true
    /// without effect when the protocol has no CLOSE queue.
    pub fn close(&mut self, cid: ConnectionId, param: P::CloseParam) -> bool {
        self.conns.request_close(cid, param) != CloseRequest::UnknownConnection
    }

    /// # Errors
    ///
    /// `CONNECTION_GONE` if the connection no longer exists.
    pub fn session(&mut self) -> Result<&mut C::Session, UnitError> {
        Ok(&mut self.conns.descriptor_mut(self.cid)?.session)
    }

    pub fn session_of(&mut self, cid: ConnectionId) -> Option<&mut C::Session> {
        Some(&mut self.conns.get_mut(cid)?.session)
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.conns.client_ids()
    }

    pub fn client_count(&self) -> usize {
        self.conns.client_count()
    }

    pub fn is_protocol_running(&self) -> bool {
        self.conns
            .get(self.cid)
            .is_some_and(|d| d.protocol_state.is_some())
    }

    pub fn shutdown(&mut self, cid: ConnectionId) -> bool {
        self.conns.shutdown(cid)
    }

    pub fn emergency_shutdown(&self) -> Halt {
        emergency(self.cid)
    }
}

impl<P: ProtocolSet, C: CommandSet> UnitState<C::Queue, C::Status> for CommandContext<'_, P, C> {
    fn state(&self) -> StateSlot<C::Queue, C::Status> {
        self.conns.get(self.cid).and_then(|d| d.command_state)
    }

    fn set_state(&mut self, next: StateSlot<C::Queue, C::Status>) {
        if let Some(d) = self.conns.get_mut(self.cid) {
            d.command_state = next;
        }
    }
}
