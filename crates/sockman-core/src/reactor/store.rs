//! The descriptor store: every live socket plus the per-connection state the
//! engines and contexts operate on.
//!
//! [`Connections`] is deliberately separate from the unit tables held by
//! [`Reactor`](super::Reactor): a context borrows the store mutably while the
//! reactor borrows a unit table immutably to call into it.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use mio::{Events, Poll, Token};
use tracing::{debug, error, info, warn};

use crate::domain::config::ReactorConfig;
use crate::domain::descriptor::{
    ConnectionId, Flush, InboundBuffer, ReceivingBuffer, SendingBuffer, TransportKind,
};
use crate::domain::payload::PayloadCodec;
use crate::domain::units::{
    CommandSet, EntryStatus, InboundMessage, OutboundMessage, ProtocolQueue, ProtocolSet,
    QueueRole, StateSlot,
};
use crate::error::{ReactorError, UnitError, UnitErrorCode};
use crate::log::LogEvent;

use super::clock::Clock;
use super::transport::{self, Socket};

const EVENT_CAPACITY: usize = 256;

/// Answer to a UDP rendezvous refused at the connection ceiling.  Any
/// non-empty answer is a rejection to the connecting side.
pub(crate) const REJECT_DATAGRAM: &[u8] = b"full";

/// One live socket and everything attached to it.
pub(crate) struct Descriptor<P: ProtocolSet, C: CommandSet> {
    pub(crate) socket: Socket,
    pub(crate) peer: Option<SocketAddr>,
    pub(crate) inbound: InboundBuffer,
    /// Reading stopped at the inbound limit; resumed by the next poll.
    pub(crate) read_paused: bool,
    pub(crate) receiving: Option<ReceivingBuffer>,
    pub(crate) sending: Option<SendingBuffer>,
    pub(crate) send_stack: VecDeque<Vec<u8>>,
    pub(crate) recv_stack: VecDeque<Vec<u8>>,
    pub(crate) send_pickup: Option<Vec<u8>>,
    pub(crate) received: Option<InboundMessage<C>>,
    pub(crate) close_param: Option<P::CloseParam>,
    pub(crate) protocol_state: StateSlot<P::Queue, P::Status>,
    pub(crate) command_state: StateSlot<C::Queue, C::Status>,
    /// Seconds timestamp of the last inbound bytes (or alive-check start).
    pub(crate) last_access: u64,
    /// Timeout override of the running alive check, in seconds.
    pub(crate) alive_timeout: Option<u64>,
    pub(crate) scratch: P::Scratch,
    pub(crate) session: C::Session,
}

impl<P: ProtocolSet, C: CommandSet> Descriptor<P, C> {
    fn new(socket: Socket, peer: Option<SocketAddr>, now: u64) -> Self {
        Self {
            socket,
            peer,
            inbound: InboundBuffer::default(),
            read_paused: false,
            receiving: None,
            sending: None,
            send_stack: VecDeque::new(),
            recv_stack: VecDeque::new(),
            send_pickup: None,
            received: None,
            close_param: None,
            protocol_state: None,
            command_state: None,
            last_access: now,
            alive_timeout: None,
            scratch: P::Scratch::default(),
            session: C::Session::default(),
        }
    }
}

/// What [`Connections::request_close`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseRequest {
    UnknownConnection,
    /// The protocol has no CLOSE queue; nothing happened.
    NoCloseQueue,
    Started,
}

enum Incoming {
    Tcp(mio::net::TcpStream, SocketAddr),
    Identity { peer: SocketAddr, local: SocketAddr },
    Skip,
    Done,
}

pub(crate) struct Connections<P: ProtocolSet, C: CommandSet> {
    poll: Poll,
    events: Events,
    descriptors: BTreeMap<ConnectionId, Descriptor<P, C>>,
    await_id: Option<ConnectionId>,
    next_id: u64,
    protocol_queues: HashSet<P::Queue>,
    pub(crate) config: ReactorConfig,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) codec: C::Codec,
}

impl<P: ProtocolSet, C: CommandSet> Connections<P, C> {
    pub(crate) fn new(
        config: ReactorConfig,
        clock: Box<dyn Clock>,
        protocol_queues: HashSet<P::Queue>,
    ) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENT_CAPACITY),
            descriptors: BTreeMap::new(),
            await_id: None,
            next_id: 1,
            protocol_queues,
            config,
            clock,
            codec: C::Codec::default(),
        })
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.now_secs()
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    pub(crate) fn get(&self, cid: ConnectionId) -> Option<&Descriptor<P, C>> {
        self.descriptors.get(&cid)
    }

    pub(crate) fn get_mut(&mut self, cid: ConnectionId) -> Option<&mut Descriptor<P, C>> {
        self.descriptors.get_mut(&cid)
    }

    pub(crate) fn contains(&self, cid: ConnectionId) -> bool {
        self.descriptors.contains_key(&cid)
    }

    /// # Errors
    ///
    /// [`UnitErrorCode::ConnectionGone`] when `cid` has been shut down.
    pub(crate) fn descriptor(&self, cid: ConnectionId) -> Result<&Descriptor<P, C>, UnitError> {
        self.descriptors.get(&cid).ok_or_else(|| gone(cid))
    }

    /// # Errors
    ///
    /// [`UnitErrorCode::ConnectionGone`] when `cid` has been shut down.
    pub(crate) fn descriptor_mut(
        &mut self,
        cid: ConnectionId,
    ) -> Result<&mut Descriptor<P, C>, UnitError> {
        self.descriptors.get_mut(&cid).ok_or_else(|| gone(cid))
    }

    pub(crate) fn await_id(&self) -> Option<ConnectionId> {
        self.await_id
    }

    /// Every descriptor, the await socket included.
    pub(crate) fn ids(&self) -> Vec<ConnectionId> {
        self.descriptors.keys().copied().collect()
    }

    /// Every descriptor except the await socket, in id order.
    pub(crate) fn client_ids(&self) -> Vec<ConnectionId> {
        self.descriptors
            .keys()
            .copied()
            .filter(|cid| Some(*cid) != self.await_id)
            .collect()
    }

    pub(crate) fn client_count(&self) -> usize {
        self.descriptors.len() - usize::from(self.await_id.is_some())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub(crate) fn local_addr(&self, cid: ConnectionId) -> Option<SocketAddr> {
        self.descriptors.get(&cid)?.socket.local_addr().ok()
    }

    /// The protocol queue playing `role`, if the protocol registered it.
    pub(crate) fn queue_for(&self, role: QueueRole) -> Option<P::Queue> {
        P::Queue::for_role(role).filter(|q| self.protocol_queues.contains(q))
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    pub(crate) fn insert(
        &mut self,
        mut socket: Socket,
        peer: Option<SocketAddr>,
    ) -> io::Result<ConnectionId> {
        let cid = ConnectionId::new(self.next_id);
        let token = Token(usize::try_from(cid.value()).unwrap_or(usize::MAX));
        socket.register(self.poll.registry(), token)?;
        self.next_id += 1;
        let now = self.now();
        self.descriptors.insert(cid, Descriptor::new(socket, peer, now));
        Ok(cid)
    }

    pub(crate) fn insert_await(&mut self, socket: Socket) -> io::Result<ConnectionId> {
        let cid = self.insert(socket, None)?;
        self.await_id = Some(cid);
        Ok(cid)
    }

    /// Moves an idle protocol slot to `(queue for role, START)`.
    /// Returns false when the protocol has no queue for `role`.
    pub(crate) fn start_protocol(&mut self, cid: ConnectionId, role: QueueRole) -> bool {
        let Some(queue) = self.queue_for(role) else {
            return false;
        };
        match self.descriptors.get_mut(&cid) {
            Some(d) => {
                d.protocol_state = Some((queue, P::Status::START));
                true
            }
            None => false,
        }
    }

    /// Half-closes, deregisters and drops the socket.  False for unknown ids.
    pub(crate) fn shutdown(&mut self, cid: ConnectionId) -> bool {
        let Some(mut d) = self.descriptors.remove(&cid) else {
            return false;
        };
        if let Err(e) = d.socket.deregister(self.poll.registry()) {
            debug!(%cid, "deregister failed: {e}");
        }
        d.socket.shutdown();
        if self.await_id == Some(cid) {
            self.await_id = None;
        }
        debug!(%cid, "connection shut down");
        true
    }

    // ── Readiness ────────────────────────────────────────────────────────────

    /// Waits at most `timeout` for readiness, then drains every ready socket
    /// and accepts pending connections.
    ///
    /// # Errors
    ///
    /// [`ReactorError::NoSockets`] with an empty store, [`ReactorError::Poll`]
    /// when the poll call fails.
    pub(crate) fn poll(&mut self, timeout: Duration) -> Result<(), ReactorError> {
        if self.descriptors.is_empty() {
            warn!(event = %LogEvent::SocketNoCount, "tick with no sockets");
            return Err(ReactorError::NoSockets);
        }
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(ReactorError::Poll(e)),
        }

        let ready: Vec<Token> = self.events.iter().map(|event| event.token()).collect();
        for token in ready {
            let cid = ConnectionId::new(token.0 as u64);
            if Some(cid) == self.await_id {
                self.accept();
            } else {
                self.fill(cid);
            }
        }

        // Edge-triggered readiness does not fire again for data left behind
        // at the inbound limit.
        let limit = self.config.max_inbound_bytes;
        let paused: Vec<ConnectionId> = self
            .descriptors
            .iter()
            .filter(|(_, d)| d.read_paused && d.inbound.len() < limit)
            .map(|(cid, _)| *cid)
            .collect();
        for cid in paused {
            self.fill(cid);
        }
        Ok(())
    }

    /// Reads the socket of `cid` into its inbound buffer, up to the
    /// configured inbound limit.
    pub(crate) fn fill(&mut self, cid: ConnectionId) {
        let now = self.now();
        let chunk = self.config.receive_buffer_size;
        let limit = self.config.max_inbound_bytes.max(1);
        let Some(d) = self.descriptors.get_mut(&cid) else {
            return;
        };
        let filled = d.socket.fill(&mut d.inbound, chunk, limit);
        d.read_paused = filled.paused;
        if filled.bytes > 0 {
            d.last_access = now;
        }
    }

    fn accept(&mut self) {
        let Some(await_id) = self.await_id else {
            return;
        };
        loop {
            let incoming = match self.descriptors.get_mut(&await_id) {
                Some(d) => next_incoming(&mut d.socket),
                None => Incoming::Done,
            };
            match incoming {
                Incoming::Tcp(stream, addr) => self.admit_tcp(stream, addr),
                Incoming::Identity { peer, local } => self.admit_udp(peer, local),
                Incoming::Skip => {}
                Incoming::Done => return,
            }
        }
    }

    fn at_ceiling(&self) -> bool {
        self.client_count() >= self.config.max_connections
    }

    fn admit_tcp(&mut self, stream: mio::net::TcpStream, addr: SocketAddr) {
        if self.at_ceiling() {
            info!(event = %LogEvent::ConnectionLimit, %addr, "connection ceiling reached");
            let _ = stream.shutdown(std::net::Shutdown::Both);
            return;
        }
        let _ = stream.set_nodelay(true);
        match self.insert(Socket::Tcp(stream), Some(addr)) {
            Ok(cid) => {
                info!(%cid, %addr, "connection accepted");
                self.start_protocol(cid, QueueRole::Accept);
            }
            Err(e) => error!(event = %LogEvent::SocketCreateFail, %addr, "{e}"),
        }
    }

    fn admit_udp(&mut self, peer: SocketAddr, local: SocketAddr) {
        // A repeated identity means our answer was lost: answer again.
        let known = self
            .descriptors
            .values_mut()
            .find(|d| d.peer == Some(peer) && d.socket.kind() == TransportKind::Udp);
        if let Some(d) = known {
            if let Err(e) = d.socket.write(&[]) {
                debug!(%peer, "identity answer not resent: {e}");
            }
            return;
        }

        if self.at_ceiling() {
            info!(event = %LogEvent::ConnectionLimit, addr = %peer, "connection ceiling reached");
            let sent = match self.await_id.and_then(|id| self.descriptors.get(&id)) {
                Some(d) => d.socket.send_to(REJECT_DATAGRAM, peer),
                None => return,
            };
            if let Err(e) = sent {
                debug!(%peer, "rejection not sent: {e}");
            }
            return;
        }
        let created = transport::open_udp_peer(local, peer)
            .and_then(|socket| self.insert(Socket::Udp(socket), Some(peer)));
        match created {
            Ok(cid) => {
                info!(%cid, %peer, "udp peer accepted");
                self.start_protocol(cid, QueueRole::Accept);
            }
            Err(e) => error!(event = %LogEvent::SocketCreateFail, %peer, "{e}"),
        }
    }

    // ── Sized receive / raw receive ──────────────────────────────────────────

    pub(crate) fn set_receiving_size(
        &mut self,
        cid: ConnectionId,
        size: usize,
    ) -> Result<(), UnitError> {
        self.descriptor_mut(cid)?.receiving = Some(ReceivingBuffer::new(size));
        Ok(())
    }

    pub(crate) fn is_receiving(&self, cid: ConnectionId) -> bool {
        self.get(cid).is_some_and(|d| d.receiving.is_some())
    }

    /// Continues the sized receive of `cid`.
    ///
    /// Returns `Some(bytes)` once exactly the requested size has arrived and
    /// resets the receive setting; `None` while short.
    ///
    /// # Errors
    ///
    /// `RECEIVING_FAIL` when no size is set or the stream ended before the
    /// requested bytes arrived.
    pub(crate) fn receiving(&mut self, cid: ConnectionId) -> Result<Option<Vec<u8>>, UnitError> {
        let (wanted, buffered) = {
            let d = self.descriptor(cid)?;
            let Some(buf) = d.receiving.as_ref() else {
                return Err(UnitError::new(
                    UnitErrorCode::ReceivingFail,
                    LogEvent::ReceiveSizeNoSetting.as_str(),
                ));
            };
            (buf.remaining(), d.inbound.len())
        };
        if buffered < wanted {
            self.fill(cid);
        }

        let d = self.descriptor_mut(cid)?;
        let bytes = d.inbound.take(wanted);
        let complete = match d.receiving.as_mut() {
            Some(buf) => {
                buf.push(&bytes);
                buf.is_complete()
            }
            None => false,
        };
        if complete {
            return Ok(d.receiving.take().map(ReceivingBuffer::into_data));
        }
        match d.inbound.end() {
            Some(end) => Err(UnitError::new(UnitErrorCode::ReceivingFail, end.to_string())),
            None => Ok(None),
        }
    }

    /// Returns whatever is buffered, up to the receive buffer size.
    ///
    /// # Errors
    ///
    /// `RECEIVING_FAIL` when nothing is buffered and the stream has ended.
    pub(crate) fn recv(&mut self, cid: ConnectionId) -> Result<Option<Vec<u8>>, UnitError> {
        let max = self.config.receive_buffer_size.max(1);
        if self.descriptor(cid)?.inbound.is_empty() {
            self.fill(cid);
        }
        let d = self.descriptor_mut(cid)?;
        if !d.inbound.is_empty() {
            return Ok(Some(d.inbound.take(max)));
        }
        match d.inbound.end() {
            Some(end) => Err(UnitError::new(UnitErrorCode::ReceivingFail, end.to_string())),
            None => Ok(None),
        }
    }

    pub(crate) fn unread(&mut self, cid: ConnectionId, bytes: &[u8]) -> Result<(), UnitError> {
        self.descriptor_mut(cid)?.inbound.unread(bytes);
        Ok(())
    }

    // ── Buffered send ────────────────────────────────────────────────────────

    pub(crate) fn set_sending_data(
        &mut self,
        cid: ConnectionId,
        data: Vec<u8>,
    ) -> Result<(), UnitError> {
        self.descriptor_mut(cid)?.sending = Some(SendingBuffer::new(data));
        Ok(())
    }

    pub(crate) fn is_sending(&self, cid: ConnectionId) -> bool {
        self.get(cid).is_some_and(|d| d.sending.is_some())
    }

    /// Writes as much of the pending send data as the socket accepts.
    ///
    /// # Errors
    ///
    /// `SENDING_FAIL` when no data is set or the write fails.
    pub(crate) fn sending(&mut self, cid: ConnectionId) -> Result<Flush, UnitError> {
        let d = self.descriptor_mut(cid)?;
        let Some(buf) = d.sending.as_mut() else {
            return Err(UnitError::new(
                UnitErrorCode::SendingFail,
                LogEvent::SendDataNoSetting.as_str(),
            ));
        };
        while !buf.is_flushed() {
            match d.socket.write(buf.pending()) {
                Ok(0) => {
                    return Err(UnitError::new(
                        UnitErrorCode::SendingFail,
                        "socket accepted no bytes",
                    ))
                }
                Ok(n) => buf.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Flush::Pending),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(UnitError::new(UnitErrorCode::SendingFail, e.to_string())),
            }
        }
        d.sending = None;
        Ok(Flush::Done)
    }

    // ── Stacks ───────────────────────────────────────────────────────────────

    pub(crate) fn push_send_raw(&mut self, cid: ConnectionId, bytes: Vec<u8>) -> Result<(), UnitError> {
        self.descriptor_mut(cid)?.send_stack.push_back(bytes);
        Ok(())
    }

    pub(crate) fn push_recv_raw(&mut self, cid: ConnectionId, bytes: Vec<u8>) -> Result<(), UnitError> {
        self.descriptor_mut(cid)?.recv_stack.push_back(bytes);
        Ok(())
    }

    /// Serializes `message` and pushes it onto the send stack of `cid`.
    ///
    /// # Errors
    ///
    /// `SEND_DATA_STACK_FAIL` when serialization fails, `CONNECTION_GONE` for
    /// unknown ids.
    pub(crate) fn send_message(
        &mut self,
        cid: ConnectionId,
        message: &OutboundMessage<C>,
    ) -> Result<(), UnitError> {
        let bytes = self.codec.serialize(message)?;
        self.push_send_raw(cid, bytes)
    }

    /// Pushes `message` onto the send stack of every client accepted by
    /// `filter`.  Returns how many stacks received it.
    ///
    /// # Errors
    ///
    /// `SEND_DATA_STACK_FAIL` when serialization fails.
    pub(crate) fn broadcast<F>(
        &mut self,
        message: &OutboundMessage<C>,
        mut filter: F,
    ) -> Result<usize, UnitError>
    where
        F: FnMut(ConnectionId, &C::Session) -> bool,
    {
        let bytes = self.codec.serialize(message)?;
        let await_id = self.await_id;
        let mut delivered = 0;
        for (cid, d) in self.descriptors.iter_mut() {
            if Some(*cid) == await_id || !filter(*cid, &d.session) {
                continue;
            }
            d.send_stack.push_back(bytes.clone());
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Pops and unserializes the oldest receive-stack entry of `cid`.
    ///
    /// # Errors
    ///
    /// `RECEIVE_DATA_STACK_FAIL` when the payload does not unserialize.
    pub(crate) fn pop_message(
        &mut self,
        cid: ConnectionId,
    ) -> Result<Option<InboundMessage<C>>, UnitError> {
        let Some(raw) = self.descriptor_mut(cid)?.recv_stack.pop_front() else {
            return Ok(None);
        };
        Ok(Some(self.codec.unserialize(raw)?))
    }

    // ── Close / keepalive ────────────────────────────────────────────────────

    pub(crate) fn request_close(&mut self, cid: ConnectionId, param: P::CloseParam) -> CloseRequest {
        let close = self.queue_for(QueueRole::Close);
        let Some(d) = self.descriptors.get_mut(&cid) else {
            return CloseRequest::UnknownConnection;
        };
        let Some(queue) = close else {
            return CloseRequest::NoCloseQueue;
        };
        d.close_param = Some(param);
        d.protocol_state = Some((queue, P::Status::START));
        CloseRequest::Started
    }

    /// Starts the ALIVE queue of `cid` with a timeout override.  A running
    /// alive check that already has an override is left alone.
    pub(crate) fn start_alive_check(&mut self, cid: ConnectionId, timeout_secs: u64) -> Result<(), UnitError> {
        let alive = self.queue_for(QueueRole::Alive);
        let d = self.descriptor_mut(cid)?;
        let Some(alive) = alive else {
            return Ok(());
        };
        let running = matches!(d.protocol_state, Some((queue, _)) if queue == alive);
        if running && d.alive_timeout.is_some() {
            return Ok(());
        }
        d.protocol_state = Some((alive, P::Status::START));
        d.alive_timeout = Some(timeout_secs);
        Ok(())
    }
}

fn gone(cid: ConnectionId) -> UnitError {
    UnitError::new(UnitErrorCode::ConnectionGone, format!("connection {cid} is gone"))
}

fn next_incoming(socket: &mut Socket) -> Incoming {
    match socket {
        Socket::Listener(listener) => match listener.accept() {
            Ok((stream, addr)) => Incoming::Tcp(stream, addr),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Incoming::Done,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Incoming::Skip,
            Err(e) => {
                error!(event = %LogEvent::SocketCreateFail, "accept failed: {e}");
                Incoming::Done
            }
        },
        Socket::UdpAwait(await_socket) => {
            let mut buf = [0u8; 64];
            match await_socket.recv_from(&mut buf) {
                Ok((0, peer)) => match await_socket.local_addr() {
                    Ok(local) => Incoming::Identity { peer, local },
                    Err(e) => {
                        error!(event = %LogEvent::SocketCreateFail, "{e}");
                        Incoming::Done
                    }
                },
                Ok((n, peer)) => {
                    debug!(%peer, bytes = n, "non-identity datagram on await socket ignored");
                    Incoming::Skip
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Incoming::Done,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => Incoming::Skip,
                Err(e) => {
                    warn!(event = %LogEvent::SocketError, "await socket read failed: {e}");
                    Incoming::Done
                }
            }
        }
        Socket::Tcp(_) | Socket::Udp(_) => Incoming::Done,
    }
}
