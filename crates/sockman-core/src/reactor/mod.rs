//! The cycle-driven reactor.
//!
//! A [`Reactor`] owns the descriptor store, the protocol unit table and the
//! optional command unit table.  Every [`Reactor::tick`] waits at most one
//! cycle interval for readiness and then gives each connection exactly one
//! protocol step and one command step.
//!
//! # Lifecycle of a connection
//!
//! ```text
//! accept / connect ──► ACCEPT / CONNECT ──► idle ◄──┬── RECV   (inbound bytes)
//!                                              │    ├── SEND   (send stack)
//!                                              │    └── ALIVE  (idle too long)
//!                                              ▼
//!                           CLOSE ──► shutdown (requested close)
//!                 failure / timeout ──► emergency callback ──► shutdown
//! ```

pub mod clock;
pub mod context;
mod store;
mod transport;

use std::fmt::Debug;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::domain::config::ReactorConfig;
use crate::domain::descriptor::{ConnectionId, TransportKind};
use crate::domain::payload::PayloadCodec;
use crate::domain::units::{
    CommandSet, EntryStatus, InboundMessage, OutboundMessage, ProtocolSet, QueueRole, StateSlot,
};
use crate::engine::{Drive, Halt};
use crate::error::{ReactorError, UnitError, UnitErrorCode};
use crate::log::LogEvent;

use clock::{Clock, SystemClock};
use context::{CommandContext, CommandUnits, ProtocolContext, ProtocolUnits};
use store::{CloseRequest, Connections};
use transport::Socket;

/// Picks the command queue for a freshly received message.
pub type Dispatcher<P, C> = Box<
    dyn FnMut(
        &mut CommandContext<'_, P, C>,
        &InboundMessage<C>,
    ) -> Result<Option<<C as CommandSet>::Queue>, UnitError>,
>;

/// Runs before a connection is torn down by a failure.
pub type EmergencyCallback<P, C> = Box<dyn FnMut(&mut CommandContext<'_, P, C>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AliveCheck {
    Off,
    Due,
    Running,
}

/// Single-threaded socket reactor driving a protocol definition `P` and a
/// command definition `C`.
pub struct Reactor<P: ProtocolSet, C: CommandSet> {
    conns: Connections<P, C>,
    protocol: ProtocolUnits<P, C>,
    commands: CommandUnits<P, C>,
    dispatcher: Option<Dispatcher<P, C>>,
    emergency: Option<EmergencyCallback<P, C>>,
}

impl<P: ProtocolSet, C: CommandSet> Reactor<P, C> {
    /// Creates a reactor with no sockets.
    ///
    /// # Errors
    ///
    /// [`ReactorError::Socket`] when the readiness poller cannot be created.
    pub fn new(config: ReactorConfig, protocol: ProtocolUnits<P, C>) -> Result<Self, ReactorError> {
        let queues = protocol.queue_names().iter().copied().collect();
        let conns = Connections::new(config, Box::new(SystemClock), queues)
            .map_err(ReactorError::Socket)?;
        Ok(Self {
            conns,
            protocol,
            commands: CommandUnits::<P, C>::new(),
            dispatcher: None,
            emergency: None,
        })
    }

    pub fn with_commands(mut self, commands: CommandUnits<P, C>) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_dispatcher<F>(mut self, dispatcher: F) -> Self
    where
        F: FnMut(&mut CommandContext<'_, P, C>, &InboundMessage<C>) -> Result<Option<C::Queue>, UnitError>
            + 'static,
    {
        self.dispatcher = Some(Box::new(dispatcher));
        self
    }

    pub fn with_emergency<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&mut CommandContext<'_, P, C>) + 'static,
    {
        self.emergency = Some(Box::new(callback));
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.conns.clock = Box::new(clock);
        self
    }

    pub fn with_codec(mut self, codec: C::Codec) -> Self {
        self.conns.codec = codec;
        self
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.conns.config
    }

    pub fn protocol_units(&self) -> &ProtocolUnits<P, C> {
        &self.protocol
    }

    pub fn command_units(&self) -> &CommandUnits<P, C> {
        &self.commands
    }

    // ── Sockets ──────────────────────────────────────────────────────────────

    /// Listens for TCP connections on `host:port`.
    ///
    /// # Errors
    ///
    /// [`ReactorError::Resolve`] or [`ReactorError::Listen`].
    pub fn listen(&mut self, host: &str, port: u16) -> Result<ConnectionId, ReactorError> {
        let addr = resolve(host, port)?;
        let listener =
            transport::open_listener(addr).map_err(|source| ReactorError::Listen { addr, source })?;
        let cid = self
            .conns
            .insert_await(Socket::Listener(listener))
            .map_err(|source| ReactorError::Listen { addr, source })?;
        info!(%cid, addr = ?self.local_addr(), "listening (tcp)");
        Ok(cid)
    }

    /// Waits for UDP rendezvous datagrams on `host:port`.
    ///
    /// # Errors
    ///
    /// [`ReactorError::Resolve`] or [`ReactorError::Listen`].
    pub fn bind(&mut self, host: &str, port: u16) -> Result<ConnectionId, ReactorError> {
        let addr = resolve(host, port)?;
        let socket =
            transport::open_udp_await(addr).map_err(|source| ReactorError::Listen { addr, source })?;
        let cid = self
            .conns
            .insert_await(Socket::UdpAwait(socket))
            .map_err(|source| ReactorError::Listen { addr, source })?;
        info!(%cid, addr = ?self.local_addr(), "listening (udp)");
        Ok(cid)
    }

    /// Connects to `host:port` and starts the CONNECT queue.
    ///
    /// `retry` is the number of attempts, `0` meaning one.
    ///
    /// # Errors
    ///
    /// [`ReactorError::Resolve`], [`ReactorError::Connect`],
    /// [`ReactorError::Rejected`] (UDP) or [`ReactorError::Socket`].
    pub fn connect(
        &mut self,
        host: &str,
        port: u16,
        kind: TransportKind,
        retry: u32,
        retry_interval: Duration,
    ) -> Result<ConnectionId, ReactorError> {
        let addr = resolve(host, port)?;
        let attempts = retry.max(1);
        let (socket, peer) = match kind {
            TransportKind::Tcp => (
                Socket::Tcp(transport::connect_tcp(addr, attempts, retry_interval)?),
                addr,
            ),
            TransportKind::Udp => {
                let (socket, peer) = transport::connect_udp(addr, attempts, retry_interval)?;
                (Socket::Udp(socket), peer)
            }
        };
        let cid = self
            .conns
            .insert(socket, Some(peer))
            .map_err(ReactorError::Socket)?;
        info!(%cid, %peer, "connected");
        if !self.conns.start_protocol(cid, QueueRole::Connect) {
            debug!(%cid, "protocol has no connect queue");
        }
        Ok(cid)
    }

    /// Address of the await socket, useful after listening on port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.conns.local_addr(self.conns.await_id()?)
    }

    /// Local address of any descriptor.
    pub fn local_addr_of(&self, cid: ConnectionId) -> Option<SocketAddr> {
        self.conns.local_addr(cid)
    }

    // ── Tick ─────────────────────────────────────────────────────────────────

    /// One tick with the cycle and alive intervals from the configuration.
    ///
    /// # Errors
    ///
    /// See [`tick`](Self::tick).
    pub fn run_once(&mut self) -> Result<(), ReactorError> {
        let cycle = self.conns.config.cycle_interval();
        let alive = self.conns.config.alive_interval_secs;
        self.tick(cycle, alive)
    }

    /// Waits at most `cycle_interval` for readiness, then runs one protocol
    /// step and one command step on every connection in id order.
    ///
    /// `alive_interval_secs == 0` disables keepalive and idle timeouts.
    ///
    /// # Errors
    ///
    /// [`ReactorError::NoSockets`] when nothing is registered,
    /// [`ReactorError::Poll`] when readiness polling fails.  Failures of a
    /// single connection never fail the tick.
    pub fn tick(&mut self, cycle_interval: Duration, alive_interval_secs: u64) -> Result<(), ReactorError> {
        self.conns.poll(cycle_interval)?;
        for cid in self.conns.client_ids() {
            if self.conns.contains(cid) {
                self.process(cid, alive_interval_secs);
            }
        }
        Ok(())
    }

    fn process(&mut self, cid: ConnectionId, alive_interval: u64) {
        let recv = self.conns.queue_for(QueueRole::Recv);
        let send = self.conns.queue_for(QueueRole::Send);
        let alive = self.conns.queue_for(QueueRole::Alive);
        let now = self.conns.now();

        let Some(d) = self.conns.get_mut(cid) else {
            return;
        };
        let was_running = d.protocol_state.is_some();
        let mut check = AliveCheck::Off;
        match d.protocol_state {
            None => match (d.inbound.is_ready(), recv) {
                (true, Some(queue)) => d.protocol_state = Some((queue, P::Status::START)),
                _ => {
                    if let Some(item) = d.send_stack.pop_front() {
                        d.send_pickup = Some(item);
                        match send {
                            Some(queue) => d.protocol_state = Some((queue, P::Status::START)),
                            None => warn!(event = %LogEvent::QueueStartFail, %cid, "protocol has no send queue"),
                        }
                    } else if alive_interval > 0 && alive.is_some() {
                        check = AliveCheck::Due;
                    }
                }
            },
            Some((queue, _)) if Some(queue) == alive => check = AliveCheck::Running,
            Some(_) => {}
        }

        let idle_for = now.saturating_sub(d.last_access);
        let timed_out = match check {
            AliveCheck::Off => was_running && alive_interval > 0 && idle_for > alive_interval,
            AliveCheck::Running => {
                let limit = d.alive_timeout.unwrap_or(alive_interval);
                limit > 0 && idle_for > limit
            }
            AliveCheck::Due => {
                d.alive_timeout = None;
                if let (true, Some(queue)) = (idle_for > alive_interval, alive) {
                    info!(event = %LogEvent::AliveCheckStartTimeout, %cid, idle_for, "starting alive check");
                    d.last_access = now;
                    d.protocol_state = Some((queue, P::Status::START));
                }
                false
            }
        };
        if timed_out {
            let e = idle_timeout(idle_for);
            error!(event = %LogEvent::AliveCheckTimeout, %cid, code = e.code.code(), "{}", e.message);
            self.fail(cid);
            return;
        }

        if self.drive_protocol(cid) && self.dispatch(cid) {
            self.drive_commands(cid);
        }
    }

    fn drive_protocol(&mut self, cid: ConnectionId) -> bool {
        let site = self.conns.get(cid).and_then(|d| d.protocol_state);
        let outcome = {
            let mut ctx = ProtocolContext::new(&mut self.conns, cid);
            self.protocol.drive_once(&mut ctx)
        };
        self.settle(cid, "protocol", site, outcome)
    }

    fn drive_commands(&mut self, cid: ConnectionId) -> bool {
        let site = self.conns.get(cid).and_then(|d| d.command_state);
        let outcome = {
            let mut ctx = CommandContext::new(&mut self.conns, cid);
            self.commands.drive_once(&mut ctx)
        };
        self.settle(cid, "command", site, outcome)
    }

    /// Applies the outcome of one engine step.  Returns false once the
    /// connection is gone.
    fn settle<Q: Debug, S: Debug>(
        &mut self,
        cid: ConnectionId,
        engine: &'static str,
        site: StateSlot<Q, S>,
        outcome: Result<Drive<Q, S>, Halt>,
    ) -> bool {
        match outcome {
            Ok(Drive::Idle | Drive::Ran { .. }) => {}
            Ok(Drive::Unregistered { queue, status }) => {
                warn!(event = %LogEvent::UnitNoSetting, %cid, engine, ?queue, ?status, "status unit not registered");
            }
            Err(Halt::Abort) => debug!(%cid, engine, ?site, "unit aborted"),
            Err(Halt::RequestedClose) => {
                info!(%cid, "close handshake complete");
                self.conns.shutdown(cid);
            }
            Err(Halt::ForcedClose) => {
                warn!(%cid, engine, ?site, "connection closed by peer");
                self.fail(cid);
            }
            Err(Halt::Failed(e)) => {
                error!(%cid, engine, ?site, code = e.code.code(), "{}", e.message);
                self.fail(cid);
            }
        }
        self.conns.contains(cid)
    }

    /// Hands the oldest received payload to the dispatcher when the command
    /// engine is idle.  Returns false once the connection is gone.
    fn dispatch(&mut self, cid: ConnectionId) -> bool {
        if self.dispatcher.is_none() {
            return true;
        }
        let raw = match self.conns.get_mut(cid) {
            None => return false,
            Some(d) if d.command_state.is_some() => return true,
            Some(d) => match d.recv_stack.pop_front() {
                Some(raw) => raw,
                None => return true,
            },
        };
        let message = match self.conns.codec.unserialize(raw) {
            Ok(message) => message,
            Err(e) => {
                let e = UnitError::from(e);
                error!(%cid, code = e.code.code(), "{}", e.message);
                self.fail(cid);
                return false;
            }
        };

        let selected = match self.dispatcher.as_mut() {
            Some(dispatcher) => {
                let mut ctx = CommandContext::new(&mut self.conns, cid);
                dispatcher(&mut ctx, &message)
            }
            None => return true,
        };
        match selected {
            Ok(queue) => {
                if let Some(d) = self.conns.get_mut(cid) {
                    d.received = Some(message);
                    if let Some(queue) = queue {
                        if !self.commands.is_set_queue(queue) {
                            warn!(event = %LogEvent::QueueStartFail, %cid, ?queue, "command queue not registered");
                        }
                        d.command_state = Some((queue, C::Status::START));
                    }
                }
            }
            Err(e) => {
                error!(%cid, code = UnitErrorCode::MethodCallFail.code(), "dispatcher failed: {e}");
                self.fail(cid);
            }
        }
        self.conns.contains(cid)
    }

    /// Emergency callback, then shutdown.
    fn fail(&mut self, cid: ConnectionId) {
        if let Some(callback) = self.emergency.as_mut() {
            let mut ctx = CommandContext::new(&mut self.conns, cid);
            callback(&mut ctx);
        }
        self.conns.shutdown(cid);
    }

    // ── Outside control ──────────────────────────────────────────────────────

    /// Closes one socket.  False for unknown ids.
    pub fn shutdown(&mut self, cid: ConnectionId) -> bool {
        self.conns.shutdown(cid)
    }

    /// Closes every socket, the await socket included.
    pub fn shutdown_all(&mut self) {
        for cid in self.conns.ids() {
            self.conns.shutdown(cid);
        }
    }

    /// Starts the CLOSE queue of `cid`.  False for unknown ids, true without
    /// effect when the protocol has no CLOSE queue.
    pub fn close(&mut self, cid: ConnectionId, param: P::CloseParam) -> bool {
        self.conns.request_close(cid, param) != CloseRequest::UnknownConnection
    }

    /// Serializes `message` onto the send stack of `cid`.
    ///
    /// # Errors
    ///
    /// `SEND_DATA_STACK_FAIL` when serialization fails, `CONNECTION_GONE` for
    /// unknown ids.
    pub fn send(&mut self, cid: ConnectionId, message: &OutboundMessage<C>) -> Result<(), UnitError> {
        self.conns.send_message(cid, message)
    }

    /// Serializes `message` onto every client's send stack.
    ///
    /// # Errors
    ///
    /// `SEND_DATA_STACK_FAIL` when serialization fails.
    pub fn broadcast(&mut self, message: &OutboundMessage<C>) -> Result<usize, UnitError> {
        self.conns.broadcast(message, |_, _| true)
    }

    /// Pops and unserializes the oldest received message of `cid`.  Only
    /// useful without a dispatcher.
    ///
    /// # Errors
    ///
    /// `RECEIVE_DATA_STACK_FAIL` when the payload does not unserialize.
    pub fn next_received(&mut self, cid: ConnectionId) -> Result<Option<InboundMessage<C>>, UnitError> {
        self.conns.pop_message(cid)
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Client connections in id order, the await socket excluded.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.conns.client_ids()
    }

    pub fn client_count(&self) -> usize {
        self.conns.client_count()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    pub fn protocol_state(&self, cid: ConnectionId) -> StateSlot<P::Queue, P::Status> {
        self.conns.get(cid).and_then(|d| d.protocol_state)
    }

    pub fn command_state(&self, cid: ConnectionId) -> StateSlot<C::Queue, C::Status> {
        self.conns.get(cid).and_then(|d| d.command_state)
    }

    pub fn session(&self, cid: ConnectionId) -> Option<&C::Session> {
        self.conns.get(cid).map(|d| &d.session)
    }

    pub fn session_mut(&mut self, cid: ConnectionId) -> Option<&mut C::Session> {
        self.conns.get_mut(cid).map(|d| &mut d.session)
    }
}

/// The failure recorded when a connection outlives its alive interval.
fn idle_timeout(idle_for: u64) -> UnitError {
    UnitError::new(
        UnitErrorCode::AliveCheckFail,
        format!("connection idle for {idle_for}s"),
    )
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, ReactorError> {
    let unresolved = || ReactorError::Resolve {
        host: host.to_string(),
        port,
    };
    (host, port)
        .to_socket_addrs()
        .map_err(|_| unresolved())?
        .next()
        .ok_or_else(unresolved)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::net::TcpStream;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use super::clock::MockClock;
    use super::context::protocol_unit;
    use super::*;
    use crate::domain::payload::Raw;
    use crate::domain::units::ProtocolQueue;
    use crate::engine::UnitResult;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum TestQueue {
        Accept,
        Recv,
        Close,
        Alive,
    }

    impl ProtocolQueue for TestQueue {
        fn for_role(role: QueueRole) -> Option<Self> {
            match role {
                QueueRole::Accept => Some(TestQueue::Accept),
                QueueRole::Recv => Some(TestQueue::Recv),
                QueueRole::Close => Some(TestQueue::Close),
                QueueRole::Alive => Some(TestQueue::Alive),
                QueueRole::Connect | QueueRole::Send => None,
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum TestStatus {
        Start,
        Wait,
    }

    impl EntryStatus for TestStatus {
        const START: Self = TestStatus::Start;
    }

    struct TestProtocol;

    impl ProtocolSet for TestProtocol {
        type Queue = TestQueue;
        type Status = TestStatus;
        type Scratch = ();
        type CloseParam = u16;
    }

    struct NoCommands;

    impl CommandSet for NoCommands {
        type Queue = TestQueue;
        type Status = TestStatus;
        type Session = ();
        type Codec = Raw;
    }

    type TestReactor = Reactor<TestProtocol, NoCommands>;
    type Units = ProtocolUnits<TestProtocol, NoCommands>;

    const ALIVE_SECS: u64 = 5;

    fn config(max_connections: usize) -> ReactorConfig {
        ReactorConfig {
            max_connections,
            ..ReactorConfig::default()
        }
    }

    /// A unit that never finishes.
    fn stall(units: &mut Units, queue: TestQueue) {
        units.add_status_unit(
            queue,
            TestStatus::Start,
            protocol_unit(|_ctx| -> UnitResult<Option<TestStatus>> { Ok(Some(TestStatus::Start)) }),
        );
    }

    fn mock_clock(start: u64) -> (MockClock, Arc<AtomicU64>) {
        let now = Arc::new(AtomicU64::new(start));
        let handle = Arc::clone(&now);
        let mut clock = MockClock::new();
        clock
            .expect_now_secs()
            .returning(move || handle.load(Ordering::SeqCst));
        (clock, now)
    }

    fn tick(reactor: &mut TestReactor) {
        reactor
            .tick(Duration::from_millis(5), ALIVE_SECS)
            .expect("tick");
    }

    fn tick_until(reactor: &mut TestReactor, mut done: impl FnMut(&TestReactor) -> bool) {
        for _ in 0..400 {
            if done(reactor) {
                return;
            }
            tick(reactor);
        }
        panic!("condition not reached");
    }

    fn listening(reactor: &mut TestReactor) -> SocketAddr {
        reactor.listen("127.0.0.1", 0).expect("listen");
        reactor.local_addr().expect("local addr")
    }

    #[test]
    fn test_tick_without_sockets_fails() {
        // Arrange
        let mut reactor = TestReactor::new(config(10), Units::new()).unwrap();

        // Act
        let result = reactor.tick(Duration::from_millis(1), 0);

        // Assert
        assert!(matches!(result, Err(ReactorError::NoSockets)));
    }

    #[test]
    fn test_accepted_connection_starts_accept_queue() {
        let mut units = Units::new();
        stall(&mut units, TestQueue::Accept);
        let mut reactor = TestReactor::new(config(10), units).unwrap();
        let addr = listening(&mut reactor);

        let _client = TcpStream::connect(addr).unwrap();
        tick_until(&mut reactor, |r| r.client_count() == 1);

        let cid = reactor.connection_ids()[0];
        assert_eq!(
            reactor.protocol_state(cid),
            Some((TestQueue::Accept, TestStatus::Start))
        );
    }

    #[test]
    fn test_connection_ceiling_drops_extra_clients() {
        // Arrange
        let mut reactor = TestReactor::new(config(2), Units::new()).unwrap();
        let addr = listening(&mut reactor);

        // Act
        let _a = TcpStream::connect(addr).unwrap();
        let _b = TcpStream::connect(addr).unwrap();
        tick_until(&mut reactor, |r| r.client_count() == 2);
        let _c = TcpStream::connect(addr).unwrap();
        for _ in 0..20 {
            tick(&mut reactor);
        }

        // Assert
        assert_eq!(reactor.client_count(), 2);
    }

    #[test]
    fn test_stalled_protocol_times_out_with_one_emergency() {
        // Arrange: ACCEPT never completes and there is no way to recover.
        let mut units = Units::new();
        stall(&mut units, TestQueue::Accept);
        let (clock, now) = mock_clock(1_000);
        let emergencies = Rc::new(Cell::new(0u32));
        let counter = Rc::clone(&emergencies);
        let mut reactor = TestReactor::new(config(10), units)
            .unwrap()
            .with_clock(clock)
            .with_emergency(move |_ctx| counter.set(counter.get() + 1));
        let addr = listening(&mut reactor);
        let _client = TcpStream::connect(addr).unwrap();
        tick_until(&mut reactor, |r| r.client_count() == 1);

        // Act: still inside the interval, then past it.
        now.store(1_000 + ALIVE_SECS, Ordering::SeqCst);
        tick(&mut reactor);
        assert_eq!(reactor.client_count(), 1);
        now.store(1_000 + ALIVE_SECS + 1, Ordering::SeqCst);
        for _ in 0..5 {
            tick(&mut reactor);
        }

        // Assert
        assert_eq!(reactor.client_count(), 0);
        assert_eq!(emergencies.get(), 1);
    }

    #[test]
    fn test_idle_connection_starts_alive_check() {
        let mut units = Units::new();
        stall(&mut units, TestQueue::Alive);
        let (clock, now) = mock_clock(1_000);
        let mut reactor = TestReactor::new(config(10), units)
            .unwrap()
            .with_clock(clock);
        let addr = listening(&mut reactor);
        let _client = TcpStream::connect(addr).unwrap();
        tick_until(&mut reactor, |r| r.client_count() == 1);
        let cid = reactor.connection_ids()[0];
        assert_eq!(reactor.protocol_state(cid), None);

        now.store(1_000 + ALIVE_SECS + 1, Ordering::SeqCst);
        tick(&mut reactor);

        assert_eq!(
            reactor.protocol_state(cid),
            Some((TestQueue::Alive, TestStatus::Start))
        );
    }

    #[test]
    fn test_unanswered_alive_check_tears_connection_down() {
        let mut units = Units::new();
        stall(&mut units, TestQueue::Alive);
        let (clock, now) = mock_clock(1_000);
        let emergencies = Rc::new(Cell::new(0u32));
        let counter = Rc::clone(&emergencies);
        let mut reactor = TestReactor::new(config(10), units)
            .unwrap()
            .with_clock(clock)
            .with_emergency(move |_ctx| counter.set(counter.get() + 1));
        let addr = listening(&mut reactor);
        let _client = TcpStream::connect(addr).unwrap();
        tick_until(&mut reactor, |r| r.client_count() == 1);

        // First interval starts the check, the second one expires it.
        now.store(1_006, Ordering::SeqCst);
        tick(&mut reactor);
        assert_eq!(reactor.client_count(), 1);
        now.store(1_012, Ordering::SeqCst);
        tick(&mut reactor);

        assert_eq!(reactor.client_count(), 0);
        assert_eq!(emergencies.get(), 1);
    }

    #[test]
    fn test_close_reports_unknown_and_started() {
        let mut units = Units::new();
        stall(&mut units, TestQueue::Close);
        let mut reactor = TestReactor::new(config(10), units).unwrap();
        let addr = listening(&mut reactor);
        let _client = TcpStream::connect(addr).unwrap();
        tick_until(&mut reactor, |r| r.client_count() == 1);
        let cid = reactor.connection_ids()[0];

        assert!(!reactor.close(ConnectionId::new(999), 1000));
        assert!(reactor.close(cid, 1000));
        assert_eq!(
            reactor.protocol_state(cid),
            Some((TestQueue::Close, TestStatus::Start))
        );
    }

    #[test]
    fn test_close_without_close_queue_is_accepted_without_effect() {
        let mut reactor = TestReactor::new(config(10), Units::new()).unwrap();
        let addr = listening(&mut reactor);
        let _client = TcpStream::connect(addr).unwrap();
        tick_until(&mut reactor, |r| r.client_count() == 1);
        let cid = reactor.connection_ids()[0];

        assert!(reactor.close(cid, 1000));
        assert_eq!(reactor.protocol_state(cid), None);
    }

    #[test]
    fn test_unregistered_status_leaves_connection_stalled() {
        // ACCEPT moves to a status nothing is registered for.
        let mut units = Units::new();
        units.add_status_unit(
            TestQueue::Accept,
            TestStatus::Start,
            protocol_unit(|_ctx| -> UnitResult<Option<TestStatus>> { Ok(Some(TestStatus::Wait)) }),
        );
        let mut reactor = TestReactor::new(config(10), units).unwrap();
        let addr = listening(&mut reactor);
        let _client = TcpStream::connect(addr).unwrap();
        tick_until(&mut reactor, |r| r.client_count() == 1);
        let cid = reactor.connection_ids()[0];

        for _ in 0..3 {
            tick(&mut reactor);
        }

        assert_eq!(reactor.client_count(), 1);
        assert_eq!(
            reactor.protocol_state(cid),
            Some((TestQueue::Accept, TestStatus::Wait))
        );
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut reactor = TestReactor::new(config(10), Units::new()).unwrap();
        let addr = listening(&mut reactor);
        let _client = TcpStream::connect(addr).unwrap();
        tick_until(&mut reactor, |r| r.client_count() == 1);
        let cid = reactor.connection_ids()[0];

        assert!(reactor.shutdown(cid));
        assert!(!reactor.shutdown(cid));
        reactor.shutdown_all();
        assert!(reactor.is_empty());
    }

    #[test]
    fn test_read_ahead_stops_at_inbound_limit_and_resumes() {
        // Arrange: RECV never consumes anything.
        use std::io::Write;
        const LIMIT: usize = 4096;
        let mut units = Units::new();
        stall(&mut units, TestQueue::Recv);
        let config = ReactorConfig {
            max_inbound_bytes: LIMIT,
            ..config(10)
        };
        let mut reactor = TestReactor::new(config, units).unwrap();
        let addr = listening(&mut reactor);
        let mut client = TcpStream::connect(addr).unwrap();
        tick_until(&mut reactor, |r| r.client_count() == 1);
        let cid = reactor.connection_ids()[0];

        // Act
        client.write_all(&[7u8; 32 * 1024]).unwrap();
        tick_until(&mut reactor, |r| {
            r.conns.get(cid).is_some_and(|d| d.inbound.len() >= LIMIT)
        });
        for _ in 0..10 {
            tick(&mut reactor);
        }

        // Assert
        let d = reactor.conns.get(cid).unwrap();
        assert_eq!(d.inbound.len(), LIMIT);
        assert!(d.read_paused);

        // Consuming makes room and the next poll reads again without a new
        // readiness event.
        let _ = reactor.conns.get_mut(cid).unwrap().inbound.take(LIMIT);
        tick(&mut reactor);
        assert_eq!(reactor.conns.get(cid).unwrap().inbound.len(), LIMIT);
    }

    #[test]
    fn test_idle_timeout_carries_alive_check_code() {
        let e = idle_timeout(12);
        assert_eq!(e.code, UnitErrorCode::AliveCheckFail);
        assert_eq!(e.code.code(), 190);
        assert!(e.message.contains("12s"));
    }

    #[test]
    fn test_resolve_rejects_unknown_host() {
        let result = resolve("no-such-host.invalid", 80);
        assert!(matches!(result, Err(ReactorError::Resolve { .. })));
    }
}
