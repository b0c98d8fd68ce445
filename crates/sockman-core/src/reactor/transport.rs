//! Raw sockets owned by descriptors, and the calls that create them.
//!
//! Four shapes of socket exist:
//!
//! | Variant    | Created by                         | Role                        |
//! |------------|------------------------------------|-----------------------------|
//! | `Listener` | [`open_listener`]                  | TCP await socket            |
//! | `UdpAwait` | [`open_udp_await`]                 | UDP await socket            |
//! | `Tcp`      | accept / [`connect_tcp`]           | one TCP connection          |
//! | `Udp`      | [`open_udp_peer`] / [`connect_udp`]| one UDP peer, `connect`ed   |
//!
//! # UDP rendezvous
//!
//! UDP has no accept.  A client sends an empty "identity" datagram to the
//! await socket; the server opens a fresh socket for that peer and answers
//! from it with another empty datagram.  From then on both sides talk over the
//! per-peer socket, which the reactor treats exactly like a TCP stream.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr};
use std::thread;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Interest, Registry, Token};
use socket2::{Domain, Protocol, Type};
use tracing::{debug, warn};

use crate::domain::descriptor::{InboundBuffer, ReadEnd, TransportKind};
use crate::error::ReactorError;
use crate::log::LogEvent;

/// Largest datagram read from a UDP socket.
const MAX_DATAGRAM: usize = 65_535;

/// Listen backlog of the TCP await socket.
const LISTEN_BACKLOG: i32 = 1024;

/// Outcome of one [`Socket::fill`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Filled {
    pub(crate) bytes: usize,
    /// Reading stopped at the inbound limit with the kernel possibly holding more.
    pub(crate) paused: bool,
}

pub(crate) enum Socket {
    Listener(TcpListener),
    UdpAwait(UdpSocket),
    Tcp(TcpStream),
    Udp(UdpSocket),
}

impl Socket {
    pub(crate) fn kind(&self) -> TransportKind {
        match self {
            Socket::Listener(_) | Socket::Tcp(_) => TransportKind::Tcp,
            Socket::UdpAwait(_) | Socket::Udp(_) => TransportKind::Udp,
        }
    }

    pub(crate) fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        match self {
            Socket::Listener(s) => registry.register(s, token, Interest::READABLE),
            Socket::UdpAwait(s) | Socket::Udp(s) => registry.register(s, token, Interest::READABLE),
            Socket::Tcp(s) => registry.register(s, token, Interest::READABLE),
        }
    }

    pub(crate) fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Socket::Listener(s) => registry.deregister(s),
            Socket::UdpAwait(s) | Socket::Udp(s) => registry.deregister(s),
            Socket::Tcp(s) => registry.deregister(s),
        }
    }

    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Socket::Listener(s) => s.local_addr(),
            Socket::UdpAwait(s) | Socket::Udp(s) => s.local_addr(),
            Socket::Tcp(s) => s.local_addr(),
        }
    }

    /// Half-closes a TCP stream.  Dropping the socket closes it.
    pub(crate) fn shutdown(&self) {
        if let Socket::Tcp(s) = self {
            let _ = s.shutdown(Shutdown::Both);
        }
    }

    /// Reads what the kernel holds into `inbound` until would-block, the end
    /// of the stream, or `inbound` holding `limit` bytes.
    ///
    /// Stopping at `limit` leaves data in the kernel that no new readiness
    /// event will announce; [`Filled::paused`] tells the caller to come back.
    pub(crate) fn fill(&mut self, inbound: &mut InboundBuffer, chunk: usize, limit: usize) -> Filled {
        let size = match self {
            Socket::Udp(_) => MAX_DATAGRAM,
            _ => chunk.max(1),
        };
        let mut buf = vec![0u8; size];
        let mut filled = Filled::default();

        while inbound.end().is_none() {
            if inbound.len() >= limit {
                filled.paused = true;
                break;
            }
            let result = match self {
                Socket::Tcp(s) => s.read(&mut buf),
                Socket::Udp(s) => s.recv(&mut buf),
                Socket::Listener(_) | Socket::UdpAwait(_) => return filled,
            };
            match result {
                // An empty datagram is a repeated identity, not the end.
                Ok(0) if self.kind() == TransportKind::Udp => continue,
                Ok(0) => inbound.set_end(ReadEnd::Eof),
                Ok(n) => {
                    inbound.extend(&buf[..n]);
                    filled.bytes += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_peer_reset(&e) => inbound.set_end(ReadEnd::Reset),
                Err(e) => {
                    warn!(event = %LogEvent::SocketError, "socket read failed: {e}");
                    inbound.set_end(ReadEnd::Failed(e.kind()));
                }
            }
        }
        filled
    }

    /// Sends one datagram from the UDP await socket to `peer`.
    pub(crate) fn send_to(&self, data: &[u8], peer: SocketAddr) -> io::Result<usize> {
        match self {
            Socket::UdpAwait(s) => s.send_to(data, peer),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "only the udp await socket addresses peers",
            )),
        }
    }

    /// One non-blocking write.  UDP sends `data` as a single datagram.
    pub(crate) fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            Socket::Tcp(s) => s.write(data),
            Socket::Udp(s) => s.send(data),
            Socket::Listener(_) | Socket::UdpAwait(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "await sockets carry no data",
            )),
        }
    }
}

fn is_peer_reset(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    )
}

fn unspecified_for(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}

// ── Await sockets ─────────────────────────────────────────────────────────────

/// Creates a non-blocking TCP listener with `SO_REUSEADDR`.
pub(crate) fn open_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(TcpListener::from_std(socket.into()))
}

/// Creates a non-blocking UDP await socket with `SO_REUSEADDR`.
pub(crate) fn open_udp_await(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = socket2::Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(UdpSocket::from_std(socket.into()))
}

/// Opens the per-peer socket answering a UDP rendezvous and sends the empty
/// identity datagram back from it.
pub(crate) fn open_udp_peer(local: SocketAddr, peer: SocketAddr) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddr::new(local.ip(), 0))?;
    socket.connect(peer)?;
    socket.send(&[])?;
    Ok(socket)
}

// ── Client side ───────────────────────────────────────────────────────────────

/// Connects over TCP, trying `attempts` times `interval` apart.
///
/// # Errors
///
/// [`ReactorError::Connect`] once every attempt failed, or
/// [`ReactorError::Socket`] if the stream cannot be made non-blocking.
pub(crate) fn connect_tcp(
    addr: SocketAddr,
    attempts: u32,
    interval: Duration,
) -> Result<TcpStream, ReactorError> {
    for attempt in 1..=attempts {
        match std::net::TcpStream::connect(addr) {
            Ok(stream) => {
                stream.set_nonblocking(true).map_err(|e| {
                    warn!(event = %LogEvent::NonblockSettingFail, %addr, "{e}");
                    ReactorError::Socket(e)
                })?;
                let _ = stream.set_nodelay(true);
                return Ok(TcpStream::from_std(stream));
            }
            Err(e) => {
                debug!(%addr, attempt, "connect attempt failed: {e}");
                if attempt < attempts {
                    thread::sleep(interval);
                }
            }
        }
    }
    Err(ReactorError::Connect { addr, attempts })
}

/// Performs the UDP rendezvous with a server's await socket.
///
/// Returns the non-blocking socket connected to the server's per-peer socket
/// together with that socket's address.
///
/// # Errors
///
/// [`ReactorError::Rejected`] if the answer is not an empty datagram,
/// [`ReactorError::Connect`] when no answer arrives within `attempts` tries,
/// [`ReactorError::Socket`] for local socket setup failures.
pub(crate) fn connect_udp(
    addr: SocketAddr,
    attempts: u32,
    interval: Duration,
) -> Result<(UdpSocket, SocketAddr), ReactorError> {
    let socket = std::net::UdpSocket::bind(unspecified_for(addr)).map_err(ReactorError::Socket)?;
    socket
        .set_read_timeout(Some(interval.max(Duration::from_millis(1))))
        .map_err(ReactorError::Socket)?;

    let mut buf = [0u8; 64];
    for attempt in 1..=attempts {
        if let Err(e) = socket.send_to(&[], addr) {
            debug!(%addr, attempt, "identity datagram not sent: {e}");
            thread::sleep(interval);
            continue;
        }
        match socket.recv_from(&mut buf) {
            Ok((0, peer)) => {
                socket.connect(peer).map_err(ReactorError::Socket)?;
                socket.set_nonblocking(true).map_err(|e| {
                    warn!(event = %LogEvent::NonblockSettingFail, %addr, "{e}");
                    ReactorError::Socket(e)
                })?;
                return Ok((UdpSocket::from_std(socket), peer));
            }
            Ok((n, peer)) => {
                debug!(%peer, bytes = n, "rendezvous answered with data");
                return Err(ReactorError::Rejected { addr });
            }
            Err(e) => debug!(%addr, attempt, "no rendezvous answer: {e}"),
        }
    }
    Err(ReactorError::Connect { addr, attempts })
}
