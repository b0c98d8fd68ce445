//! Connection identity and the partial-I/O buffers a descriptor carries.
//!
//! Everything here is plain data so the continuation logic of sized receive
//! and buffered send can be tested without a socket.
//!
//! # Why partial I/O buffers?
//!
//! Non-blocking sockets hand back whatever the kernel has right now.  A status
//! unit that asks for a 2-byte frame header may get one byte this tick and the
//! second byte three ticks later.  The [`ReceivingBuffer`] remembers how much
//! was asked for and what has arrived so far; the [`SendingBuffer`] remembers
//! which bytes the kernel has not accepted yet.

use std::collections::VecDeque;
use std::fmt;
use std::io;

/// Opaque identifier of one descriptor.
///
/// Assigned from a monotonically increasing counter and never reused within a
/// process lifetime.  Displayed as `#N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw counter value.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Transport of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Udp,
}

/// Result of one buffered-send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Every byte has been handed to the kernel.
    Done,
    /// Some bytes remain; call `sending()` again next tick.
    Pending,
}

// ── Sized receive ─────────────────────────────────────────────────────────────

/// Accumulator for a sized receive: exactly `size` bytes are collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivingBuffer {
    size: usize,
    data: Vec<u8>,
}

impl ReceivingBuffer {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            data: Vec::with_capacity(size),
        }
    }

    /// Bytes still missing.
    pub fn remaining(&self) -> usize {
        self.size - self.data.len()
    }

    /// Bytes accumulated so far.
    pub fn received(&self) -> usize {
        self.data.len()
    }

    /// Appends at most [`remaining`](Self::remaining) bytes from `bytes` and
    /// returns how many were taken.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let take = bytes.len().min(self.remaining());
        self.data.extend_from_slice(&bytes[..take]);
        take
    }

    pub fn is_complete(&self) -> bool {
        self.data.len() == self.size
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

// ── Buffered send ─────────────────────────────────────────────────────────────

/// Outbound bytes not yet accepted by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendingBuffer {
    data: Vec<u8>,
    offset: usize,
}

impl SendingBuffer {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, offset: 0 }
    }

    /// The unsent remainder.
    pub fn pending(&self) -> &[u8] {
        &self.data[self.offset..]
    }

    /// Marks `n` more bytes as written.
    pub fn advance(&mut self, n: usize) {
        self.offset = (self.offset + n).min(self.data.len());
    }

    pub fn is_flushed(&self) -> bool {
        self.offset == self.data.len()
    }
}

// ── Inbound read-ahead ────────────────────────────────────────────────────────

/// Why a socket stopped producing bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEnd {
    /// Orderly shutdown by the peer (`read` returned 0).
    Eof,
    /// Connection reset / aborted / broken pipe.
    Reset,
    /// Any other I/O failure.
    Failed(io::ErrorKind),
}

impl fmt::Display for ReadEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadEnd::Eof => write!(f, "peer closed the connection"),
            ReadEnd::Reset => write!(f, "connection reset by peer"),
            ReadEnd::Failed(kind) => write!(f, "socket read failed: {kind}"),
        }
    }
}

/// Bytes drained from the socket but not yet consumed by a status unit.
///
/// mio reports readiness edge-triggered, so each readiness event drains the
/// socket until it would block.  Receives are then served from here.
#[derive(Debug, Default)]
pub struct InboundBuffer {
    bytes: VecDeque<u8>,
    end: Option<ReadEnd>,
}

impl InboundBuffer {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.bytes.extend(bytes);
    }

    /// Removes and returns up to `max` bytes from the front.
    pub fn take(&mut self, max: usize) -> Vec<u8> {
        let n = max.min(self.bytes.len());
        self.bytes.drain(..n).collect()
    }

    /// Puts `bytes` back in front of everything still buffered.
    pub fn unread(&mut self, bytes: &[u8]) {
        for &b in bytes.iter().rev() {
            self.bytes.push_front(b);
        }
    }

    pub fn end(&self) -> Option<ReadEnd> {
        self.end
    }

    pub fn set_end(&mut self, end: ReadEnd) {
        if self.end.is_none() {
            self.end = Some(end);
        }
    }

    /// True when a receive would make progress: data is buffered or the
    /// stream has ended and the end must be reported.
    pub fn is_ready(&self) -> bool {
        !self.bytes.is_empty() || self.end.is_some()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
