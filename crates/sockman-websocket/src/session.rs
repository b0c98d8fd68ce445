//! Per-connection state owned by the WebSocket status units.

use crate::codec::{FrameHead, Opcode};
use crate::handshake::HandshakeRequest;

/// Close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Payload of `close()`: the status code we send and expect echoed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: Vec<u8>,
}

impl CloseFrame {
    pub fn new(code: u16, reason: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal() -> Self {
        Self::new(CLOSE_NORMAL, Vec::new())
    }
}

/// The frame currently being received.
#[derive(Debug, Clone, Default)]
pub struct FrameInProgress {
    pub head: Option<FrameHead>,
    pub length: u64,
    pub mask: Option<[u8; 4]>,
}

/// A fragmented data message being reassembled.
#[derive(Debug, Clone)]
pub struct Fragments {
    pub opcode: Opcode,
    pub data: Vec<u8>,
}

/// Protocol scratch record of one WebSocket connection.
#[derive(Debug, Default)]
pub struct WsScratch {
    /// Raw handshake bytes received so far.
    pub(crate) handshake: Vec<u8>,
    pub(crate) request: Option<HandshakeRequest>,
    /// Whether the reply being sent accepts the upgrade.
    pub(crate) accepted: bool,
    pub(crate) handshake_retry: u32,
    pub(crate) recv_retry: u32,
    pub(crate) frame: FrameInProgress,
    pub(crate) fragments: Option<Fragments>,
    /// Payload of the ping being answered.
    pub(crate) pong: Vec<u8>,
    /// Set once the opening handshake completed.
    pub(crate) open: bool,
}

impl WsScratch {
    /// True once the opening handshake has completed.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Rejected handshake attempts so far.
    pub fn handshake_retries(&self) -> u32 {
        self.handshake_retry
    }
}
