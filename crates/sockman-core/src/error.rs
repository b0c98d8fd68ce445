//! Error types of the reactor and of status units.
//!
//! Two layers, mirroring who can recover:
//!
//! - [`ReactorError`] – listen / bind / connect / poll failures.  These are
//!   returned to the process that owns the reactor.
//! - [`UnitError`] – a failure inside one connection's status unit.  The
//!   reactor logs it, runs the emergency callback and shuts that connection
//!   down; other connections are unaffected.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::domain::payload::CodecError;

/// Stable numeric codes carried by [`UnitError`], used in log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitErrorCode {
    HandshakeFail,
    ReceivingFail,
    ReceiveDataStackFail,
    /// A send unit found nothing to put on the wire.
    SendingDataSetFail,
    SendingFail,
    MethodCallFail,
    SendDataStackFail,
    CloseFail,
    CommandMismatch,
    /// A connection stayed idle past its alive interval or alive-check timeout.
    AliveCheckFail,
    MalformedFrame,
    ConnectionGone,
    EmergencyShutdown,
}

impl UnitErrorCode {
    /// Numeric code written to the log.
    pub fn code(self) -> u32 {
        match self {
            UnitErrorCode::HandshakeFail => 10,
            UnitErrorCode::ReceivingFail => 70,
            UnitErrorCode::ReceiveDataStackFail => 80,
            UnitErrorCode::SendingDataSetFail => 90,
            UnitErrorCode::SendingFail => 100,
            UnitErrorCode::MethodCallFail => 140,
            UnitErrorCode::SendDataStackFail => 150,
            UnitErrorCode::CloseFail => 160,
            UnitErrorCode::CommandMismatch => 180,
            UnitErrorCode::AliveCheckFail => 190,
            UnitErrorCode::MalformedFrame => 200,
            UnitErrorCode::ConnectionGone => 210,
            UnitErrorCode::EmergencyShutdown => 9000,
        }
    }
}

/// A per-connection failure raised by a status unit or a context primitive.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("unit error {} ({:?}): {message}", .code.code(), .code)]
pub struct UnitError {
    pub code: UnitErrorCode,
    pub message: String,
}

impl UnitError {
    pub fn new(code: UnitErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<CodecError> for UnitError {
    fn from(e: CodecError) -> Self {
        let code = match e {
            CodecError::Serialize(_) => UnitErrorCode::SendDataStackFail,
            CodecError::Unserialize(_) => UnitErrorCode::ReceiveDataStackFail,
        };
        UnitError::new(code, e.to_string())
    }
}

/// Failures that stop the reactor or one of its setup calls.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// `tick` was called with no socket registered.
    #[error("no sockets registered")]
    NoSockets,

    /// The readiness poll itself failed.
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),

    /// `host:port` did not resolve to any address.
    #[error("could not resolve {host}:{port}")]
    Resolve { host: String, port: u16 },

    /// Creating, binding or listening on the await socket failed.
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Every connect attempt failed.
    #[error("failed to connect to {addr} after {attempts} attempt(s)")]
    Connect { addr: SocketAddr, attempts: u32 },

    /// The UDP rendezvous answer was not the empty identity datagram.
    #[error("connection to {addr} rejected by peer")]
    Rejected { addr: SocketAddr },

    /// Socket setup after connect failed (non-blocking mode, registration).
    #[error("socket setup failed: {0}")]
    Socket(#[source] io::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_error_display_includes_numeric_code() {
        let e = UnitError::new(UnitErrorCode::HandshakeFail, "retry limit reached");
        let text = e.to_string();
        assert!(text.contains("10"), "got: {text}");
        assert!(text.contains("retry limit reached"));
    }

    #[test]
    fn test_emergency_shutdown_code_is_9000() {
        assert_eq!(UnitErrorCode::EmergencyShutdown.code(), 9000);
    }

    #[test]
    fn test_codec_errors_map_to_stack_codes() {
        let e: UnitError = CodecError::Unserialize("bad".into()).into();
        assert_eq!(e.code, UnitErrorCode::ReceiveDataStackFail);
        let e: UnitError = CodecError::Serialize("bad".into()).into();
        assert_eq!(e.code, UnitErrorCode::SendDataStackFail);
    }
}
