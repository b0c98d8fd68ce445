//! Log message kinds emitted by the reactor.
//!
//! Every internal log line goes through `tracing` with the kind as its
//! `event` field, e.g.
//!
//! ```text
//! WARN sockman_core::reactor: status unit not registered event=UNIT_NO_SETTING cid=#3 queue=Recv status=Mask
//! ```
//!
//! With no `tracing` subscriber installed all of it is discarded.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent {
    SocketError,
    AliveCheckTimeout,
    AliveCheckStartTimeout,
    SocketCreateFail,
    QueueStartFail,
    ConnectionLimit,
    SocketNoCount,
    ReceiveSizeNoSetting,
    SendDataNoSetting,
    UnitNoSetting,
    NonblockSettingFail,
}

impl LogEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            LogEvent::SocketError => "SOCKET_ERROR",
            LogEvent::AliveCheckTimeout => "ALIVE_CHECK_TIMEOUT",
            LogEvent::AliveCheckStartTimeout => "ALIVE_CHECK_START_TIMEOUT",
            LogEvent::SocketCreateFail => "SOCKET_CREATE_FAIL",
            LogEvent::QueueStartFail => "QUEUE_START_FAIL",
            LogEvent::ConnectionLimit => "CONNECTION_LIMIT",
            LogEvent::SocketNoCount => "SOCKET_NO_COUNT",
            LogEvent::ReceiveSizeNoSetting => "RECEIVE_SIZE_NO_SETTING",
            LogEvent::SendDataNoSetting => "SEND_DATA_NO_SETTING",
            LogEvent::UnitNoSetting => "UNIT_NO_SETTING",
            LogEvent::NonblockSettingFail => "NONBLOCK_SETTING_FAIL",
        }
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
