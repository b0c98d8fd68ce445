//! # sockman-core
//!
//! A cycle-driven, single-threaded socket reactor plus a generic status-unit
//! engine.  Protocols built on top of it are written as tables of small
//! callbacks ("status units") instead of hand-written I/O loops.
//!
//! # Architecture overview
//!
//! ```text
//! Reactor::tick()
//!  ├─ poll readiness (mio), drain sockets into per-connection inbound buffers
//!  ├─ accept / UDP rendezvous on the await socket
//!  └─ for every connection, in id order:
//!       ├─ start RECV / SEND / ALIVE when the protocol engine is idle
//!       ├─ keepalive timeout policy
//!       ├─ protocol engine: one status unit   (ProtocolContext)
//!       ├─ dispatcher: pick a command queue   (CommandContext)
//!       └─ command engine: one status unit    (CommandContext)
//! ```
//!
//! - **`domain`** – Pure data: connection ids, partial I/O buffers, the traits
//!   describing a protocol or command definition, payload codecs and config.
//! - **`engine`** – The `(queue, status) -> callback` table and the [`Halt`]
//!   signals a callback can raise.
//! - **`reactor`** – Sockets, the descriptor store, the two context types and
//!   the tick loop.

pub mod domain;
pub mod engine;
pub mod error;
pub mod log;
pub mod reactor;

pub use domain::config::{ConfigError, ReactorConfig};
pub use domain::descriptor::{ConnectionId, Flush, TransportKind};
pub use domain::payload::{CodecError, Json, PayloadCodec, Raw};
pub use domain::units::{
    CommandSet, EntryStatus, InboundMessage, OutboundMessage, ProtocolQueue, ProtocolSet,
    QueueRole, UnitId,
};
pub use engine::{Drive, Halt, StatusUnitEngine, UnitResult};
pub use error::{ReactorError, UnitError, UnitErrorCode};
pub use log::LogEvent;
pub use reactor::clock::{Clock, SystemClock};
pub use reactor::context::{
    command_unit, protocol_unit, CommandContext, CommandUnit, CommandUnits, ProtocolContext,
    ProtocolUnit, ProtocolUnits,
};
pub use reactor::Reactor;
