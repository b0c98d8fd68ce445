//! Queue and status identifiers, and the trait bundles that describe a
//! protocol definition or a command definition.
//!
//! A definition is a zero-sized marker type naming its queue enum, its status
//! enum and the per-connection state it needs.  The WebSocket server, for
//! example, is `WsServer` with `ServerQueue` / `ServerStatus`; an application
//! supplies its own [`CommandSet`].

use std::fmt::Debug;
use std::hash::Hash;

use crate::domain::payload::PayloadCodec;

/// A queue or status identifier.
///
/// Every small `Copy` enum with `Eq + Hash + Debug` qualifies automatically.
pub trait UnitId: Copy + Eq + Hash + Debug + 'static {}

impl<T: Copy + Eq + Hash + Debug + 'static> UnitId for T {}

/// A status enumeration with a distinguished entry status.
pub trait EntryStatus: UnitId {
    /// The status every freshly started queue begins at.
    const START: Self;
}

/// Protocol phases the reactor starts by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    /// Server side, right after a connection is accepted.
    Accept,
    /// Client side, right after `connect` succeeds.
    Connect,
    /// Inbound data is waiting and the protocol engine is idle.
    Recv,
    /// The send stack has an item and the protocol engine is idle.
    Send,
    /// `close()` was requested.
    Close,
    /// The connection has been idle longer than the alive interval.
    Alive,
}

/// A protocol queue enumeration that can name the queue for each role.
pub trait ProtocolQueue: UnitId {
    /// The queue playing `role`, or `None` when the protocol has no such phase.
    fn for_role(role: QueueRole) -> Option<Self>;
}

/// Describes a protocol (framing / transport) definition.
pub trait ProtocolSet: 'static {
    type Queue: ProtocolQueue;
    type Status: EntryStatus;
    /// Per-connection scratch state owned by the protocol units.
    type Scratch: Default + 'static;
    /// Payload registered by `close()` and consumed by the CLOSE queue.
    type CloseParam: Clone + 'static;
}

/// Describes an application command definition.
pub trait CommandSet: 'static {
    type Queue: UnitId;
    type Status: EntryStatus;
    /// Per-connection user storage, visible to protocol and command units.
    type Session: Default + 'static;
    /// Applied on send-stack push and receive-stack pop.
    type Codec: PayloadCodec + Default;
}

/// The message type command units receive.
pub type InboundMessage<C> = <<C as CommandSet>::Codec as PayloadCodec>::Inbound;

/// The message type command units send.
pub type OutboundMessage<C> = <<C as CommandSet>::Codec as PayloadCodec>::Outbound;

/// An engine state slot: `None` is idle, `Some((queue, status))` is running.
pub type StateSlot<Q, S> = Option<(Q, S)>;
