//! # sockman-websocket
//!
//! RFC 6455 WebSocket for the sockman reactor, as two protocol definitions:
//! [`WsServer`] (built by [`server_units`]) and [`WsClient`] (built by
//! [`client_units`]).  Command layers see whole text messages; framing,
//! masking, ping/pong and the close handshake stay in the protocol units.
//!
//! - **`codec`** – Frame header parsing, masking and encoding.  Pure functions.
//! - **`handshake`** – The HTTP upgrade request and response.
//! - **`session`** – Per-connection scratch state and [`CloseFrame`].
//! - **`units`** – Receive, send, close and alive units shared by both roles.
//! - **`server`** / **`client`** – Queue and status enums plus the unit tables.
//!
//! ```no_run
//! use sockman_core::{Raw, Reactor, ReactorConfig, CommandSet};
//! use sockman_websocket::{server_units, ServerOptions, ServerQueue, ServerStatus, WsServer};
//!
//! struct Echo;
//! impl CommandSet for Echo {
//!     type Queue = ServerQueue;
//!     type Status = ServerStatus;
//!     type Session = ();
//!     type Codec = Raw;
//! }
//!
//! let units = server_units::<Echo>(&ServerOptions::new("localhost", 10000));
//! let mut reactor = Reactor::<WsServer, Echo>::new(ReactorConfig::default(), units)?;
//! reactor.listen("localhost", 10000)?;
//! loop {
//!     reactor.run_once()?;
//! }
//! # Ok::<(), sockman_core::ReactorError>(())
//! ```

pub mod client;
pub mod codec;
pub mod handshake;
pub mod server;
pub mod session;
pub mod units;

pub use client::{client_units, ClientOptions, ClientQueue, ClientStatus, WsClient};
pub use codec::{FrameError, MaskingRole, Opcode, DEFAULT_MAX_PAYLOAD};
pub use handshake::HandshakeError;
pub use server::{server_units, ServerOptions, ServerQueue, ServerStatus, WsServer};
pub use session::{CloseFrame, WsScratch, CLOSE_NORMAL};
pub use units::{FrameOptions, FrameStatus, ForcedCloseHook};
