//! sockman-server library crate.
//!
//! A JSON chat server over WebSocket.  Every connection runs the
//! `sockman-websocket` server units; complete text messages are parsed as
//! [`domain::ChatRequest`] and dispatched to a chat command queue.
//!
//! ```text
//! browser / sockman-client   (JSON over WebSocket)
//!         ↕
//! [sockman-server]
//!   ├── domain/           ServerConfig, ChatRequest, ChatEvent
//!   ├── application/      chat command units + dispatcher
//!   └── infrastructure/   reactor wiring and the tick loop
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;
