//! sockman-client library crate.
//!
//! A console chat client: connects to a `sockman-server` with the
//! `sockman-websocket` client units, sends JSON requests and logs every
//! event it receives.
//!
//! ```text
//! [sockman-client]
//!   ├── domain/           ClientConfig, request builders
//!   ├── application/      the DISPLAY command unit
//!   └── infrastructure/   reactor wiring, connect and the tick loop
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;
