//! Domain layer: configuration and the JSON chat messages.  No I/O.

pub mod config;
pub mod messages;

pub use config::ServerConfig;
pub use messages::{ChatEvent, ChatRequest};
