//! Application layer: the chat command units and their dispatcher.

pub mod chat;

pub use chat::{chat_commands, dispatch, on_emergency, ChatCommands, ChatQueue, ChatSession, ChatStep};
