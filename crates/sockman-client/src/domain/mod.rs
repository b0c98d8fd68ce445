//! Domain layer: configuration and request builders.

pub mod config;

pub use config::ClientConfig;

use serde_json::{json, Value};

/// `{"cmd":"entrance","user":…}`
pub fn entrance_request(user: &str) -> Value {
    json!({ "cmd": "entrance", "user": user })
}

/// `{"cmd":"message","comment":…}`
pub fn message_request(comment: &str) -> Value {
    json!({ "cmd": "message", "comment": comment })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
