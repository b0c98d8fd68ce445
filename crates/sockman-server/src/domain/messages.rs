//! JSON messages of the chat protocol.
//!
//! Clients send a [`ChatRequest`] whose `cmd` field selects the command
//! queue; the server answers with tagged [`ChatEvent`]s:
//!
//! ```json
//! {"cmd":"entrance","user":"alice"}
//! {"type":"entered","user":"alice","members":1}
//! ```

use serde::{Deserialize, Serialize};

/// A request from a chat client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// `entrance`, `message`, `echo` or `exit`.
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ChatRequest {
    fn new(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            user: None,
            comment: None,
        }
    }

    pub fn entrance(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            ..Self::new("entrance")
        }
    }

    pub fn message(comment: impl Into<String>) -> Self {
        Self {
            comment: Some(comment.into()),
            ..Self::new("message")
        }
    }

    pub fn echo(comment: impl Into<String>) -> Self {
        Self {
            comment: Some(comment.into()),
            ..Self::new("echo")
        }
    }

    pub fn exit() -> Self {
        Self::new("exit")
    }
}

/// An event pushed to chat clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Someone entered; `members` counts the connections after entering.
    Entered { user: String, members: usize },
    Message { user: String, comment: String },
    /// Reply to `echo`, sent to the requester only.
    Echo { comment: String },
    /// Someone left; `members` counts the remaining connections.
    Left { user: String, members: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
