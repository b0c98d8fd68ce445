//! Chat command units.
//!
//! The dispatcher maps the request's `cmd` onto a [`ChatQueue`]; each queue
//! is a single `Start` unit that answers or broadcasts and ends.

use sockman_core::{
    command_unit, CommandContext, CommandSet, CommandUnits, EntryStatus, Json, UnitError,
    UnitErrorCode, UnitResult,
};
use sockman_websocket::{CloseFrame, WsServer};
use tracing::{debug, info, warn};

use crate::domain::{ChatEvent, ChatRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatQueue {
    Entrance,
    Message,
    Echo,
    Exit,
}

impl ChatQueue {
    /// The queue named by a request's `cmd` field.
    pub fn from_cmd(cmd: &str) -> Option<Self> {
        match cmd {
            "entrance" => Some(ChatQueue::Entrance),
            "message" => Some(ChatQueue::Message),
            "echo" => Some(ChatQueue::Echo),
            "exit" => Some(ChatQueue::Exit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatStep {
    Start,
}

impl EntryStatus for ChatStep {
    const START: Self = ChatStep::Start;
}

/// Per-connection chat state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatSession {
    /// Set by `entrance`.
    pub user: Option<String>,
}

/// Command definition of the chat server.
#[derive(Debug)]
pub struct ChatCommands;

impl CommandSet for ChatCommands {
    type Queue = ChatQueue;
    type Status = ChatStep;
    type Session = ChatSession;
    type Codec = Json<ChatRequest, ChatEvent>;
}

pub type ChatContext<'r> = CommandContext<'r, WsServer, ChatCommands>;

/// Selects the command queue for `request`.
///
/// # Errors
///
/// `COMMAND_MISMATCH` for an unknown `cmd`; the connection is then dropped.
pub fn dispatch(_ctx: &mut ChatContext<'_>, request: &ChatRequest) -> Result<Option<ChatQueue>, UnitError> {
    ChatQueue::from_cmd(&request.cmd).map(Some).ok_or_else(|| {
        UnitError::new(
            UnitErrorCode::CommandMismatch,
            format!("unknown command '{}'", request.cmd),
        )
    })
}

/// Builds the chat unit table.
pub fn chat_commands() -> CommandUnits<WsServer, ChatCommands> {
    let mut commands = CommandUnits::<WsServer, ChatCommands>::new();
    commands.add_status_unit(ChatQueue::Entrance, ChatStep::Start, command_unit(entrance));
    commands.add_status_unit(ChatQueue::Message, ChatStep::Start, command_unit(message));
    commands.add_status_unit(ChatQueue::Echo, ChatStep::Start, command_unit(echo));
    commands.add_status_unit(ChatQueue::Exit, ChatStep::Start, command_unit(exit));
    commands
}

/// Tells the remaining members that a connection was lost.
pub fn on_emergency(ctx: &mut ChatContext<'_>) {
    let cid = ctx.id();
    let Some(user) = ctx.session().ok().and_then(|s| s.user.take()) else {
        warn!(%cid, "connection lost before entrance");
        return;
    };
    warn!(%cid, %user, "connection lost");
    let members = ctx.client_count().saturating_sub(1);
    if let Err(e) = ctx.broadcast(&ChatEvent::Left { user, members }, true) {
        warn!(%cid, code = e.code.code(), "{}", e.message);
    }
}

fn display_name(ctx: &mut ChatContext<'_>) -> Result<String, UnitError> {
    let cid = ctx.id();
    Ok(ctx
        .session()?
        .user
        .clone()
        .unwrap_or_else(|| format!("guest-{cid}")))
}

fn comment(ctx: &ChatContext<'_>) -> String {
    ctx.received()
        .and_then(|request| request.comment.clone())
        .unwrap_or_default()
}

fn entrance(ctx: &mut ChatContext<'_>) -> UnitResult<Option<ChatStep>> {
    let cid = ctx.id();
    let user = ctx
        .received()
        .and_then(|request| request.user.clone())
        .unwrap_or_else(|| format!("guest-{cid}"));
    ctx.session()?.user = Some(user.clone());

    let members = ctx.client_count();
    info!(%cid, %user, members, "entered");
    ctx.broadcast(&ChatEvent::Entered { user, members }, false)?;
    Ok(None)
}

/// Broadcasts to everyone who entered, plus the sender.
fn message(ctx: &mut ChatContext<'_>) -> UnitResult<Option<ChatStep>> {
    let me = ctx.id();
    let event = ChatEvent::Message {
        user: display_name(ctx)?,
        comment: comment(ctx),
    };
    ctx.broadcast_filtered(&event, |cid, session| cid == me || session.user.is_some())?;
    Ok(None)
}

fn echo(ctx: &mut ChatContext<'_>) -> UnitResult<Option<ChatStep>> {
    let event = ChatEvent::Echo { comment: comment(ctx) };
    ctx.send(&event)?;
    Ok(None)
}

/// Says goodbye to the others and starts the close handshake.
fn exit(ctx: &mut ChatContext<'_>) -> UnitResult<Option<ChatStep>> {
    let cid = ctx.id();
    let user = display_name(ctx)?;
    ctx.session()?.user = None;

    let members = ctx.client_count().saturating_sub(1);
    info!(%cid, %user, "exit");
    ctx.broadcast(&ChatEvent::Left { user, members }, true)?;
    if !ctx.close(cid, CloseFrame::normal()) {
        debug!(%cid, "connection already gone, close not started");
    }
    Ok(None)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_commands_map_to_queues() {
        assert_eq!(ChatQueue::from_cmd("entrance"), Some(ChatQueue::Entrance));
        assert_eq!(ChatQueue::from_cmd("message"), Some(ChatQueue::Message));
        assert_eq!(ChatQueue::from_cmd("echo"), Some(ChatQueue::Echo));
        assert_eq!(ChatQueue::from_cmd("exit"), Some(ChatQueue::Exit));
    }

    #[test]
    fn test_command_names_are_case_sensitive() {
        assert_eq!(ChatQueue::from_cmd("EXIT"), None);
        assert_eq!(ChatQueue::from_cmd(""), None);
    }

    #[test]
    fn test_every_queue_has_a_start_unit() {
        let commands = chat_commands();
        for queue in [ChatQueue::Entrance, ChatQueue::Message, ChatQueue::Echo, ChatQueue::Exit] {
            assert!(commands.unit(queue, ChatStep::Start).is_some(), "{queue:?} missing");
        }
    }
}
