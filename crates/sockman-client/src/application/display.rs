//! Command units of the console client: every received event is shown.

use serde_json::Value;
use sockman_core::{
    command_unit, CommandContext, CommandSet, CommandUnits, EntryStatus, Json, UnitError, UnitResult,
};
use sockman_websocket::WsClient;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsoleQueue {
    Display,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsoleStep {
    Start,
}

impl EntryStatus for ConsoleStep {
    const START: Self = ConsoleStep::Start;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsoleSession {
    /// Events shown so far.
    pub received: u64,
    /// The most recent event.
    pub last: Option<Value>,
}

#[derive(Debug)]
pub struct ConsoleCommands;

impl CommandSet for ConsoleCommands {
    type Queue = ConsoleQueue;
    type Status = ConsoleStep;
    type Session = ConsoleSession;
    type Codec = Json<Value, Value>;
}

pub type ConsoleContext<'r> = CommandContext<'r, WsClient, ConsoleCommands>;

/// Every event goes to DISPLAY.
pub fn dispatch(_ctx: &mut ConsoleContext<'_>, _event: &Value) -> Result<Option<ConsoleQueue>, UnitError> {
    Ok(Some(ConsoleQueue::Display))
}

pub fn console_commands() -> CommandUnits<WsClient, ConsoleCommands> {
    let mut commands = CommandUnits::<WsClient, ConsoleCommands>::new();
    commands.add_status_unit(ConsoleQueue::Display, ConsoleStep::Start, command_unit(display));
    commands
}

pub fn on_emergency(ctx: &mut ConsoleContext<'_>) {
    warn!(cid = %ctx.id(), "connection to the server lost");
}

fn display(ctx: &mut ConsoleContext<'_>) -> UnitResult<Option<ConsoleStep>> {
    let event = ctx.received().cloned().unwrap_or(Value::Null);
    info!(cid = %ctx.id(), %event, "event");

    let session = ctx.session()?;
    session.received += 1;
    session.last = Some(event);
    Ok(None)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_queue_is_registered() {
        let commands = console_commands();
        assert!(commands.unit(ConsoleQueue::Display, ConsoleStep::Start).is_some());
    }
}
