//! Application layer: the console command units.

pub mod display;

pub use display::{
    console_commands, dispatch, on_emergency, ConsoleCommands, ConsoleQueue, ConsoleSession, ConsoleStep,
};
