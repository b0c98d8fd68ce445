//! Infrastructure layer: building and driving the reactor.

pub mod server_loop;

pub use server_loop::{build_reactor, drive, run_server, ChatReactor};
