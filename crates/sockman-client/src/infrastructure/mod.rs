//! Infrastructure layer: connecting and driving the reactor.

pub mod client_loop;

pub use client_loop::{build_reactor, connect, drive, run_client, ConsoleReactor};
