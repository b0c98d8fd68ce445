//! Pure data types: no sockets, no callbacks.

pub mod config;
pub mod descriptor;
pub mod payload;
pub mod units;
