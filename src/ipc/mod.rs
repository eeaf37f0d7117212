//! IPC module for daemon-shell communication

mod protocol;
mod server;

pub use server::Server;
