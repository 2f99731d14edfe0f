//! Subprocess management for agent processes.

pub mod bridge;
pub mod observers;

pub use bridge::{ProcessBridge, ProcessCommand, SpawnError, TerminalResize, UNKNOWN_EXIT_CODE};
pub use observers::Observers;
