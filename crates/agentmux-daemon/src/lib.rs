//! agentmux Daemon Library
//!
//! Core functionality for the agentmux daemon:
//! - Process bridge owning one agent subprocess and its I/O
//! - Session registry tracking many concurrent agent sessions
//! - WebSocket hub fanning session events out to subscribed clients

pub mod server;
pub mod session;
pub mod subprocess;
