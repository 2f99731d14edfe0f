//! `agentmux` Core Library
//!
//! Shared functionality for `agentmux` components:
//! - Incremental NDJSON parsing of the agent's stream-json output
//! - Formatting of user input for the agent's stdin
//! - Configuration resolution
//! - Common error types

pub mod config;
pub mod error;
pub mod ndjson;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use ndjson::{EventKind, ParsedEvent, StreamEventParser, format_user_input};
