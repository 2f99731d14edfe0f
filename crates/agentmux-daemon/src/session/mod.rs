//! Session management.
//!
//! The registry owns every live agent session and turns raw process output
//! into session-scoped events for the broadcast layer.

mod registry;
mod resolve;
mod types;

pub use registry::SessionRegistry;
pub use resolve::resolve_agent_command;
pub use types::{CreateOptions, RegistryError, SessionEvent, SessionInfo, SessionStatus};
