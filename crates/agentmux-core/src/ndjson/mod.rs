//! NDJSON handling for the agent's stream-json protocol.
//!
//! The agent writes one JSON record per line on stdout. Output arrives in
//! arbitrary chunks, so [`StreamEventParser`] keeps the unterminated tail of
//! the stream between calls and classifies each complete line into a
//! displayable [`ParsedEvent`]. [`format_user_input`] is the reverse
//! direction: it wraps plain text as a `user` record for the agent's stdin.

mod format;
mod parser;
mod types;

pub use format::format_user_input;
pub use parser::{StreamEventParser, classify_line};
pub use types::{EventKind, ParsedEvent};
