//! Event types produced by the stream-json parser.

/// What a parsed line represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Assistant text, streamed deltas, or non-JSON pass-through output.
    Text,
    /// The agent started using a tool.
    ToolInvocation,
    /// A tool produced a result. Payloads are not rendered.
    ToolResult,
    System,
    Unknown,
}

/// One displayable event extracted from the agent's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    pub kind: EventKind,
    pub text: String,
}

impl ParsedEvent {
    pub fn new(kind: EventKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(EventKind::Text, text)
    }
}
