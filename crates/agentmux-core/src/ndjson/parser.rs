//! Incremental stream-json parser.
//!
//! Tolerant reader: lines that are not JSON objects pass through as text,
//! and so do echoed `user` records. Other record types without a display
//! form are suppressed.

use serde_json::Value;

use super::types::{EventKind, ParsedEvent};

const TOOL_RESULT_PLACEHOLDER: &str = "[Tool result received]";

/// Reassembles lines from an arbitrarily chunked stream and classifies them.
///
/// The pending buffer never holds a terminated line: [`feed`](Self::feed)
/// appends the chunk, hands every complete line to [`classify_line`], and
/// keeps only the unterminated remainder.
#[derive(Debug, Default)]
pub struct StreamEventParser {
    pending: String,
}

impl StreamEventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk and return the events for every line it completes.
    pub fn feed(&mut self, chunk: &str) -> Vec<ParsedEvent> {
        self.pending.push_str(chunk);
        let Some(last_newline) = self.pending.rfind('\n') else {
            return Vec::new();
        };

        let remainder = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, remainder);
        complete.lines().filter_map(parse_trimmed).collect()
    }

    /// Dispose of the parser, classifying an unterminated final line.
    ///
    /// Used when the stream ends (process exit) so the last line of output is
    /// not lost when the agent did not terminate it.
    pub fn finish(self) -> Vec<ParsedEvent> {
        parse_trimmed(&self.pending).into_iter().collect()
    }

    /// The unterminated tail carried over to the next chunk.
    pub fn pending(&self) -> &str {
        &self.pending
    }
}

fn parse_trimmed(line: &str) -> Option<ParsedEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    classify_line(trimmed)
}

/// Classify one complete line of agent output.
///
/// Returns `None` for records that are recognised but not displayable
/// (results, rate limits, system and hook notifications, unknown types).
pub fn classify_line(line: &str) -> Option<ParsedEvent> {
    let raw = match serde_json::from_str::<Value>(line) {
        Ok(value @ Value::Object(_)) => value,
        _ => return Some(ParsedEvent::text(line)),
    };

    let msg_type = raw.get("type").and_then(Value::as_str).unwrap_or("");

    match msg_type {
        "stream_event" => return classify_stream_event(&raw),
        "assistant" => return classify_assistant(&raw),
        "result" | "rate_limit_event" => return None,
        // Input echoed back by the process is shown verbatim.
        "user" => return Some(ParsedEvent::text(line)),
        _ => {}
    }

    if msg_type == "tool_use" || non_empty_str(&raw, "tool_name").is_some() {
        let tool = non_empty_str(&raw, "tool_name")
            .or_else(|| non_empty_str(&raw, "name"))
            .unwrap_or("unknown");
        return Some(ParsedEvent::new(
            EventKind::ToolInvocation,
            format!("[Tool: {tool}]"),
        ));
    }

    match msg_type {
        "tool_result" => Some(ParsedEvent::new(
            EventKind::ToolResult,
            TOOL_RESULT_PLACEHOLDER,
        )),
        "system" | "init" | "hook_started" | "hook_response" => None,
        other => {
            tracing::trace!(msg_type = other, "Suppressing unhandled stream-json record");
            None
        }
    }
}

fn classify_stream_event(raw: &Value) -> Option<ParsedEvent> {
    let event = raw.get("event")?;
    if event.get("type").and_then(Value::as_str) != Some("content_block_delta") {
        return None;
    }
    let delta = event.get("delta")?;
    if delta.get("type").and_then(Value::as_str) != Some("text_delta") {
        return None;
    }
    let text = delta.get("text").and_then(Value::as_str)?;
    Some(ParsedEvent::text(text))
}

fn classify_assistant(raw: &Value) -> Option<ParsedEvent> {
    let blocks = raw
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)?;

    let texts: Vec<&str> = blocks
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect();

    if texts.is_empty() {
        return None;
    }
    Some(ParsedEvent::text(texts.concat()))
}

fn non_empty_str<'a>(raw: &'a Value, field: &str) -> Option<&'a str> {
    raw.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}
