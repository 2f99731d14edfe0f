//! Formatting of user input for the agent's stdin.

use serde_json::json;

/// Wrap `text` as a single newline-terminated stream-json `user` record.
pub fn format_user_input(text: &str) -> String {
    let mut line = json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": text,
        },
    })
    .to_string();
    line.push('\n');
    line
}
