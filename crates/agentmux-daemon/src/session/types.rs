//! Session registry types.

use std::path::PathBuf;

use agentmux_core::EventKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::subprocess::SpawnError;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    WaitingInput,
    WaitingApproval,
    Idle,
    Ended,
}

/// Snapshot of one session, as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub name: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub cwd: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_output: Option<String>,
}

impl SessionInfo {
    /// Append displayed text to `last_output`, keeping the trailing `window` chars.
    pub fn record_output(&mut self, text: &str, window: usize) {
        let mut combined = self.last_output.take().unwrap_or_default();
        combined.push_str(text);

        let excess = combined.chars().count().saturating_sub(window);
        if excess > 0 {
            let cut = combined
                .char_indices()
                .nth(excess)
                .map_or(combined.len(), |(i, _)| i);
            combined.drain(..cut);
        }
        self.last_output = Some(combined);
    }
}

/// Options for creating a session. Unset fields fall back to configuration.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub name: Option<String>,
    pub cwd: Option<PathBuf>,
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
}

/// Events emitted by the registry to its single observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Output {
        session_id: String,
        kind: EventKind,
        text: String,
    },
    Ended {
        session_id: String,
        exit_code: i32,
    },
}

/// Registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("Session {id} not found")]
    SessionNotFound { id: String },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn info() -> SessionInfo {
        SessionInfo {
            id: "abc".to_string(),
            name: "session-1".to_string(),
            status: SessionStatus::Running,
            created_at: DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
            cwd: PathBuf::from("/tmp"),
            last_output: None,
        }
    }

    #[test]
    fn last_output_keeps_trailing_window() {
        let mut info = info();
        info.record_output("hello ", 8);
        info.record_output("world", 8);
        assert_eq!(info.last_output.as_deref(), Some("lo world"));
    }

    #[test]
    fn last_output_respects_char_boundaries() {
        let mut info = info();
        info.record_output("ééééé", 3);
        assert_eq!(info.last_output.as_deref(), Some("ééé"));
    }

    #[test]
    fn wire_shape_uses_camel_case_and_iso_timestamps() {
        let mut info = info();
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["status"], "running");
        assert_eq!(value["createdAt"], "2026-01-02T03:04:05Z");
        assert_eq!(value["cwd"], "/tmp");
        assert!(value.get("lastOutput").is_none());

        info.status = SessionStatus::WaitingApproval;
        info.last_output = Some("tail".to_string());
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["status"], "waiting_approval");
        assert_eq!(value["lastOutput"], "tail");
    }
}
