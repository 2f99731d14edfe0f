//! Client/server message protocol.
//!
//! One JSON object per WebSocket text frame, tagged by `type`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::{SessionInfo, SessionStatus};

/// Requests sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "session:list")]
    List,

    #[serde(rename = "session:create")]
    Create {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
    },

    #[serde(rename = "session:kill", rename_all = "camelCase")]
    Kill { session_id: String },

    #[serde(rename = "session:subscribe", rename_all = "camelCase")]
    Subscribe { session_id: String },

    #[serde(rename = "session:unsubscribe", rename_all = "camelCase")]
    Unsubscribe { session_id: String },

    #[serde(rename = "session:input", rename_all = "camelCase")]
    Input { session_id: String, text: String },

    #[serde(rename = "session:approve", rename_all = "camelCase")]
    Approve { session_id: String },

    #[serde(rename = "session:deny", rename_all = "camelCase")]
    Deny { session_id: String },
}

/// Messages sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "session:list")]
    List { sessions: Vec<SessionInfo> },

    #[serde(rename = "session:created")]
    Created { session: SessionInfo },

    #[serde(rename = "session:output", rename_all = "camelCase")]
    Output { session_id: String, text: String },

    #[serde(rename = "session:status", rename_all = "camelCase")]
    Status {
        session_id: String,
        status: SessionStatus,
    },

    #[serde(rename = "session:ended", rename_all = "camelCase")]
    Ended { session_id: String },

    #[serde(rename = "session:approval-needed", rename_all = "camelCase")]
    ApprovalNeeded {
        session_id: String,
        tool: String,
        description: String,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Output may be dropped under backpressure; everything else may not.
    pub const fn is_droppable(&self) -> bool {
        matches!(self, Self::Output { .. })
    }
}

/// Errors decoding a client frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid JSON")]
    InvalidJson(#[source] serde_json::Error),

    #[error("Invalid request: {0}")]
    Malformed(#[source] serde_json::Error),
}

/// Decode one client frame.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;
    serde_json::from_value(value).map_err(ProtocolError::Malformed)
}
