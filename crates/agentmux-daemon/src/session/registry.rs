//! Session registry.
//!
//! Every session pairs one [`ProcessBridge`] with one forwarding task. Bridge
//! observers push raw chunks and the exit code into a per-session queue; the
//! task owns the session's [`StreamEventParser`] and is the only writer of the
//! session's info, so all events of a session are handled in arrival order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use agentmux_core::config::SessionConfig;
use agentmux_core::{StreamEventParser, format_user_input};
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use super::resolve::resolve_agent_command;
use super::types::{CreateOptions, RegistryError, SessionEvent, SessionInfo, SessionStatus};
use crate::subprocess::{ProcessBridge, ProcessCommand};

type SessionMap = Arc<RwLock<HashMap<String, SessionEntry>>>;

struct SessionEntry {
    info: SessionInfo,
    bridge: ProcessBridge,
    /// Creation order, for deterministic listing.
    seq: u64,
}

enum BridgeSignal {
    Chunk(Bytes),
    Exit(i32),
}

/// Owns all active sessions.
pub struct SessionRegistry {
    sessions: SessionMap,
    config: SessionConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
    next_seq: AtomicU64,
}

impl SessionRegistry {
    /// Create a registry and the receiving end of its event stream.
    pub fn new(config: SessionConfig) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let registry = Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config,
            events,
            next_seq: AtomicU64::new(0),
        };
        (registry, rx)
    }

    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Spawn a new session and return a snapshot of its info.
    pub async fn create(&self, options: CreateOptions) -> Result<SessionInfo, RegistryError> {
        let id = uuid::Uuid::new_v4().to_string();
        let cwd = options
            .cwd
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let program = options
            .command
            .unwrap_or_else(|| resolve_agent_command(&self.config));
        let args = options
            .args
            .unwrap_or_else(|| self.config.agent_args.clone());

        let command = ProcessCommand::new(program, args, cwd.clone())
            .with_terminate_timeout(Duration::from_secs(self.config.terminate_timeout_secs));
        let bridge = ProcessBridge::spawn(&command).inspect_err(|e| {
            warn!(session_id = %id, error = %e, "Failed to spawn session");
        })?;

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let chunk_tx = signal_tx.clone();
        bridge.on_output(move |chunk| {
            let _ = chunk_tx.send(BridgeSignal::Chunk(chunk.clone()));
        });
        bridge.on_exit(move |code| {
            let _ = signal_tx.send(BridgeSignal::Exit(*code));
        });
        bridge.start();

        let mut sessions = self.sessions.write().await;
        let name = options
            .name
            .unwrap_or_else(|| format!("session-{}", sessions.len() + 1));
        let info = SessionInfo {
            id: id.clone(),
            name,
            status: SessionStatus::Running,
            created_at: Utc::now(),
            cwd,
            last_output: None,
        };
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        info!(
            session_id = %id,
            name = %info.name,
            pid = bridge.pid(),
            "Session created"
        );
        sessions.insert(
            id.clone(),
            SessionEntry {
                info: info.clone(),
                bridge,
                seq,
            },
        );
        drop(sessions);

        tokio::spawn(forward_session(
            id,
            signal_rx,
            Arc::clone(&self.sessions),
            self.events.clone(),
            self.config.last_output_window,
        ));

        Ok(info)
    }

    /// Snapshots of all active sessions, in creation order.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut entries: Vec<&SessionEntry> = sessions.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.info.clone()).collect()
    }

    /// Snapshot of one session, or `None` if it is not active.
    pub async fn get(&self, id: &str) -> Option<SessionInfo> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|entry| entry.info.clone())
    }

    /// Send `text` to the session's agent as a user message.
    pub async fn write(&self, id: &str, text: &str) -> Result<(), RegistryError> {
        let sessions = self.sessions.read().await;
        let entry = sessions
            .get(id)
            .ok_or_else(|| RegistryError::SessionNotFound { id: id.to_string() })?;
        debug!(session_id = %id, bytes = text.len(), "Writing input");
        entry.bridge.write(format_user_input(text));
        Ok(())
    }

    /// Terminate a session. Unknown ids are ignored.
    ///
    /// The session leaves the active set immediately; its `Ended` event is
    /// emitted once the process has actually exited.
    pub async fn kill(&self, id: &str) {
        let removed = self.sessions.write().await.remove(id);
        if let Some(entry) = removed {
            info!(session_id = %id, pid = entry.bridge.pid(), "Killing session");
            entry.bridge.kill();
        }
    }

    /// Terminate every active session. Returns how many were killed.
    pub async fn kill_all(&self) -> usize {
        let drained: Vec<(String, SessionEntry)> =
            self.sessions.write().await.drain().collect();
        for (id, entry) in &drained {
            info!(session_id = %id, "Killing session");
            entry.bridge.kill();
        }
        drained.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

async fn forward_session(
    id: String,
    mut signals: mpsc::UnboundedReceiver<BridgeSignal>,
    sessions: SessionMap,
    events: mpsc::UnboundedSender<SessionEvent>,
    window: usize,
) {
    let mut parser = StreamEventParser::new();
    let mut utf8_carry = Vec::new();

    while let Some(signal) = signals.recv().await {
        match signal {
            BridgeSignal::Chunk(chunk) => {
                let text = decode_utf8_chunk(&mut utf8_carry, &chunk);
                let parsed = parser.feed(&text);
                publish_output(&id, parsed, &sessions, &events, window).await;
            }
            BridgeSignal::Exit(code) => {
                let tail = std::mem::take(&mut parser).finish();
                publish_output(&id, tail, &sessions, &events, window).await;

                // Remove before emitting so no write can reach a dead session.
                let mut guard = sessions.write().await;
                if let Some(entry) = guard.remove(&id) {
                    debug!(session_id = %id, name = %entry.info.name, "Removed session");
                }
                info!(session_id = %id, exit_code = code, "Session ended");
                let _ = events.send(SessionEvent::Ended {
                    session_id: id,
                    exit_code: code,
                });
                return;
            }
        }
    }
}

async fn publish_output(
    id: &str,
    parsed: Vec<agentmux_core::ParsedEvent>,
    sessions: &SessionMap,
    events: &mpsc::UnboundedSender<SessionEvent>,
    window: usize,
) {
    if parsed.is_empty() {
        return;
    }
    let mut guard = sessions.write().await;
    // Killed sessions are gone from the map; their output is discarded.
    let Some(entry) = guard.get_mut(id) else {
        return;
    };
    for event in parsed {
        entry.info.record_output(&event.text, window);
        let _ = events.send(SessionEvent::Output {
            session_id: id.to_string(),
            kind: event.kind,
            text: event.text,
        });
    }
}

/// Decode `chunk` as UTF-8, carrying an incomplete trailing sequence over to
/// the next chunk. Invalid bytes become U+FFFD.
fn decode_utf8_chunk(carry: &mut Vec<u8>, chunk: &[u8]) -> String {
    carry.extend_from_slice(chunk);
    let mut out = String::with_capacity(carry.len());
    let mut rest = &carry[..];

    while !rest.is_empty() {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                out.push_str(valid);
                rest = &[];
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                let Some(invalid_len) = e.error_len() else {
                    // Incomplete sequence at the end: wait for more bytes.
                    rest = after;
                    break;
                };
                out.push(char::REPLACEMENT_CHARACTER);
                rest = &after[invalid_len..];
            }
        }
    }

    *carry = rest.to_vec();
    out
}
