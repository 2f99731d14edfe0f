//! Configuration resolution for agentmux.
//!
//! Resolution order (lowest to highest priority):
//! 1. Built-in defaults
//! 2. Settings file (`~/.config/agentmux/settings.json` or an explicit path)
//! 3. Environment variables
//! 4. CLI arguments (applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable overriding the control-channel port.
pub const ENV_WS_PORT: &str = "HAPPY_WS_PORT";
/// Environment variable overriding the asset server port.
pub const ENV_WEB_PORT: &str = "HAPPY_WEB_PORT";
/// Environment variable overriding the daemon log level.
pub const ENV_LOG_LEVEL: &str = "AGENTMUX_LOG_LEVEL";

/// Complete agentmux configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
}

/// Daemon-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Host the control channel binds to.
    pub bind_host: String,
    /// Control channel (WebSocket) port.
    pub ws_port: u16,
    /// Port of the static web UI server. Served by an external collaborator.
    pub web_port: u16,
    pub log_level: String,
    /// Outbound messages buffered per client before backpressure applies.
    pub client_queue_capacity: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            ws_port: 3777,
            web_port: 3778,
            log_level: "info".to_string(),
            client_queue_capacity: 256,
        }
    }
}

/// Session defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Characters of trailing output kept in each session summary.
    pub last_output_window: usize,
    /// Candidate agent executables, checked in order. `~/` expands to home.
    pub agent_candidates: Vec<String>,
    /// Command used when no candidate exists; resolved through `PATH`.
    pub agent_fallback: String,
    /// Arguments passed to the agent when a session does not override them.
    pub agent_args: Vec<String>,
    /// Seconds to wait after SIGINT before force-killing a session.
    pub terminate_timeout_secs: u64,
    /// Line sent for `session:approve`.
    pub approve_line: String,
    /// Line sent for `session:deny`.
    pub deny_line: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            last_output_window: 200,
            agent_candidates: vec![
                "~/.claude/local/claude".to_string(),
                "~/.local/bin/claude".to_string(),
                "/usr/local/bin/claude".to_string(),
                "/opt/homebrew/bin/claude".to_string(),
            ],
            agent_fallback: "claude".to_string(),
            agent_args: vec![
                "--output-format".to_string(),
                "stream-json".to_string(),
                "--input-format".to_string(),
                "stream-json".to_string(),
                "--verbose".to_string(),
            ],
            terminate_timeout_secs: 5,
            approve_line: "y".to_string(),
            deny_line: "n".to_string(),
        }
    }
}

/// A resolved configuration plus the values that were ignored on the way.
///
/// Rejected values are returned rather than logged because configuration is
/// loaded before the tracing subscriber exists.
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: Config,
    pub rejected: Vec<Error>,
}

/// Load configuration with hierarchical resolution.
///
/// `explicit_path` replaces the global settings file; it must exist.
pub fn load_config(explicit_path: Option<&Path>) -> Result<LoadedConfig> {
    let mut config = match explicit_path {
        Some(path) => load_config_file(path)?,
        None => match global_config_path() {
            Some(path) if path.exists() => load_config_file(&path)?,
            _ => Config::default(),
        },
    };

    let rejected = apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(LoadedConfig { config, rejected })
}

/// Get the global settings file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("agentmux").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply environment overrides using `lookup` to read variables.
///
/// Unparseable values leave the setting unchanged and are returned.
pub fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Vec<Error> {
    let mut rejected = Vec::new();
    if let Some(port) = parse_port(&lookup, ENV_WS_PORT, &mut rejected) {
        config.daemon.ws_port = port;
    }
    if let Some(port) = parse_port(&lookup, ENV_WEB_PORT, &mut rejected) {
        config.daemon.web_port = port;
    }
    if let Some(val) = lookup(ENV_LOG_LEVEL) {
        config.daemon.log_level = val;
    }
    rejected
}

fn parse_port(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    rejected: &mut Vec<Error>,
) -> Option<u16> {
    let val = lookup(var)?;
    match val.parse() {
        Ok(port) => Some(port),
        Err(_) => {
            rejected.push(Error::Config(format!("{var}={val:?} is not a valid port")));
            None
        }
    }
}
