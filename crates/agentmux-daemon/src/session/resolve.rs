//! Agent executable resolution.

use std::path::{Path, PathBuf};

use agentmux_core::config::SessionConfig;
use tracing::debug;

/// Pick the agent executable: the first existing candidate, else the fallback
/// name for `PATH` lookup at spawn time.
pub fn resolve_agent_command(config: &SessionConfig) -> String {
    let home = dirs::home_dir();
    config
        .agent_candidates
        .iter()
        .filter_map(|candidate| expand_home(candidate, home.as_deref()))
        .find(|path| path.is_file())
        .map_or_else(
            || {
                debug!(fallback = %config.agent_fallback, "No agent candidate found");
                config.agent_fallback.clone()
            },
            |path| path.to_string_lossy().into_owned(),
        )
}

fn expand_home(candidate: &str, home: Option<&Path>) -> Option<PathBuf> {
    match candidate.strip_prefix("~/") {
        Some(rest) => home.map(|h| h.join(rest)),
        None => Some(PathBuf::from(candidate)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn first_existing_candidate_wins() {
        let dir = tempfile::tempdir().unwrap();
        let second = dir.path().join("second");
        let third = dir.path().join("third");
        std::fs::write(&second, "").unwrap();
        std::fs::write(&third, "").unwrap();

        let config = SessionConfig {
            agent_candidates: vec![
                dir.path().join("missing").to_string_lossy().into_owned(),
                second.to_string_lossy().into_owned(),
                third.to_string_lossy().into_owned(),
            ],
            ..SessionConfig::default()
        };
        assert_eq!(resolve_agent_command(&config), second.to_string_lossy());
    }

    #[test]
    fn directories_are_not_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            agent_candidates: vec![dir.path().to_string_lossy().into_owned()],
            agent_fallback: "agent".to_string(),
            ..SessionConfig::default()
        };
        assert_eq!(resolve_agent_command(&config), "agent");
    }

    #[test]
    fn falls_back_to_bare_command() {
        let config = SessionConfig {
            agent_candidates: vec!["/nonexistent/agentmux/claude".to_string()],
            ..SessionConfig::default()
        };
        assert_eq!(resolve_agent_command(&config), "claude");
    }

    #[test]
    fn tilde_expands_against_home() {
        let home = Path::new("/home/someone");
        assert_eq!(
            expand_home("~/.local/bin/claude", Some(home)),
            Some(PathBuf::from("/home/someone/.local/bin/claude"))
        );
        assert_eq!(expand_home("~/x", None), None);
        assert_eq!(
            expand_home("/usr/bin/claude", None),
            Some(PathBuf::from("/usr/bin/claude"))
        );
    }
}
