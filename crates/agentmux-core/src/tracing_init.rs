//! Shared tracing/logging initialization.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Crates whose events are enabled at the configured level.
const LOG_TARGETS: [&str; 2] = ["agentmux_core", "agentmux_daemon"];

/// Filter directive enabling every agentmux crate at `level`.
pub fn default_filter(level: &str) -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// `RUST_LOG` wins over the configured level when set.
fn build_filter(level: &str, rust_log: Option<String>) -> EnvFilter {
    EnvFilter::new(rust_log.unwrap_or_else(|| default_filter(level)))
}

/// Initialise the global tracing subscriber.
///
/// `level` applies to all agentmux crates unless `RUST_LOG` is set. With
/// `log_json` the output is one JSON object per line.
pub fn init_tracing(level: &str, log_json: bool) {
    let env_filter = build_filter(level, std::env::var("RUST_LOG").ok());
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
