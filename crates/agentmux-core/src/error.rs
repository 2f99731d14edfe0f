//! Error types for `agentmux` core library.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using `agentmux` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `agentmux` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration value was rejected
    #[error("Configuration error: {0}")]
    Config(String),

    /// Settings file could not be parsed
    #[error("Failed to parse {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Settings file could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
