//! Error types for the Kopia exporter.
//!
//! This module defines custom error types using `thiserror` for structured
//! error handling throughout the application.

use thiserror::Error;

/// Main error type for Kopia exporter operations.
#[derive(Debug, Error)]
pub enum KopiaError {
    /// The kopia binary ran but exited unsuccessfully
    #[error("kopia {command} exited with {status}\nOutput: {output}")]
    Command {
        command: String,
        status: String,
        output: String,
    },

    /// The kopia binary could not be started
    #[error("Failed to start kopia {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The kopia binary did not finish within the configured budget
    #[error("kopia {command} timed out after {seconds} seconds")]
    Timeout { command: String, seconds: u64 },

    /// Error parsing the snapshot inventory
    #[error("Failed to parse snapshot inventory: {0}")]
    ParseError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Metrics error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// HTTP server error
    #[error("HTTP server error: {0}")]
    Server(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KopiaError {
    /// Whether the error means the repository could not be reached.
    ///
    /// Parse errors are excluded: a garbled listing is not an outage.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            KopiaError::Command { .. } | KopiaError::Spawn { .. } | KopiaError::Timeout { .. }
        )
    }
}

impl From<prometheus::Error> for KopiaError {
    fn from(e: prometheus::Error) -> Self {
        KopiaError::Metrics(e.to_string())
    }
}

/// Result type alias for Kopia exporter operations.
pub type Result<T> = std::result::Result<T, KopiaError>;
