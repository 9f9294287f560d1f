//! Error types for evoscope
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)
//!
//! Most storage problems never reach callers: readers degrade to empty
//! results and log. The variants here cover the few failures that do cross
//! a public boundary (exhausted retries, bad registrations, bad config).

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// evoscope error types
#[derive(Error, Debug)]
pub enum Error {
    /// Relational store stayed locked/busy through every retry
    #[error("Storage busy after {attempts} attempts: {message}\nAnother process is holding the store; retry later")]
    StorageBusy {
        /// Number of attempts made
        attempts: u32,
        /// Last storage-engine message
        message: String,
    },

    /// No registered format accepts the path
    #[error("No registered format recognises {0}")]
    UnknownFormat(String),

    /// Format name rejected at registration time
    #[error("Invalid format name {0:?}: expected lowercase ascii letters, digits, '-' or '_'")]
    InvalidFormatName(String),

    /// Discovery pattern could not be compiled
    #[error("Invalid discovery pattern: {0}")]
    InvalidPattern(String),

    /// Configuration rejected by validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Optional capability not offered by this reader
    #[error("Operation not supported by this reader: {0}")]
    Unsupported(&'static str),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem watch backend error
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
