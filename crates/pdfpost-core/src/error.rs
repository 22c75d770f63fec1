//! Error types for the core library.

use crate::config::ValidationError;
use thiserror::Error;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory watcher could not be installed.
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Configuration failed validation.
    #[error("Invalid configuration: {}", join(.0))]
    InvalidConfig(Vec<ValidationError>),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ValidationError::message)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
