//! Error types for MIME operations.

/// Result type alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Header value would break the header block (bare CR or LF).
    #[error("Invalid MIME header {name}: {reason}")]
    InvalidHeader {
        /// Header name.
        name: String,
        /// What is wrong with the value.
        reason: &'static str,
    },

    /// Missing required header.
    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),
}
