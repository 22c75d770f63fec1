//! Error types for SMTP sessions.

use std::io;
use std::time::Duration;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while talking to a mail relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS handshake or record failure.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The server answered with a non-success reply.
    #[error("SMTP error {code}: {message}")]
    Rejected {
        /// Reply code (e.g., 535).
        code: u16,
        /// Text returned by the server.
        message: String,
    },

    /// The server sent something that is not a valid SMTP reply.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An envelope address failed validation.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// A command round-trip exceeded the session timeout.
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        /// What the client was doing when the timer fired.
        operation: &'static str,
        /// The configured limit.
        after: Duration,
    },

    /// The connection was closed by the server mid-reply.
    #[error("Connection closed by server")]
    ConnectionClosed,
}

impl Error {
    /// Creates a rejection error from a reply code and text.
    #[must_use]
    pub fn rejected(code: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            message: message.into(),
        }
    }

    /// Returns true if the server reported a permanent failure (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Rejected { code, .. } if *code >= 500 && *code < 600)
    }

    /// Returns true if the server reported a transient failure (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Rejected { code, .. } if *code >= 400 && *code < 500)
    }
}
