//! Token acquisition errors.

/// Result type alias for token requests.
pub type Result<T> = std::result::Result<T, Error>;

/// Why no access token could be obtained.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connect, TLS or timeout failure talking to the identity endpoint.
    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Body was not the JSON we expected.
    #[error("token response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The endpoint refused the request with an `OAuth2` error body.
    #[error("token endpoint refused the request: {code} ({description})")]
    Refused {
        /// `OAuth2` error code, e.g. `invalid_client`.
        code: String,
        /// The endpoint's explanation, often an `AADSTS` message.
        description: String,
    },

    /// A 2xx or error answer that could not be used.
    #[error("unusable token response: {0}")]
    InvalidResponse(String),

    /// Tenant, client id or secret missing.
    #[error("incomplete client credentials: {0}")]
    InvalidConfig(String),

    /// Authority plus tenant did not form a URL.
    #[error("bad token endpoint URL: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Builds [`Error::Refused`].
    #[must_use]
    pub fn refused(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Refused {
            code: code.into(),
            description: description.into(),
        }
    }

    /// Returns true if retrying with the same client id and secret cannot help.
    #[must_use]
    pub fn is_bad_credentials(&self) -> bool {
        matches!(
            self,
            Self::Refused { code, .. }
                if matches!(code.as_str(), "invalid_client" | "unauthorized_client")
        )
    }
}
