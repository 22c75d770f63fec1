//! Client-credentials grant (RFC 6749 section 4.4).

mod cache;

pub use cache::TokenCache;

use crate::error::{Error, Result};
use crate::token::{ErrorResponse, Token, TokenResponse};
use chrono::Utc;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Scope granting SMTP submission to an Exchange Online app registration.
pub const OFFICE365_SCOPE: &str = "https://outlook.office365.com/.default";

/// App-only token acquisition for one tenant.
#[derive(Debug, Clone)]
pub struct ClientCredentialsFlow {
    /// Client ID of the app registration.
    pub client_id: String,
    client_secret: String,
    /// Token endpoint (`{authority}/{tenant}/oauth2/v2.0/token`).
    pub token_url: Url,
    /// Requested scope.
    pub scope: String,
    http_client: Client,
}

impl ClientCredentialsFlow {
    /// Creates a flow for `tenant` under `authority`.
    ///
    /// # Errors
    ///
    /// Returns an error if a field is empty or the resulting URL is invalid.
    pub fn new(
        authority: &str,
        tenant: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self> {
        let tenant = tenant.trim().trim_matches('/');
        if tenant.is_empty() {
            return Err(Error::InvalidConfig("tenant id is empty".into()));
        }

        let client_id = client_id.into();
        let client_secret = client_secret.into();
        if client_id.trim().is_empty() || client_secret.is_empty() {
            return Err(Error::InvalidConfig(
                "client id and client secret are required".into(),
            ));
        }

        let authority = authority.trim().trim_end_matches('/');
        let token_url = Url::parse(&format!("{authority}/{tenant}/oauth2/v2.0/token"))?;

        Ok(Self {
            client_id,
            client_secret,
            token_url,
            scope: OFFICE365_SCOPE.to_string(),
            http_client: Client::new(),
        })
    }

    /// Overrides the requested scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Bounds each token request by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http_client = Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    /// Requests a fresh access token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Refused`] if the endpoint refuses the credentials, or
    /// a transport error if it cannot be reached.
    pub async fn request_token(&self) -> Result<Token> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        tracing::debug!(token_url = %self.token_url, client_id = %self.client_id, "requesting access token");

        let response = self
            .http_client
            .post(self.token_url.clone())
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(serde_json::from_str::<ErrorResponse>(&body).map_or_else(
                |_| Error::InvalidResponse(format!("HTTP {status}: {body}")),
                ErrorResponse::into_error,
            ));
        }

        let token_response: TokenResponse = serde_json::from_str(&body)?;
        if token_response.access_token.is_empty() {
            return Err(Error::InvalidResponse("empty access token".into()));
        }
        Ok(Token::from_response(token_response, Utc::now()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_token_url_from_authority() {
        let flow = ClientCredentialsFlow::new(
            "https://login.microsoftonline.com/",
            "contoso.onmicrosoft.com",
            "id",
            "secret",
        )
        .unwrap();
        assert_eq!(
            flow.token_url.as_str(),
            "https://login.microsoftonline.com/contoso.onmicrosoft.com/oauth2/v2.0/token"
        );
        assert_eq!(flow.scope, OFFICE365_SCOPE);
    }

    #[test]
    fn test_rejects_missing_fields() {
        let authority = "https://login.microsoftonline.com";
        assert!(ClientCredentialsFlow::new(authority, " ", "id", "secret").is_err());
        assert!(ClientCredentialsFlow::new(authority, "tenant", "", "secret").is_err());
        assert!(ClientCredentialsFlow::new(authority, "tenant", "id", "").is_err());
        assert!(ClientCredentialsFlow::new("not a url", "tenant", "id", "secret").is_err());
    }

    #[test]
    fn test_custom_scope() {
        let flow = ClientCredentialsFlow::new("https://login.example.com", "t", "id", "s")
            .unwrap()
            .with_scope("https://mail.example.com/.default");
        assert_eq!(flow.scope, "https://mail.example.com/.default");
    }
}
