//! Shared access-token cache.

use super::ClientCredentialsFlow;
use crate::error::Result;
use crate::token::Token;
use tokio::sync::Mutex;

/// Hands out the current access token, fetching a new one when the cached
/// token is missing or about to expire.
///
/// Concurrent callers wait on the same refresh instead of each hitting the
/// token endpoint.
#[derive(Debug)]
pub struct TokenCache {
    flow: ClientCredentialsFlow,
    current: Mutex<Option<Token>>,
}

impl TokenCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(flow: ClientCredentialsFlow) -> Self {
        Self {
            flow,
            current: Mutex::new(None),
        }
    }

    /// Returns a usable access token.
    ///
    /// # Errors
    ///
    /// Returns the flow's error if a refresh is needed and fails.
    pub async fn access_token(&self) -> Result<String> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref().filter(|t| !t.is_expired()) {
            return Ok(token.access_token.clone());
        }

        let token = self.flow.request_token().await?;
        tracing::debug!(expires_at = ?token.expires_at, "access token refreshed");
        let access = token.access_token.clone();
        *current = Some(token);
        Ok(access)
    }

    /// Drops the cached token, e.g. after the server refused it.
    pub async fn invalidate(&self) {
        *self.current.lock().await = None;
    }

    /// Seeds the cache with a known token.
    pub async fn store(&self, token: Token) {
        *self.current.lock().await = Some(token);
    }

    /// Returns the underlying flow.
    #[must_use]
    pub const fn flow(&self) -> &ClientCredentialsFlow {
        &self.flow
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn cache() -> TokenCache {
        // Port 9 (discard) on loopback: any real request fails fast.
        let flow = ClientCredentialsFlow::new("http://127.0.0.1:9", "tenant", "id", "secret")
            .unwrap()
            .with_timeout(std::time::Duration::from_millis(500))
            .unwrap();
        TokenCache::new(flow)
    }

    #[test]
    fn test_serves_cached_token() {
        tokio_test::block_on(async {
            let cache = cache();
            cache
                .store(Token::new("cached", "Bearer").with_expires_at(Utc::now() + Duration::hours(1)))
                .await;
            assert_eq!(cache.access_token().await.unwrap(), "cached");
        });
    }

    #[tokio::test]
    async fn test_refreshes_expiring_token() {
        let cache = cache();
        cache
            .store(Token::new("stale", "Bearer").with_expires_at(Utc::now() + Duration::seconds(30)))
            .await;
        // The refresh is attempted, and fails against the dead endpoint.
        assert!(cache.access_token().await.is_err());
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let cache = cache();
        cache.store(Token::new("forever", "Bearer")).await;
        assert_eq!(cache.access_token().await.unwrap(), "forever");
        cache.invalidate().await;
        assert!(cache.access_token().await.is_err());
    }
}
