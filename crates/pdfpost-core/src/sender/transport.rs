//! Mail transports.

use std::future::Future;
use std::sync::{Arc, Mutex};

use pdfpost_oauth::{ClientCredentialsFlow, TokenCache};
use pdfpost_smtp::{Address, Client};
use tracing::{debug, error, warn};

use super::SendError;
use crate::config::SmtpSettings;

/// SMTP envelope: who the relay hands the message to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// `MAIL FROM` address.
    pub from: Address,
    /// `RCPT TO` addresses, never empty.
    pub to: Vec<Address>,
}

/// Hands a rendered message to a mail relay.
pub trait MailTransport: Send + Sync {
    /// Delivers `message` to every envelope recipient.
    fn deliver(
        &self,
        envelope: &Envelope,
        message: &[u8],
        settings: &SmtpSettings,
    ) -> impl Future<Output = Result<(), SendError>> + Send;
}

impl<T: MailTransport> MailTransport for Arc<T> {
    fn deliver(
        &self,
        envelope: &Envelope,
        message: &[u8],
        settings: &SmtpSettings,
    ) -> impl Future<Output = Result<(), SendError>> + Send {
        (**self).deliver(envelope, message, settings)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct OAuthKey {
    authority: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    scope: String,
}

impl OAuthKey {
    fn from_settings(settings: &SmtpSettings) -> Self {
        Self {
            authority: settings.authority.clone(),
            tenant_id: settings.tenant_id.clone(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            scope: settings.scope.clone(),
        }
    }
}

/// Submission over SMTP with opportunistic STARTTLS.
///
/// Authenticates with `AUTH PLAIN`, or with `AUTH XOAUTH2` using a
/// client-credentials token that is cached until shortly before expiry.
#[derive(Debug)]
pub struct SmtpTransport {
    client_name: String,
    tokens: Mutex<Option<(OAuthKey, Arc<TokenCache>)>>,
}

impl Default for SmtpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtpTransport {
    /// Creates a transport that greets with the local host name.
    #[must_use]
    pub fn new() -> Self {
        let client_name = ["COMPUTERNAME", "HOSTNAME"]
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
            .unwrap_or_else(|| "localhost".to_string());
        Self::with_client_name(client_name)
    }

    /// Creates a transport with an explicit EHLO name.
    #[must_use]
    pub fn with_client_name(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            tokens: Mutex::new(None),
        }
    }

    /// Token cache for the current `OAuth2` settings.
    ///
    /// A new cache replaces the old one whenever the settings change.
    fn token_cache(&self, settings: &SmtpSettings) -> Result<Arc<TokenCache>, SendError> {
        let key = OAuthKey::from_settings(settings);
        let mut slot = self
            .tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some((cached_key, cache)) = slot.as_ref()
            && *cached_key == key
        {
            return Ok(Arc::clone(cache));
        }

        let flow = ClientCredentialsFlow::new(
            &settings.authority,
            &settings.tenant_id,
            &settings.client_id,
            &settings.client_secret,
        )?
        .with_scope(&settings.scope)
        .with_timeout(settings.timeout())?;
        let cache = Arc::new(TokenCache::new(flow));
        *slot = Some((key, Arc::clone(&cache)));
        Ok(cache)
    }

    async fn authenticate(
        &self,
        client: Client<pdfpost_smtp::Connected>,
        envelope: &Envelope,
        settings: &SmtpSettings,
    ) -> Result<Client<pdfpost_smtp::Authenticated>, SendError> {
        if !settings.use_oauth2 {
            return Ok(client
                .auth_plain(&settings.username, &settings.password)
                .await?);
        }

        let cache = self.token_cache(settings)?;
        let token = tokio::time::timeout(settings.timeout(), cache.access_token())
            .await
            .map_err(|_| SendError::Timeout {
                operation: "token request",
            })?
            .inspect_err(|e| {
                if e.is_bad_credentials() {
                    error!(client_id = %settings.client_id, "Client id or secret refused by the identity endpoint");
                }
            })?;

        match client.auth_xoauth2(envelope.from.as_str(), &token).await {
            Ok(client) => Ok(client),
            Err(e) => {
                if matches!(e, pdfpost_smtp::Error::Rejected { .. }) {
                    cache.invalidate().await;
                }
                Err(e.into())
            }
        }
    }
}

impl MailTransport for SmtpTransport {
    async fn deliver(
        &self,
        envelope: &Envelope,
        message: &[u8],
        settings: &SmtpSettings,
    ) -> Result<(), SendError> {
        let (first, rest) = envelope
            .to
            .split_first()
            .ok_or_else(|| SendError::InvalidAddress("no recipients".to_string()))?;

        debug!(host = %settings.host, port = settings.port, "Connecting to relay");
        let client = Client::connect(&settings.host, settings.port, settings.timeout()).await?;
        let client = client.ehlo(&self.client_name).await?;
        let client = client.starttls_if_available(&settings.host).await?;
        if !client.is_tls() {
            warn!(host = %settings.host, "Relay does not offer STARTTLS, sending in clear text");
        }

        let client = self.authenticate(client, envelope, settings).await?;

        let client = client
            .mail_from(envelope.from.clone(), Some(message.len()))
            .await?;
        let mut client = client.rcpt_to(first.clone()).await?;
        for recipient in rest {
            client = client.rcpt_to(recipient.clone()).await?;
        }
        let client = client.data().await?.send_message(message).await?;

        // The message is accepted at this point.
        if let Err(e) = client.quit().await {
            debug!(error = %e, "QUIT failed after delivery");
        }
        Ok(())
    }
}
