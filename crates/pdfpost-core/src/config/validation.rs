//! Configuration validation.

use super::model::{AppConfig, MAX_STABILITY_TIMEOUT_SECS};
use pdfpost_smtp::Address;
use pdfpost_smtp::types::parse_address_list;

/// Validation error for pipeline configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// Sender address is empty.
    EmptySender,
    /// Sender address format is invalid.
    InvalidSender,
    /// No recipients configured.
    EmptyRecipients,
    /// A recipient address is invalid.
    InvalidRecipients,
    /// SMTP host is empty.
    EmptySmtpHost,
    /// SMTP port is zero.
    InvalidSmtpPort,
    /// `OAuth2` selected without a tenant.
    EmptyTenantId,
    /// `OAuth2` selected without a client id.
    EmptyClientId,
    /// `OAuth2` selected without a client secret.
    EmptyClientSecret,
    /// Basic auth selected without a username.
    EmptyUsername,
    /// Basic auth selected without a password.
    EmptyPassword,
    /// Maximum attempts is zero.
    ZeroMaxAttempts,
    /// Retry interval is zero.
    ZeroRetryInterval,
    /// Size limit is zero.
    ZeroMaxSize,
    /// Stability poll period is zero.
    ZeroPollInterval,
    /// Stability timeout is zero or longer than a day.
    StabilityTimeoutOutOfRange,
}

impl ValidationError {
    /// Get human-readable error message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::EmptySender => "Sender address is required",
            Self::InvalidSender => "Invalid sender address format",
            Self::EmptyRecipients => "At least one recipient is required",
            Self::InvalidRecipients => "Invalid recipient address format",
            Self::EmptySmtpHost => "SMTP server is required",
            Self::InvalidSmtpPort => "SMTP port must be 1-65535",
            Self::EmptyTenantId => "OAuth2 tenant id is required",
            Self::EmptyClientId => "OAuth2 client id is required",
            Self::EmptyClientSecret => "OAuth2 client secret is required",
            Self::EmptyUsername => "SMTP username is required",
            Self::EmptyPassword => "SMTP password is required",
            Self::ZeroMaxAttempts => "Maximum attempts must be at least 1",
            Self::ZeroRetryInterval => "Retry interval must be at least 1 minute",
            Self::ZeroMaxSize => "Maximum file size must be at least 1 MB",
            Self::ZeroPollInterval => "Poll interval must be at least 1 ms",
            Self::StabilityTimeoutOutOfRange => "Stability timeout must be 1-86400 seconds",
        }
    }

    /// Get the field name this error relates to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::EmptySender | Self::InvalidSender => "email.sender",
            Self::EmptyRecipients | Self::InvalidRecipients => "email.recipients",
            Self::EmptySmtpHost => "smtp.host",
            Self::InvalidSmtpPort => "smtp.port",
            Self::EmptyTenantId => "smtp.tenant_id",
            Self::EmptyClientId => "smtp.client_id",
            Self::EmptyClientSecret => "smtp.client_secret",
            Self::EmptyUsername => "smtp.username",
            Self::EmptyPassword => "smtp.password",
            Self::ZeroMaxAttempts => "retry.max_attempts",
            Self::ZeroRetryInterval => "retry.interval_minutes",
            Self::ZeroMaxSize => "file.max_size_mb",
            Self::ZeroPollInterval => "watcher.poll_interval_ms",
            Self::StabilityTimeoutOutOfRange => "watcher.stability_timeout_secs",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ValidationError {}

/// Result of validating a configuration.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Validate a configuration before any send is attempted.
///
/// Returns `Ok(())` if valid, or `Err(Vec<ValidationError>)` with all errors.
///
/// # Errors
///
/// Returns a vector of `ValidationError` if any fields are invalid.
pub fn validate_config(config: &AppConfig) -> ValidationResult {
    let mut errors = Vec::new();

    // Envelope
    if config.email.sender.trim().is_empty() {
        errors.push(ValidationError::EmptySender);
    } else if Address::new(&config.email.sender).is_err() {
        errors.push(ValidationError::InvalidSender);
    }

    match parse_address_list(&config.email.recipients) {
        Ok(list) if list.is_empty() => errors.push(ValidationError::EmptyRecipients),
        Ok(_) => {}
        Err(_) => errors.push(ValidationError::InvalidRecipients),
    }

    // Relay
    let smtp = &config.smtp;
    if smtp.host.trim().is_empty() {
        errors.push(ValidationError::EmptySmtpHost);
    }
    if smtp.port == 0 {
        errors.push(ValidationError::InvalidSmtpPort);
    }

    if smtp.use_oauth2 {
        if smtp.tenant_id.trim().is_empty() {
            errors.push(ValidationError::EmptyTenantId);
        }
        if smtp.client_id.trim().is_empty() {
            errors.push(ValidationError::EmptyClientId);
        }
        if smtp.client_secret.is_empty() {
            errors.push(ValidationError::EmptyClientSecret);
        }
    } else {
        if smtp.username.trim().is_empty() {
            errors.push(ValidationError::EmptyUsername);
        }
        if smtp.password.is_empty() {
            errors.push(ValidationError::EmptyPassword);
        }
    }

    // Policy
    if config.retry.max_attempts == 0 {
        errors.push(ValidationError::ZeroMaxAttempts);
    }
    if config.retry.interval_minutes == 0 {
        errors.push(ValidationError::ZeroRetryInterval);
    }
    if config.file.max_size_mb == 0 {
        errors.push(ValidationError::ZeroMaxSize);
    }

    // Watcher
    if config.watcher.poll_interval_ms == 0 {
        errors.push(ValidationError::ZeroPollInterval);
    }
    if !(1..=MAX_STABILITY_TIMEOUT_SECS).contains(&config.watcher.stability_timeout_secs) {
        errors.push(ValidationError::StabilityTimeoutOutOfRange);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn basic_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.smtp.username = "pdfsender@domain.com".to_string();
        config.smtp.password = "secret".to_string();
        config
    }

    #[test]
    fn test_defaults_need_credentials() {
        let errors = validate_config(&AppConfig::default()).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::EmptyUsername, ValidationError::EmptyPassword]
        );
    }

    #[test]
    fn test_complete_basic_config() {
        assert!(validate_config(&basic_config()).is_ok());
    }

    #[test]
    fn test_missing_envelope() {
        let mut config = basic_config();
        config.email.sender = "  ".to_string();
        config.email.recipients = " ; , ".to_string();
        config.smtp.host = String::new();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::EmptySender));
        assert!(errors.contains(&ValidationError::EmptyRecipients));
        assert!(errors.contains(&ValidationError::EmptySmtpHost));
    }

    #[test]
    fn test_invalid_addresses() {
        let mut config = basic_config();
        config.email.sender = "not-an-address".to_string();
        config.email.recipients = "a@example.com; broken".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::InvalidSender, ValidationError::InvalidRecipients]
        );
    }

    #[test]
    fn test_incomplete_oauth_triple() {
        let mut config = basic_config();
        config.smtp.use_oauth2 = true;
        config.smtp.tenant_id = "contoso".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::EmptyClientId, ValidationError::EmptyClientSecret]
        );
        assert_eq!(errors[0].field(), "smtp.client_id");
    }

    #[test]
    fn test_zero_policy_values() {
        let mut config = basic_config();
        config.retry.max_attempts = 0;
        config.retry.interval_minutes = 0;
        config.smtp.port = 0;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::ZeroMaxAttempts));
        assert!(errors.contains(&ValidationError::ZeroRetryInterval));
        assert!(errors.contains(&ValidationError::InvalidSmtpPort));
    }

    #[test]
    fn test_watcher_timing() {
        let mut config = basic_config();
        config.watcher.poll_interval_ms = 0;
        config.watcher.stability_timeout_secs = u64::MAX;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::ZeroPollInterval, ValidationError::StabilityTimeoutOutOfRange]
        );
        assert_eq!(errors[1].field(), "watcher.stability_timeout_secs");

        config.watcher.poll_interval_ms = 1;
        config.watcher.stability_timeout_secs = 0;
        assert_eq!(
            validate_config(&config).unwrap_err(),
            vec![ValidationError::StabilityTimeoutOutOfRange]
        );

        config.watcher.stability_timeout_secs = MAX_STABILITY_TIMEOUT_SECS;
        assert!(validate_config(&config).is_ok());
    }
}
