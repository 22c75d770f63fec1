//! Configuration model types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Bytes per configured megabyte.
pub(crate) const BYTES_PER_MB: u64 = 1024 * 1024;

/// Upper bound for `watcher.stability_timeout_secs`.
pub const MAX_STABILITY_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Complete pipeline configuration, stored as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Watched, archive, dead-letter and log folders.
    pub folders: FolderConfig,
    /// Mail relay and authentication.
    pub smtp: SmtpSettings,
    /// Envelope and templates.
    pub email: EmailConfig,
    /// Retry policy.
    pub retry: RetryConfig,
    /// Attachment size policy.
    pub file: FileConfig,
    /// Drop-folder behaviour.
    pub watcher: WatcherConfig,
    /// Diagnostic logging.
    pub logging: LoggingConfig,
}

/// Folder layout under the output root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderConfig {
    /// Watched folder; also holds `*.retry.json` sidecars.
    pub incoming: PathBuf,
    /// Archive for delivered files.
    pub sent: PathBuf,
    /// Dead-letter folder.
    pub failed: PathBuf,
    /// Outcome log folder.
    pub logs: PathBuf,
}

impl FolderConfig {
    /// Builds the standard layout below `root`.
    #[must_use]
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            incoming: root.join("Incoming"),
            sent: root.join("Sent"),
            failed: root.join("Failed"),
            logs: root.join("Logs"),
        }
    }

    /// Returns all folders in creation order.
    #[must_use]
    pub fn all(&self) -> [&PathBuf; 4] {
        [&self.incoming, &self.sent, &self.failed, &self.logs]
    }
}

impl Default for FolderConfig {
    fn default() -> Self {
        let root = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pdfpost")
            .join("PDF_Out");
        Self::under(root)
    }
}

/// Mail relay settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpSettings {
    /// Server hostname.
    pub host: String,
    /// Submission port.
    pub port: u16,
    /// Authenticate with an app-only `OAuth2` token instead of a password.
    pub use_oauth2: bool,
    /// Identity endpoint base URL.
    pub authority: String,
    /// Directory tenant.
    pub tenant_id: String,
    /// Application (client) id.
    pub client_id: String,
    /// Application secret.
    pub client_secret: String,
    /// Token scope.
    pub scope: String,
    /// Basic-auth username.
    pub username: String,
    /// Basic-auth password.
    pub password: String,
    /// Limit for each network round-trip, in seconds.
    pub timeout_secs: u64,
}

impl SmtpSettings {
    /// Per-call network timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: "smtp.office365.com".to_string(),
            port: 587,
            use_oauth2: false,
            authority: "https://login.microsoftonline.com".to_string(),
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: pdfpost_oauth::flow::OFFICE365_SCOPE.to_string(),
            username: String::new(),
            password: String::new(),
            timeout_secs: 60,
        }
    }
}

/// Envelope and message templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// Sender address.
    pub sender: String,
    /// Recipients separated by `,` or `;`.
    pub recipients: String,
    /// Subject with `{user}`, `{date}` and `{filename}` placeholders.
    pub subject_template: String,
    /// HTML body; also accepts `{time}` and `{source}`.
    pub body_template: String,
}

const DEFAULT_BODY: &str = "<html><body style=\"font-family: Segoe UI, Arial, sans-serif;\">\
<h3>PDF output</h3>\
<table cellpadding=\"4\">\
<tr><td><b>File</b></td><td>{filename}</td></tr>\
<tr><td><b>User</b></td><td>{user}</td></tr>\
<tr><td><b>Date/time</b></td><td>{time}</td></tr>\
<tr><td><b>Source folder</b></td><td>{source}</td></tr>\
</table>\
<p style=\"color: #888;\">Sent automatically by pdfpost.</p>\
</body></html>";

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            sender: "pdfsender@domain.com".to_string(),
            recipients: "archive@domain.com".to_string(),
            subject_template: "PDF Output - {user} - {date} - {filename}".to_string(),
            body_template: DEFAULT_BODY.to_string(),
        }
    }
}

/// Retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts before a file is dead-lettered.
    pub max_attempts: u32,
    /// Fixed delay between attempts, in minutes.
    pub interval_minutes: u32,
    /// Sweep period, in seconds.
    pub sweep_interval_secs: u64,
}

impl RetryConfig {
    /// Delay between a failure and the next attempt.
    #[must_use]
    pub fn interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.interval_minutes))
    }

    /// Sweep period.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            interval_minutes: 10,
            sweep_interval_secs: 60,
        }
    }
}

/// Attachment size policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Largest attachment, in megabytes.
    pub max_size_mb: u64,
    /// Zip oversized files before giving up.
    pub compression_enabled: bool,
}

impl FileConfig {
    /// Limit in bytes.
    #[must_use]
    pub const fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(BYTES_PER_MB)
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            max_size_mb: 35,
            compression_enabled: true,
        }
    }
}

/// Drop-folder behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Give up on a file that is still busy after this many seconds.
    pub stability_timeout_secs: u64,
    /// Size poll period, in milliseconds.
    pub poll_interval_ms: u64,
    /// Name the virtual printer writes to before the job is complete.
    pub printer_temp_name: String,
    /// Wait before touching the printer's temp file, in milliseconds.
    pub printer_grace_ms: u64,
    /// Upper bound on concurrent sends.
    pub max_concurrent_sends: usize,
    /// Treat PDFs already in the watched folder as new on start.
    pub process_existing_on_start: bool,
}

impl WatcherConfig {
    /// Stability timeout.
    #[must_use]
    pub const fn stability_timeout(&self) -> Duration {
        Duration::from_secs(self.stability_timeout_secs)
    }

    /// Poll period.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Printer grace delay.
    #[must_use]
    pub const fn printer_grace(&self) -> Duration {
        Duration::from_millis(self.printer_grace_ms)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            stability_timeout_secs: 30,
            poll_interval_ms: 1000,
            printer_temp_name: "temp_print_job.pdf".to_string(),
            printer_grace_ms: 1000,
            max_concurrent_sends: 4,
            process_existing_on_start: true,
        }
    }
}

/// Diagnostic logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter, overridden by `RUST_LOG`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
