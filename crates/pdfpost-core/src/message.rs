//! Per-attempt delivery message.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::config::AppConfig;

/// Everything needed for one send attempt.
///
/// Rebuilt from the current configuration before every attempt, so edits
/// to the envelope or templates apply to retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryMessage {
    /// Source file.
    pub path: PathBuf,
    /// File name shown in the subject, body and log.
    pub display_name: String,
    /// Sender address.
    pub sender: String,
    /// Recipient list as configured (`,` or `;` separated).
    pub recipients: String,
    /// Rendered subject.
    pub subject: String,
    /// Rendered HTML body.
    pub body: String,
    /// Source file size at compose time.
    pub size_bytes: u64,
    /// Originating user.
    pub user: String,
    /// When the message was composed.
    pub created: DateTime<Local>,
}

impl DeliveryMessage {
    /// Builds the message for `path` from `config`.
    #[must_use]
    pub fn compose(path: &Path, config: &AppConfig, user: &str, now: DateTime<Local>) -> Self {
        let display_name = display_name(path);
        let source = path
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let date = now.format("%d.%m.%Y %H:%M").to_string();
        let time = now.format("%d.%m.%Y %H:%M:%S").to_string();

        let subject = render_template(
            &config.email.subject_template,
            &[("user", user), ("date", &date), ("filename", &display_name)],
        );
        let body = render_template(
            &config.email.body_template,
            &[
                ("user", &escape_html(user)),
                ("date", &date),
                ("time", &time),
                ("filename", &escape_html(&display_name)),
                ("source", &escape_html(&source)),
            ],
        );

        Self {
            path: path.to_path_buf(),
            display_name,
            sender: config.email.sender.trim().to_string(),
            recipients: config.email.recipients.clone(),
            subject,
            body,
            size_bytes: std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
            user: user.to_string(),
            created: now,
        }
    }
}

/// File name of `path`, or the whole path if it has none.
#[must_use]
pub fn display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |n| n.to_string_lossy().into_owned(),
    )
}

/// Replaces every `{key}` in `template` with its value.
///
/// Substituted values are never scanned again, and unknown placeholders are
/// left as written.
#[must_use]
pub fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let value = tail.find('}').and_then(|close| {
            let key = &tail[1..close];
            values
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// The user the service runs as: `DOMAIN\user` on Windows, `$USER` elsewhere.
#[must_use]
pub fn current_user() -> String {
    let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

    if cfg!(windows) {
        if let Some(user) = var("USERNAME") {
            return match var("USERDOMAIN") {
                Some(domain) => format!("{domain}\\{user}"),
                None => user,
            };
        }
    }
    var("USER")
        .or_else(|| var("LOGNAME"))
        .unwrap_or_else(|| "unknown".to_string())
}
