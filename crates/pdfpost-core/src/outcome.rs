//! Delivery outcome log.
//!
//! Every send attempt produces exactly one [`OutcomeRecord`]. The
//! [`OutcomeLogger`] appends records as JSON lines to a daily file in the
//! logs folder, mirrors them to `tracing` and rebroadcasts them to
//! in-process listeners.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Result of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// Message accepted by the relay.
    Success,
    /// Attempt failed.
    Failure,
    /// Failure recorded in the retry ledger with a next-attempt time.
    RetryScheduled,
}

impl Outcome {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::RetryScheduled => "retry-scheduled",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logged attempt. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// When the attempt finished.
    pub time: DateTime<Local>,
    /// File name shown to users.
    pub display_name: String,
    /// Path the file was picked up from.
    pub original_path: PathBuf,
    /// What happened.
    pub outcome: Outcome,
    /// Recipient list as configured.
    pub recipient: String,
    /// Sender address.
    pub sender: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Seconds spent on the attempt.
    pub duration_secs: f64,
    /// Size of the source file.
    pub size_bytes: u64,
    /// Originating user.
    pub user: String,
    /// Error text, empty on success.
    #[serde(default)]
    pub error: String,
}

/// Write-only sink for outcome records.
///
/// Implementations must not fail back into the caller.
pub trait OutcomeSink: Send + Sync {
    /// Record one attempt.
    fn record(&self, record: OutcomeRecord);
}

/// JSON-lines outcome log, one file per day.
#[derive(Debug)]
pub struct OutcomeLogger {
    dir: PathBuf,
    write_lock: Mutex<()>,
    events: broadcast::Sender<OutcomeRecord>,
}

impl OutcomeLogger {
    /// Log into `dir`, created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
            events,
        }
    }

    /// Folder holding the daily files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `pdf-automation-YYYYMMDD.json` for `date`.
    #[must_use]
    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("pdf-automation-{}.json", date.format("%Y%m%d")))
    }

    /// Receive every record as it is written.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OutcomeRecord> {
        self.events.subscribe()
    }

    /// Records written on `date`, skipping malformed lines.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn records_for(&self, date: NaiveDate) -> crate::Result<Vec<OutcomeRecord>> {
        let text = match std::fs::read_to_string(self.file_for(date)) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    /// Records written today.
    ///
    /// # Errors
    ///
    /// Returns an error if today's file exists but cannot be read.
    pub fn todays_records(&self) -> crate::Result<Vec<OutcomeRecord>> {
        self.records_for(Local::now().date_naive())
    }

    fn append(&self, record: &OutcomeRecord) -> crate::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        std::fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_for(record.time.date_naive()))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

impl OutcomeSink for OutcomeLogger {
    fn record(&self, record: OutcomeRecord) {
        match record.outcome {
            Outcome::Success => info!(
                file = %record.display_name,
                attempt = record.attempt,
                duration_secs = record.duration_secs,
                "Delivered"
            ),
            Outcome::Failure => warn!(
                file = %record.display_name,
                attempt = record.attempt,
                error = %record.error,
                "Delivery failed"
            ),
            Outcome::RetryScheduled => info!(
                file = %record.display_name,
                attempt = record.attempt,
                "Retry scheduled"
            ),
        }

        if let Err(e) = self.append(&record) {
            error!(dir = %self.dir.display(), error = %e, "Failed to write outcome log");
        }
        let _ = self.events.send(record);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(outcome: Outcome, time: DateTime<Local>) -> OutcomeRecord {
        OutcomeRecord {
            time,
            display_name: "a.pdf".to_string(),
            original_path: PathBuf::from("/in/a.pdf"),
            outcome,
            recipient: "archive@example.com".to_string(),
            sender: "scanner@example.com".to_string(),
            attempt: 1,
            duration_secs: 0.25,
            size_bytes: 1024,
            user: "ACME\\jdoe".to_string(),
            error: String::new(),
        }
    }

    #[test]
    fn test_outcome_names() {
        assert_eq!(
            serde_json::to_string(&Outcome::RetryScheduled).unwrap(),
            "\"retry-scheduled\""
        );
        assert_eq!(Outcome::Success.to_string(), "success");
    }

    #[test]
    fn test_daily_partitioning() {
        let dir = tempfile::tempdir().unwrap();
        let logger = OutcomeLogger::new(dir.path().join("Logs"));
        let monday = Local.with_ymd_and_hms(2026, 3, 2, 23, 59, 0).unwrap();
        let tuesday = Local.with_ymd_and_hms(2026, 3, 3, 0, 1, 0).unwrap();

        logger.record(record(Outcome::Failure, monday));
        logger.record(record(Outcome::Success, tuesday));

        assert!(dir.path().join("Logs/pdf-automation-20260302.json").exists());
        let monday_records = logger.records_for(monday.date_naive()).unwrap();
        assert_eq!(monday_records.len(), 1);
        assert_eq!(monday_records[0].outcome, Outcome::Failure);
        assert_eq!(logger.records_for(tuesday.date_naive()).unwrap()[0], record(Outcome::Success, tuesday));
    }

    #[test]
    fn test_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let logger = OutcomeLogger::new(dir.path());
        let now = Local::now();
        logger.record(record(Outcome::Success, now));

        let path = logger.file_for(now.date_naive());
        let mut text = std::fs::read_to_string(&path).unwrap();
        text.push_str("{ torn write\n\n");
        std::fs::write(&path, text).unwrap();
        logger.record(record(Outcome::Failure, now));

        let records = logger.todays_records().unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_unwritable_dir_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let logger = OutcomeLogger::new(blocker.join("Logs"));

        let mut rx = logger.subscribe();
        logger.record(record(Outcome::Success, Local::now()));
        assert_eq!(rx.try_recv().unwrap().outcome, Outcome::Success);
    }
}
