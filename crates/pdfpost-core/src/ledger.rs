//! Retry Ledger.
//!
//! Failed deliveries are tracked in memory, keyed by file path, and mirrored
//! to a `<file>.retry.json` sidecar next to each pending file. The sidecars
//! are the only durable state: [`RetryLedger::load_from_disk`] rebuilds the
//! ledger from them after a restart.
//!
//! Retries use a fixed interval: every recorded failure schedules the next
//! attempt at `now + interval`.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::ConfigHandle;
use crate::folders::{is_sidecar, move_file, move_into, sidecar_path, SIDECAR_SUFFIX};
use crate::message::DeliveryMessage;
use crate::outcome::{Outcome, OutcomeRecord, OutcomeSink};
use crate::sender::{DeliverySender, MailTransport};

/// Retry state for one file, persisted as its sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingItem {
    /// Pending file.
    pub path: PathBuf,
    /// File name shown to users.
    pub display_name: String,
    /// Failed attempts so far.
    pub attempts: u32,
    /// When the last attempt failed.
    pub last_attempt: DateTime<Local>,
    /// Earliest time for the next attempt.
    pub next_attempt: DateTime<Local>,
    /// `[HH:MM:SS] message`, oldest first.
    pub errors: Vec<String>,
}

/// What happened to a failed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Waiting for another attempt.
    Pending(PendingItem),
    /// Moved to the dead-letter folder.
    DeadLettered(PathBuf),
}

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Retried and delivered.
    pub delivered: usize,
    /// Retried, failed again, still pending.
    pub rescheduled: usize,
    /// Moved to the dead-letter folder.
    pub dead_lettered: usize,
    /// Source file gone; entry dropped.
    pub dropped: usize,
}

#[derive(Debug, Default)]
struct LedgerState {
    items: HashMap<PathBuf, PendingItem>,
    in_flight: HashSet<PathBuf>,
}

/// Thread-safe map of pending files.
pub struct RetryLedger {
    state: Mutex<LedgerState>,
    config: ConfigHandle,
    outcomes: Arc<dyn OutcomeSink>,
    clock: Arc<dyn Clock>,
}

impl RetryLedger {
    /// Creates an empty ledger.
    pub fn new(config: ConfigHandle, outcomes: Arc<dyn OutcomeSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            config,
            outcomes,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of pending files.
    pub fn pending_count(&self) -> usize {
        self.lock().items.len()
    }

    /// Returns true if `path` is pending.
    pub fn contains(&self, path: &Path) -> bool {
        self.lock().items.contains_key(path)
    }

    /// Entry for `path`.
    pub fn get(&self, path: &Path) -> Option<PendingItem> {
        self.lock().items.get(path).cloned()
    }

    /// All entries, ordered by path.
    pub fn items(&self) -> Vec<PendingItem> {
        let mut items: Vec<_> = self.lock().items.values().cloned().collect();
        items.sort_by(|a, b| a.path.cmp(&b.path));
        items
    }

    /// Records a failed attempt and schedules the next one.
    ///
    /// Creates the entry on first failure, otherwise bumps its attempt count.
    /// The sidecar is rewritten and a `retry-scheduled` outcome is logged,
    /// unless this failure used up the last attempt: then nothing further is
    /// scheduled and `next_attempt` equals `last_attempt`.
    pub fn record_failure(&self, message: &DeliveryMessage, error: &str) -> PendingItem {
        self.record(message, error).0
    }

    /// Records a failure, dead-lettering the file once attempts run out.
    pub fn fail(&self, message: &DeliveryMessage, error: &str) -> Disposition {
        let (item, exhausted) = self.record(message, error);
        if exhausted {
            match self.dead_letter(&item.path) {
                Ok(dest) => return Disposition::DeadLettered(dest),
                Err(e) => {
                    error!(file = %item.display_name, error = %e, "Failed to move file to dead-letter folder");
                }
            }
        }
        Disposition::Pending(item)
    }

    /// Updates and persists the entry; true if no attempts are left.
    fn record(&self, message: &DeliveryMessage, error: &str) -> (PendingItem, bool) {
        let now = self.clock.now();
        let config = self.config.snapshot();
        let entry = format!("[{}] {error}", now.format("%H:%M:%S"));

        let (item, exhausted) = {
            let mut state = self.lock();
            let item = state
                .items
                .entry(message.path.clone())
                .and_modify(|item| {
                    item.attempts += 1;
                    item.last_attempt = now;
                    item.errors.push(entry.clone());
                })
                .or_insert_with(|| PendingItem {
                    path: message.path.clone(),
                    display_name: message.display_name.clone(),
                    attempts: 1,
                    last_attempt: now,
                    next_attempt: now,
                    errors: vec![entry.clone()],
                });
            let exhausted = item.attempts >= config.retry.max_attempts;
            item.next_attempt = if exhausted {
                now
            } else {
                now + config.retry.interval()
            };
            let item = item.clone();
            persist(&item);
            (item, exhausted)
        };

        if exhausted {
            info!(file = %item.display_name, attempts = item.attempts, "No attempts left");
            return (item, true);
        }

        info!(
            file = %item.display_name,
            attempts = item.attempts,
            next_attempt = %item.next_attempt.format("%H:%M:%S"),
            "Scheduled retry"
        );
        self.outcomes.record(OutcomeRecord {
            time: now,
            display_name: item.display_name.clone(),
            original_path: item.path.clone(),
            outcome: Outcome::RetryScheduled,
            recipient: message.recipients.clone(),
            sender: message.sender.clone(),
            attempt: item.attempts,
            duration_secs: 0.0,
            size_bytes: message.size_bytes,
            user: message.user.clone(),
            error: error.to_string(),
        });
        (item, false)
    }

    /// Paths due at `now` that are not already being retried.
    pub fn due_items(&self, now: DateTime<Local>) -> Vec<PathBuf> {
        let state = self.lock();
        let mut due: Vec<_> = state
            .items
            .values()
            .filter(|item| item.next_attempt <= now && !state.in_flight.contains(&item.path))
            .map(|item| (item.next_attempt, item.path.clone()))
            .collect();
        due.sort();
        due.into_iter().map(|(_, path)| path).collect()
    }

    /// Drops the entry for `path` and deletes its sidecar.
    pub fn remove(&self, path: &Path) {
        let mut state = self.lock();
        state.items.remove(path);
        delete_sidecar(path);
    }

    /// Rewrites every sidecar.
    pub fn persist_all(&self) {
        let state = self.lock();
        for item in state.items.values() {
            persist(item);
        }
        debug!(count = state.items.len(), "Persisted retry ledger");
    }

    /// Moves a delivered file to the archive folder and forgets it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be moved; the entry is dropped
    /// either way.
    pub fn archive(&self, path: &Path) -> io::Result<PathBuf> {
        let sent = self.config.snapshot().folders.sent.clone();
        let result = move_into(path, &sent, self.clock.now());
        self.remove(path);
        if let Ok(dest) = &result {
            debug!(from = %path.display(), to = %dest.display(), "Archived");
        }
        result
    }

    /// Moves a file and its sidecar to the dead-letter folder and forgets it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be moved; the entry is kept so a
    /// later sweep tries again.
    pub fn dead_letter(&self, path: &Path) -> io::Result<PathBuf> {
        let failed = self.config.snapshot().folders.failed.clone();
        let mut state = self.lock();
        let dest = move_into(path, &failed, self.clock.now())?;

        let sidecar = sidecar_path(path);
        if sidecar.exists()
            && let Err(e) = move_file(&sidecar, &sidecar_path(&dest))
        {
            warn!(path = %sidecar.display(), error = %e, "Failed to move sidecar");
        }
        state.items.remove(path);
        drop(state);

        warn!(from = %path.display(), to = %dest.display(), "Attempts exhausted, moved to dead-letter folder");
        Ok(dest)
    }

    /// Rebuilds the ledger from the sidecars in the watched folder.
    ///
    /// Sidecars whose file is gone are deleted; unreadable ones are skipped.
    /// Loading an unchanged folder twice gives the same ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder exists but cannot be listed.
    pub fn load_from_disk(&self) -> crate::Result<usize> {
        let incoming = self.config.snapshot().folders.incoming.clone();
        let entries = match std::fs::read_dir(&incoming) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut loaded = 0;
        let mut state = self.lock();
        for entry in entries {
            let sidecar = entry?.path();
            if !is_sidecar(&sidecar) {
                continue;
            }
            let Some(target) = target_of(&sidecar) else {
                continue;
            };

            let mut item: PendingItem = match std::fs::read_to_string(&sidecar)
                .map_err(crate::Error::from)
                .and_then(|text| serde_json::from_str(&text).map_err(crate::Error::from))
            {
                Ok(item) => item,
                Err(e) => {
                    warn!(path = %sidecar.display(), error = %e, "Skipping unreadable sidecar");
                    continue;
                }
            };

            if !target.exists() {
                debug!(path = %sidecar.display(), "Removing orphaned sidecar");
                if let Err(e) = std::fs::remove_file(&sidecar) {
                    warn!(path = %sidecar.display(), error = %e, "Failed to remove orphaned sidecar");
                }
                continue;
            }

            item.path = target.clone();
            state.items.insert(target, item);
            loaded += 1;
        }
        drop(state);

        info!(count = loaded, "Loaded retry ledger");
        Ok(loaded)
    }

    /// Retries every due entry once.
    ///
    /// A missing file is dropped, an exhausted one is dead-lettered, the rest
    /// are re-sent with the next attempt number. Success archives the file;
    /// failure reschedules it.
    pub async fn sweep<T: MailTransport>(&self, sender: &DeliverySender<T>, user: &str) -> SweepReport {
        let mut report = SweepReport::default();
        for path in self.due_items(self.clock.now()) {
            let Some(item) = self.claim(&path) else {
                continue;
            };
            self.retry(sender, &item, user, &mut report).await;
            self.lock().in_flight.remove(&path);
        }
        if report != SweepReport::default() {
            info!(?report, pending = self.pending_count(), "Retry sweep finished");
        }
        report
    }

    fn claim(&self, path: &Path) -> Option<PendingItem> {
        let mut state = self.lock();
        if state.in_flight.contains(path) {
            return None;
        }
        let item = state.items.get(path).cloned()?;
        state.in_flight.insert(path.to_path_buf());
        Some(item)
    }

    async fn retry<T: MailTransport>(
        &self,
        sender: &DeliverySender<T>,
        item: &PendingItem,
        user: &str,
        report: &mut SweepReport,
    ) {
        let config = self.config.snapshot();

        if !item.path.exists() {
            info!(file = %item.display_name, "Pending file disappeared, dropping");
            self.remove(&item.path);
            report.dropped += 1;
            return;
        }

        if item.attempts >= config.retry.max_attempts {
            match self.dead_letter(&item.path) {
                Ok(_) => report.dead_lettered += 1,
                Err(e) => error!(file = %item.display_name, error = %e, "Failed to move file to dead-letter folder"),
            }
            return;
        }

        let message = DeliveryMessage::compose(&item.path, &config, user, self.clock.now());
        match sender.send(&message, item.attempts + 1).await {
            Ok(()) => {
                if let Err(e) = self.archive(&item.path) {
                    error!(file = %item.display_name, error = %e, "Delivered but failed to archive");
                }
                report.delivered += 1;
            }
            Err(e) => match self.fail(&message, &e.to_string()) {
                Disposition::Pending(_) => report.rescheduled += 1,
                Disposition::DeadLettered(_) => report.dead_lettered += 1,
            },
        }
    }
}

/// `<dir>/a.pdf.retry.json` -> `<dir>/a.pdf`
fn target_of(sidecar: &Path) -> Option<PathBuf> {
    let name = sidecar.file_name()?.to_str()?;
    let stem = &name[..name.len().checked_sub(SIDECAR_SUFFIX.len())?];
    Some(sidecar.with_file_name(stem))
}

fn persist(item: &PendingItem) {
    let sidecar = sidecar_path(&item.path);
    let result = serde_json::to_string_pretty(item)
        .map_err(io::Error::other)
        .and_then(|text| std::fs::write(&sidecar, text));
    if let Err(e) = result {
        error!(path = %sidecar.display(), error = %e, "Failed to write sidecar");
    }
}

fn delete_sidecar(path: &Path) {
    let sidecar = sidecar_path(path);
    match std::fs::remove_file(&sidecar) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => error!(path = %sidecar.display(), error = %e, "Failed to delete sidecar"),
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
    use crate::clock::ManualClock;
    use crate::config::{AppConfig, FolderConfig};
    use chrono::{Duration, TimeZone};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<OutcomeRecord>>);

    impl OutcomeSink for Recorder {
        fn record(&self, record: OutcomeRecord) {
            self.0.lock().unwrap().push(record);
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        config: ConfigHandle,
        clock: Arc<ManualClock>,
        outcomes: Arc<Recorder>,
        ledger: RetryLedger,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            folders: FolderConfig::under(dir.path()),
            ..AppConfig::default()
        };
        for folder in config.folders.all() {
            std::fs::create_dir_all(folder).unwrap();
        }
        let config = ConfigHandle::new(config);
        let clock = Arc::new(ManualClock::new(
            Local.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap(),
        ));
        let outcomes = Arc::new(Recorder::default());
        let ledger = RetryLedger::new(config.clone(), outcomes.clone(), clock.clone());
        Fixture {
            dir,
            config,
            clock,
            outcomes,
            ledger,
        }
    }

    impl Fixture {
        fn drop_file(&self, name: &str) -> DeliveryMessage {
            let path = self.config.snapshot().folders.incoming.join(name);
            std::fs::write(&path, b"%PDF-1.7").unwrap();
            DeliveryMessage::compose(&path, &self.config.snapshot(), "jdoe", self.clock.now())
        }
    }

    #[test]
    fn test_first_failure_creates_entry() {
        let fx = fixture();
        let message = fx.drop_file("a.pdf");

        let item = fx.ledger.record_failure(&message, "relay unreachable");

        assert_eq!(item.attempts, 1);
        assert_eq!(item.next_attempt - item.last_attempt, Duration::minutes(10));
        assert_eq!(item.errors, vec!["[09:00:00] relay unreachable".to_string()]);
        assert!(sidecar_path(&message.path).exists());

        let records = fx.outcomes.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, Outcome::RetryScheduled);
        assert_eq!(records[0].attempt, 1);
    }

    #[test]
    fn test_attempts_increment_by_one() {
        let fx = fixture();
        let message = fx.drop_file("a.pdf");

        for expected in 1..=4 {
            let item = fx.ledger.record_failure(&message, "boom");
            assert_eq!(item.attempts, expected);
            fx.clock.advance(Duration::minutes(3));
        }

        let item = fx.ledger.get(&message.path).unwrap();
        assert_eq!(item.errors.len(), 4);
        assert_eq!(item.last_attempt, fx.clock.now() - Duration::minutes(3));
        assert_eq!(item.next_attempt, item.last_attempt + Duration::minutes(10));
        assert_eq!(fx.ledger.pending_count(), 1);
    }

    #[test]
    fn test_interval_change_applies_to_next_failure() {
        let fx = fixture();
        let message = fx.drop_file("a.pdf");
        fx.ledger.record_failure(&message, "boom");

        fx.config.modify(|c| c.retry.interval_minutes = 1);
        let item = fx.ledger.record_failure(&message, "boom");
        assert_eq!(item.next_attempt - item.last_attempt, Duration::minutes(1));
    }

    #[test]
    fn test_due_items_does_not_mutate() {
        let fx = fixture();
        let a = fx.drop_file("a.pdf");
        fx.ledger.record_failure(&a, "boom");
        fx.clock.advance(Duration::minutes(5));
        let b = fx.drop_file("b.pdf");
        fx.ledger.record_failure(&b, "boom");

        let before = fx.ledger.items();
        assert!(fx.ledger.due_items(fx.clock.now()).is_empty());
        fx.clock.advance(Duration::minutes(5));
        assert_eq!(fx.ledger.due_items(fx.clock.now()), vec![a.path.clone()]);
        fx.clock.advance(Duration::minutes(5));
        assert_eq!(fx.ledger.due_items(fx.clock.now()), vec![a.path, b.path]);
        assert_eq!(fx.ledger.items(), before);
    }

    #[test]
    fn test_sidecar_round_trip() {
        let fx = fixture();
        let message = fx.drop_file("Quarterly report.pdf");
        fx.ledger.record_failure(&message, "first");
        fx.clock.advance(Duration::seconds(42));
        let item = fx.ledger.record_failure(&message, "second");

        let text = std::fs::read_to_string(sidecar_path(&message.path)).unwrap();
        let reloaded: PendingItem = serde_json::from_str(&text).unwrap();
        assert_eq!(reloaded, item);

        let fresh = RetryLedger::new(fx.config.clone(), fx.outcomes.clone(), fx.clock.clone());
        assert_eq!(fresh.load_from_disk().unwrap(), 1);
        assert_eq!(fresh.get(&message.path).unwrap(), item);
    }

    #[test]
    fn test_load_from_disk_is_idempotent() {
        let fx = fixture();
        for name in ["a.pdf", "b.pdf", "c.pdf"] {
            let message = fx.drop_file(name);
            fx.ledger.record_failure(&message, "boom");
        }

        let fresh = RetryLedger::new(fx.config.clone(), fx.outcomes.clone(), fx.clock.clone());
        fresh.load_from_disk().unwrap();
        let first = fresh.items();
        fresh.load_from_disk().unwrap();
        assert_eq!(fresh.items(), first);
        assert_eq!(first, fx.ledger.items());
    }

    #[test]
    fn test_load_discards_orphans_and_skips_garbage() {
        let fx = fixture();
        let message = fx.drop_file("a.pdf");
        fx.ledger.record_failure(&message, "boom");
        std::fs::remove_file(&message.path).unwrap();

        let incoming = &fx.config.snapshot().folders.incoming;
        let garbage = incoming.join("b.pdf.retry.json");
        std::fs::write(incoming.join("b.pdf"), b"%PDF").unwrap();
        std::fs::write(&garbage, b"{ nope").unwrap();

        let fresh = RetryLedger::new(fx.config.clone(), fx.outcomes.clone(), fx.clock.clone());
        assert_eq!(fresh.load_from_disk().unwrap(), 0);
        assert!(!sidecar_path(&message.path).exists());
        assert!(garbage.exists());
    }

    #[test]
    fn test_remove_deletes_sidecar() {
        let fx = fixture();
        let message = fx.drop_file("a.pdf");
        fx.ledger.record_failure(&message, "boom");

        fx.ledger.remove(&message.path);
        assert_eq!(fx.ledger.pending_count(), 0);
        assert!(!sidecar_path(&message.path).exists());
        assert!(message.path.exists());
    }

    #[test]
    fn test_dead_letter_moves_file_and_sidecar() {
        let fx = fixture();
        let message = fx.drop_file("a.pdf");
        fx.ledger.record_failure(&message, "boom");

        let dest = fx.ledger.dead_letter(&message.path).unwrap();
        assert_eq!(dest, fx.dir.path().join("Failed").join("a.pdf"));
        assert!(dest.exists());
        assert!(sidecar_path(&dest).exists());
        assert!(!message.path.exists());
        assert!(!sidecar_path(&message.path).exists());
        assert_eq!(fx.ledger.pending_count(), 0);
    }

    #[test]
    fn test_fail_dead_letters_when_exhausted() {
        let fx = fixture();
        fx.config.modify(|c| c.retry.max_attempts = 2);
        let message = fx.drop_file("a.pdf");

        assert!(matches!(fx.ledger.fail(&message, "boom"), Disposition::Pending(_)));
        assert!(matches!(fx.ledger.fail(&message, "boom"), Disposition::DeadLettered(_)));
        assert_eq!(fx.ledger.pending_count(), 0);
    }

    #[test]
    fn test_last_failure_schedules_nothing() {
        let fx = fixture();
        fx.config.modify(|c| c.retry.max_attempts = 1);
        let message = fx.drop_file("a.pdf");

        let Disposition::DeadLettered(dest) = fx.ledger.fail(&message, "boom") else {
            panic!("expected dead-letter");
        };

        assert!(fx.outcomes.0.lock().unwrap().is_empty());
        let text = std::fs::read_to_string(sidecar_path(&dest)).unwrap();
        let item: PendingItem = serde_json::from_str(&text).unwrap();
        assert_eq!(item.attempts, 1);
        assert_eq!(item.next_attempt, item.last_attempt);
        assert_eq!(item.errors, vec!["[09:00:00] boom".to_string()]);
    }

    #[test]
    fn test_archive_collision_keeps_both() {
        let fx = fixture();
        let sent = fx.dir.path().join("Sent");
        std::fs::write(sent.join("a.pdf"), b"earlier").unwrap();
        let message = fx.drop_file("a.pdf");
        fx.ledger.record_failure(&message, "boom");

        let dest = fx.ledger.archive(&message.path).unwrap();
        assert_eq!(dest, sent.join("a_20260304-090000.pdf"));
        assert_eq!(std::fs::read(sent.join("a.pdf")).unwrap(), b"earlier");
        assert!(!sidecar_path(&message.path).exists());
    }

    #[test]
    fn test_target_of_sidecar() {
        assert_eq!(
            target_of(Path::new("/in/a.pdf.retry.json")),
            Some(PathBuf::from("/in/a.pdf"))
        );
    }
}
