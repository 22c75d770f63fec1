//! End-to-end runs of the pipeline against temp folders and a scripted relay.

#![allow(clippy::unwrap_used)]

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, TimeZone};
use pdfpost_core::config::{FolderConfig, SmtpSettings};
use pdfpost_core::folders::sidecar_path;
use pdfpost_core::{
    AppConfig, Clock, ConfigHandle, Envelope, Error, FileOutcome, MailTransport, ManualClock,
    Outcome, OutcomeLogger, OutcomeRecord, OutcomeSink, Pipeline, PipelineEvent, PipelineStatus,
    SendError, SweepReport,
};

/// Relay that either accepts everything or refuses to connect.
#[derive(Default)]
struct ScriptedRelay {
    down: AtomicBool,
    attempts: AtomicUsize,
    accepted: Mutex<Vec<String>>,
}

impl ScriptedRelay {
    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn accepted(&self) -> Vec<String> {
        self.accepted.lock().unwrap().clone()
    }
}

impl MailTransport for ScriptedRelay {
    async fn deliver(
        &self,
        _envelope: &Envelope,
        message: &[u8],
        _settings: &SmtpSettings,
    ) -> Result<(), SendError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(pdfpost_smtp::Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))
            .into());
        }
        self.accepted
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(message).into_owned());
        Ok(())
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<OutcomeRecord>>);

impl Recorder {
    fn count(&self, outcome: Outcome) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.outcome == outcome)
            .count()
    }

    fn all(&self) -> Vec<OutcomeRecord> {
        self.0.lock().unwrap().clone()
    }
}

impl OutcomeSink for Recorder {
    fn record(&self, record: OutcomeRecord) {
        self.0.lock().unwrap().push(record);
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    folders: FolderConfig,
    config: ConfigHandle,
    clock: Arc<ManualClock>,
    relay: Arc<ScriptedRelay>,
    outcomes: Arc<Recorder>,
    pipeline: Pipeline<Arc<ScriptedRelay>>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let folders = FolderConfig::under(dir.path().join("PDF_Out"));
        let mut config = AppConfig {
            folders: folders.clone(),
            ..AppConfig::default()
        };
        config.email.sender = "pdfsender@example.com".to_string();
        config.email.recipients = "archive@example.com; audit@example.com".to_string();
        config.smtp.username = "pdfsender@example.com".to_string();
        config.smtp.password = "secret".to_string();
        config.file.max_size_mb = 1;
        config.watcher.poll_interval_ms = 50;
        config.watcher.stability_timeout_secs = 5;
        config.watcher.printer_grace_ms = 50;
        config.watcher.process_existing_on_start = true;
        for folder in folders.all() {
            std::fs::create_dir_all(folder).unwrap();
        }

        let config = ConfigHandle::new(config);
        let clock = Arc::new(ManualClock::new(
            Local.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap(),
        ));
        let relay = Arc::new(ScriptedRelay::default());
        let outcomes = Arc::new(Recorder::default());
        let pipeline = Pipeline::with_user(
            config.clone(),
            Arc::clone(&relay),
            outcomes.clone(),
            clock.clone(),
            "ACME\\jdoe",
        );
        Self {
            _dir: dir,
            folders,
            config,
            clock,
            relay,
            outcomes,
            pipeline,
        }
    }

    /// A second pipeline over the same folders, as after a restart.
    fn restart(&self) -> Pipeline<Arc<ScriptedRelay>> {
        Pipeline::with_user(
            self.config.clone(),
            Arc::clone(&self.relay),
            self.outcomes.clone(),
            self.clock.clone(),
            "ACME\\jdoe",
        )
    }

    fn drop_pdf(&self, name: &str, len: usize) -> PathBuf {
        let path = self.folders.incoming.join(name);
        std::fs::write(&path, vec![b'%'; len]).unwrap();
        path
    }

    fn advance(&self, minutes: i64) {
        self.clock.advance(chrono::Duration::minutes(minutes));
    }
}

fn names_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

async fn wait_for(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn new_file_is_sent_and_archived() {
    let h = Harness::new();
    let mut events = h.pipeline.subscribe();
    h.pipeline.start().await.unwrap();
    assert!(h.pipeline.is_running());

    let path = h.drop_pdf("a.pdf", 1024);
    let archived = h.folders.sent.join("a.pdf");
    wait_for("a.pdf in Sent", || archived.exists()).await;
    wait_for("success record", || h.outcomes.count(Outcome::Success) == 1).await;

    assert!(!path.exists());
    assert_eq!(h.pipeline.pending_count(), 0);
    assert_eq!(h.outcomes.count(Outcome::Failure), 0);
    let record = &h.outcomes.all()[0];
    assert_eq!(record.attempt, 1);
    assert_eq!(record.size_bytes, 1024);
    assert_eq!(record.user, "ACME\\jdoe");

    let message = &h.relay.accepted()[0];
    assert!(message.contains("Subject: PDF Output - ACME\\jdoe - 04.03.2026 09:00 - a.pdf\r\n"));

    h.pipeline.stop().await;
    assert!(!h.pipeline.is_running());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(seen.first(), Some(&PipelineEvent::Status(PipelineStatus::Running)));
    assert!(seen.contains(&PipelineEvent::Detected("a.pdf".to_string())));
    assert!(seen.contains(&PipelineEvent::Processed {
        file: "a.pdf".to_string(),
        delivered: true,
    }));
    assert_eq!(seen.last(), Some(&PipelineEvent::Status(PipelineStatus::Stopped)));
}

#[tokio::test]
async fn unreachable_relay_dead_letters_after_max_attempts() {
    let h = Harness::new();
    h.relay.set_down(true);
    let path = h.drop_pdf("a.pdf", 1024);

    assert_eq!(h.pipeline.process_file(&path).await, FileOutcome::Pending(1));

    // Not due yet.
    h.advance(5);
    assert_eq!(h.pipeline.sweep_now().await, SweepReport::default());
    assert_eq!(h.relay.attempts(), 1);

    for attempt in 2..=4 {
        h.advance(10);
        let report = h.pipeline.sweep_now().await;
        assert_eq!(report.rescheduled, 1, "attempt {attempt}");
        assert_eq!(h.pipeline.ledger().get(&path).unwrap().attempts, attempt);
    }

    h.advance(10);
    let report = h.pipeline.sweep_now().await;
    assert_eq!(report.dead_lettered, 1);

    assert!(!path.exists());
    assert!(h.folders.failed.join("a.pdf").exists());
    assert!(h.folders.failed.join("a.pdf.retry.json").exists());
    assert!(!sidecar_path(&path).exists());
    assert_eq!(h.pipeline.pending_count(), 0);
    assert_eq!(h.relay.attempts(), 5);
    assert_eq!(h.outcomes.count(Outcome::Failure), 5);
    assert_eq!(h.outcomes.count(Outcome::Success), 0);

    // The last failure is not followed by a retry-scheduled record.
    let log: Vec<(Outcome, u32)> = h
        .outcomes
        .all()
        .iter()
        .map(|r| (r.outcome, r.attempt))
        .collect();
    assert_eq!(
        log,
        vec![
            (Outcome::Failure, 1),
            (Outcome::RetryScheduled, 1),
            (Outcome::Failure, 2),
            (Outcome::RetryScheduled, 2),
            (Outcome::Failure, 3),
            (Outcome::RetryScheduled, 3),
            (Outcome::Failure, 4),
            (Outcome::RetryScheduled, 4),
            (Outcome::Failure, 5),
        ]
    );
    let history: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(h.folders.failed.join("a.pdf.retry.json")).unwrap())
            .unwrap();
    assert_eq!(history["attempts"], 5);
    assert_eq!(history["next_attempt"], history["last_attempt"]);

    // Nothing left to do.
    h.advance(60);
    assert_eq!(h.pipeline.sweep_now().await, SweepReport::default());
}

#[tokio::test]
async fn pending_file_survives_restart() {
    let h = Harness::new();
    h.relay.set_down(true);
    let path = h.drop_pdf("invoice.pdf", 2048);

    assert_eq!(h.pipeline.process_file(&path).await, FileOutcome::Pending(1));
    h.advance(10);
    h.pipeline.sweep_now().await;
    let before = h.pipeline.ledger().get(&path).unwrap();
    assert_eq!(before.attempts, 2);

    let restarted = h.restart();
    assert_eq!(restarted.pending_count(), 0);
    restarted.start().await.unwrap();
    assert_eq!(restarted.pending_count(), 1);
    assert_eq!(restarted.ledger().get(&path).unwrap(), before);
    // Pending files are left to the sweep, not re-sent on start.
    assert_eq!(h.relay.attempts(), 2);
    restarted.stop().await;

    h.relay.set_down(false);
    h.advance(10);
    let report = restarted.sweep_now().await;
    assert_eq!(report.delivered, 1);
    assert!(h.folders.sent.join("invoice.pdf").exists());
    assert!(!sidecar_path(&path).exists());
    assert_eq!(restarted.pending_count(), 0);

    let success: Vec<_> = h
        .outcomes
        .all()
        .into_iter()
        .filter(|r| r.outcome == Outcome::Success)
        .collect();
    assert_eq!(success.len(), 1);
    assert_eq!(success[0].attempt, 3);
}

#[tokio::test]
async fn printer_temp_file_is_renamed_before_sending() {
    let h = Harness::new();
    let temp = h.drop_pdf("temp_print_job.pdf", 4096);

    assert_eq!(h.pipeline.process_file(&temp).await, FileOutcome::Delivered);

    assert!(!temp.exists());
    assert!(names_in(&h.folders.incoming).is_empty());
    let sent = names_in(&h.folders.sent);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with("PrintJob_20260304_090000_"), "{}", sent[0]);

    let message = &h.relay.accepted()[0];
    assert!(message.contains(&format!("name=\"{}\"", sent[0])));
    assert!(!message.contains("temp_print_job"));
    assert!(h.outcomes.all().iter().all(|r| r.display_name == sent[0]));
}

#[tokio::test]
async fn oversized_file_without_compression_is_retried_not_dead_lettered() {
    let h = Harness::new();
    h.config.modify(|c| c.file.compression_enabled = false);
    let path = h.drop_pdf("scan.pdf", 1024 * 1024 + 1);

    assert_eq!(h.pipeline.process_file(&path).await, FileOutcome::Pending(1));

    assert!(path.exists());
    assert!(sidecar_path(&path).exists());
    assert!(names_in(&h.folders.failed).is_empty());
    assert_eq!(h.relay.attempts(), 0);
    let failure = h
        .outcomes
        .all()
        .into_iter()
        .find(|r| r.outcome == Outcome::Failure)
        .unwrap();
    assert!(failure.error.starts_with("file too large"), "{}", failure.error);

    // Turning compression back on lets the next sweep through.
    h.config.modify(|c| c.file.compression_enabled = true);
    h.advance(10);
    assert_eq!(h.pipeline.sweep_now().await.delivered, 1);
    assert!(h.relay.accepted()[0].contains("name=\"scan.zip\""));
    assert!(h.folders.sent.join("scan.pdf").exists());
}

#[tokio::test]
async fn leftover_file_is_sent_on_start() {
    let h = Harness::new();
    let path = h.drop_pdf("left-behind.pdf", 512);

    h.pipeline.start().await.unwrap();
    let archived = h.folders.sent.join("left-behind.pdf");
    wait_for("backlog delivery", || archived.exists()).await;
    h.pipeline.stop().await;

    assert!(!path.exists());
    assert_eq!(h.outcomes.count(Outcome::Success), 1);
}

#[tokio::test]
async fn same_file_is_not_processed_twice() {
    let h = Harness::new();
    let path = h.drop_pdf("a.pdf", 100);

    let (first, second) = tokio::join!(
        h.pipeline.process_file(&path),
        h.pipeline.process_file(&path)
    );
    assert_eq!(first, FileOutcome::Delivered);
    assert_eq!(second, FileOutcome::Skipped);
    assert_eq!(h.relay.attempts(), 1);
}

#[tokio::test]
async fn vanished_file_is_dropped_from_ledger() {
    let h = Harness::new();
    h.relay.set_down(true);
    let path = h.drop_pdf("a.pdf", 100);
    h.pipeline.process_file(&path).await;

    std::fs::remove_file(&path).unwrap();
    h.advance(10);
    let report = h.pipeline.sweep_now().await;

    assert_eq!(report.dropped, 1);
    assert_eq!(h.pipeline.pending_count(), 0);
    assert!(!sidecar_path(&path).exists());
    assert_eq!(h.relay.attempts(), 1);
}

#[tokio::test]
async fn empty_file_is_left_in_place() {
    let h = Harness::new();
    h.config.modify(|c| c.watcher.stability_timeout_secs = 1);
    let path = h.drop_pdf("empty.pdf", 0);

    let outcome = h.pipeline.process_file(&path).await;
    assert!(matches!(outcome, FileOutcome::Unstable(_)), "{outcome:?}");
    assert!(path.exists());
    assert_eq!(h.pipeline.pending_count(), 0);
    assert_eq!(h.relay.attempts(), 0);
    assert_eq!(h.outcomes.count(Outcome::Failure), 1);
}

#[tokio::test]
async fn invalid_configuration_blocks_start() {
    let h = Harness::new();
    h.config.modify(|c| {
        c.smtp.use_oauth2 = true;
        c.smtp.tenant_id = "contoso".to_string();
    });
    let mut events = h.pipeline.subscribe();

    let err = h.pipeline.start().await.unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(ref errors) if errors.len() == 2));
    assert!(!h.pipeline.is_running());
    assert!(matches!(
        events.try_recv().unwrap(),
        PipelineEvent::Status(PipelineStatus::Error(_))
    ));
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let h = Harness::new();
    h.pipeline.stop().await;
    assert!(!h.pipeline.is_running());

    h.pipeline.start().await.unwrap();
    h.pipeline.start().await.unwrap();
    assert!(h.pipeline.is_running());

    h.pipeline.stop().await;
    h.pipeline.stop().await;
    assert!(!h.pipeline.is_running());
}

#[tokio::test]
async fn outcome_log_is_written_per_day() {
    let h = Harness::new();
    let logger = Arc::new(OutcomeLogger::new(&h.folders.logs));
    let pipeline = Pipeline::with_user(
        h.config.clone(),
        Arc::clone(&h.relay),
        logger.clone(),
        h.clock.clone(),
        "ACME\\jdoe",
    );
    h.relay.set_down(true);
    let path = h.drop_pdf("a.pdf", 100);

    pipeline.process_file(&path).await;

    assert!(h.folders.logs.join("pdf-automation-20260304.json").exists());
    let records = logger.records_for(h.clock.now().date_naive()).unwrap();
    let outcomes: Vec<_> = records.iter().map(|r| r.outcome).collect();
    assert_eq!(outcomes, vec![Outcome::Failure, Outcome::RetryScheduled]);
    assert!(records[1].error.contains("connection refused"));
}
