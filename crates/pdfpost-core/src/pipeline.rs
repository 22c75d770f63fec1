//! Watcher/Scheduler.
//!
//! [`Pipeline`] ties the parts together: a directory watcher spawns one task
//! per new PDF (probe, send, archive or hand to the ledger) and a timer task
//! sweeps the ledger for due retries.
//!
//! ```text
//! notify ──▶ mpsc ──▶ event loop ──spawn──▶ process_file
//!                                             │ probe → send
//!                                             ├──▶ Sent/
//!                                             └──▶ RetryLedger ◀── sweep task (interval)
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{Semaphore, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::{ConfigHandle, ConfigStore};
use crate::folders::{is_pdf, sidecar_path};
use crate::ledger::{Disposition, RetryLedger, SweepReport};
use crate::message::{DeliveryMessage, current_user, display_name};
use crate::outcome::{Outcome, OutcomeRecord, OutcomeSink};
use crate::prober::{StabilityProber, is_printer_temp};
use crate::sender::{DeliverySender, MailTransport};
use crate::Result;

/// Lifecycle state reported to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStatus {
    /// Watching and sweeping.
    Running,
    /// Idle.
    Stopped,
    /// Could not start.
    Error(String),
}

/// Progress notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Lifecycle change.
    Status(PipelineStatus),
    /// A new PDF was picked up.
    Detected(String),
    /// First attempt for a file finished.
    Processed {
        /// File name.
        file: String,
        /// True if the relay accepted it.
        delivered: bool,
    },
}

/// What became of one detected file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Already being handled or pending a retry.
    Skipped,
    /// Never became readable; left in place.
    Unstable(String),
    /// Sent and archived.
    Delivered,
    /// Failed; waiting in the ledger with this many attempts.
    Pending(u32),
    /// Failed with no attempts left.
    DeadLettered(PathBuf),
}

struct Shared<T> {
    config: ConfigHandle,
    sender: DeliverySender<T>,
    ledger: RetryLedger,
    outcomes: Arc<dyn OutcomeSink>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<PipelineEvent>,
    permits: Semaphore,
    active: Mutex<HashSet<PathBuf>>,
    user: String,
}

struct Running {
    _watcher: RecommendedWatcher,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// The delivery pipeline: Idle until [`start`](Self::start), Running until
/// [`stop`](Self::stop).
pub struct Pipeline<T> {
    shared: Arc<Shared<T>>,
    lifecycle: tokio::sync::Mutex<Option<Running>>,
    running: AtomicBool,
}

impl<T: MailTransport + 'static> Pipeline<T> {
    /// Wires a pipeline. Nothing runs until [`start`](Self::start).
    pub fn new(
        config: ConfigHandle,
        transport: T,
        outcomes: Arc<dyn OutcomeSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_user(config, transport, outcomes, clock, current_user())
    }

    /// Like [`new`](Self::new) with an explicit originating user.
    pub fn with_user(
        config: ConfigHandle,
        transport: T,
        outcomes: Arc<dyn OutcomeSink>,
        clock: Arc<dyn Clock>,
        user: impl Into<String>,
    ) -> Self {
        let max_sends = config.snapshot().watcher.max_concurrent_sends.max(1);
        let (events, _) = broadcast::channel(64);
        let shared = Shared {
            sender: DeliverySender::new(
                transport,
                config.clone(),
                Arc::clone(&outcomes),
                Arc::clone(&clock),
            ),
            ledger: RetryLedger::new(config.clone(), Arc::clone(&outcomes), Arc::clone(&clock)),
            config,
            outcomes,
            clock,
            events,
            permits: Semaphore::new(max_sends),
            active: Mutex::new(HashSet::new()),
            user: user.into(),
        };
        Self {
            shared: Arc::new(shared),
            lifecycle: tokio::sync::Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Returns true between a successful start and the next stop.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Files waiting for a retry.
    pub fn pending_count(&self) -> usize {
        self.shared.ledger.pending_count()
    }

    /// The retry ledger.
    pub fn ledger(&self) -> &RetryLedger {
        &self.shared.ledger
    }

    /// Status and progress notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.shared.events.subscribe()
    }

    /// Starts watching and sweeping. A no-op while running.
    ///
    /// Validates the configuration, creates the folders, reloads the ledger
    /// from its sidecars and, if enabled, queues PDFs already waiting in the
    /// watched folder.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidConfig`] without starting anything if the
    /// configuration is incomplete, or an I/O or watch error if the folders
    /// cannot be prepared.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Ok(());
        }

        match self.prepare().await {
            Ok(running) => {
                *lifecycle = Some(running);
                self.running.store(true, Ordering::Release);
                self.shared.emit(PipelineEvent::Status(PipelineStatus::Running));
                info!(pending = self.pending_count(), "Pipeline started");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Pipeline failed to start");
                self.shared
                    .emit(PipelineEvent::Status(PipelineStatus::Error(e.to_string())));
                Err(e)
            }
        }
    }

    async fn prepare(&self) -> Result<Running> {
        let config = self.shared.config.snapshot();
        ConfigStore::validate(&config)?;
        ConfigStore::ensure_directories(&config).await?;
        self.shared.ledger.load_from_disk()?;

        let incoming = config.folders.incoming.clone();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = event_tx.send(res);
        })?;
        watcher.watch(&incoming, RecursiveMode::NonRecursive)?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(watch_loop(Arc::clone(&self.shared), event_rx, shutdown_rx.clone())),
            tokio::spawn(sweep_loop(Arc::clone(&self.shared), shutdown_rx)),
        ];

        if config.watcher.process_existing_on_start {
            for path in self.shared.backlog(&incoming) {
                info!(file = %display_name(&path), "Processing file left from a previous run");
                tokio::spawn(Arc::clone(&self.shared).process_file(path));
            }
        }

        Ok(Running {
            _watcher: watcher,
            shutdown,
            tasks,
        })
    }

    /// Stops watching and sweeping, then persists the ledger. A no-op while
    /// stopped.
    ///
    /// Sends already under way are allowed to finish.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(running) = lifecycle.take() else {
            return;
        };
        self.running.store(false, Ordering::Release);

        let Running {
            _watcher: watcher,
            shutdown,
            tasks,
        } = running;
        drop(watcher);
        let _ = shutdown.send(true);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Pipeline task ended abnormally");
            }
        }

        self.shared.ledger.persist_all();
        self.shared.emit(PipelineEvent::Status(PipelineStatus::Stopped));
        info!("Pipeline stopped");
    }

    /// Runs one file through probe, first send, and archive or ledger.
    pub async fn process_file(&self, path: impl Into<PathBuf>) -> FileOutcome {
        Arc::clone(&self.shared).process_file(path.into()).await
    }

    /// Runs one retry sweep now.
    pub async fn sweep_now(&self) -> SweepReport {
        self.shared.sweep().await
    }
}

impl<T: MailTransport + 'static> Shared<T> {
    fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event);
    }

    async fn sweep(&self) -> SweepReport {
        self.ledger.sweep(&self.sender, &self.user).await
    }

    /// PDFs in `incoming` not already tracked by the ledger.
    fn backlog(&self, incoming: &Path) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(incoming) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %incoming.display(), error = %e, "Cannot scan watched folder");
                return Vec::new();
            }
        };
        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_pdf(path) && path.is_file())
            .filter(|path| !sidecar_path(path).exists() && !self.ledger.contains(path))
            .collect();
        paths.sort();
        paths
    }

    /// Marks `path` as being handled; `None` if it already is.
    fn claim(&self, path: &Path) -> Option<ActiveGuard<'_>> {
        if self.ledger.contains(path) {
            return None;
        }
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(path.to_path_buf()) {
            return None;
        }
        Some(ActiveGuard {
            active: &self.active,
            paths: vec![path.to_path_buf()],
        })
    }

    async fn process_file(self: Arc<Self>, path: PathBuf) -> FileOutcome {
        let Some(mut guard) = self.claim(&path) else {
            debug!(path = %path.display(), "Already being handled");
            return FileOutcome::Skipped;
        };
        self.emit(PipelineEvent::Detected(display_name(&path)));

        let config = self.config.snapshot();
        let prober = StabilityProber::from_config(&config.watcher);

        let mut path = path;
        if is_printer_temp(&path, &config.watcher.printer_temp_name) {
            match prober
                .claim_printer_output(&path, config.watcher.printer_grace(), self.clock.now())
                .await
            {
                Ok(renamed) => {
                    guard.add(&renamed);
                    path = renamed;
                }
                Err(e) => return self.unstable(&path, &e.to_string()),
            }
        }

        if let Err(e) = prober.wait_until_stable(&path).await {
            return self.unstable(&path, &e.to_string());
        }

        let _permit = self.permits.acquire().await.ok();
        let config = self.config.snapshot();
        let message = DeliveryMessage::compose(&path, &config, &self.user, self.clock.now());

        let outcome = match self.sender.send(&message, 1).await {
            Ok(()) => {
                if let Err(e) = self.ledger.archive(&path) {
                    error!(file = %message.display_name, error = %e, "Delivered but failed to archive");
                }
                FileOutcome::Delivered
            }
            Err(e) => match self.ledger.fail(&message, &e.to_string()) {
                Disposition::Pending(item) => FileOutcome::Pending(item.attempts),
                Disposition::DeadLettered(dest) => FileOutcome::DeadLettered(dest),
            },
        };

        self.emit(PipelineEvent::Processed {
            file: message.display_name,
            delivered: outcome == FileOutcome::Delivered,
        });
        outcome
    }

    /// Logs a file that never became readable and leaves it where it is.
    fn unstable(&self, path: &Path, reason: &str) -> FileOutcome {
        warn!(path = %path.display(), reason, "File not ready, leaving it in place");
        let config = self.config.snapshot();
        self.outcomes.record(OutcomeRecord {
            time: self.clock.now(),
            display_name: display_name(path),
            original_path: path.to_path_buf(),
            outcome: Outcome::Failure,
            recipient: config.email.recipients.clone(),
            sender: config.email.sender.clone(),
            attempt: 1,
            duration_secs: 0.0,
            size_bytes: std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
            user: self.user.clone(),
            error: reason.to_string(),
        });
        self.emit(PipelineEvent::Processed {
            file: display_name(path),
            delivered: false,
        });
        FileOutcome::Unstable(reason.to_string())
    }
}

/// Releases claimed paths when a file task ends.
struct ActiveGuard<'a> {
    active: &'a Mutex<HashSet<PathBuf>>,
    paths: Vec<PathBuf>,
}

impl ActiveGuard<'_> {
    fn add(&mut self, path: &Path) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf());
        self.paths.push(path.to_path_buf());
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        for path in &self.paths {
            active.remove(path);
        }
    }
}

async fn watch_loop<T: MailTransport + 'static>(
    shared: Arc<Shared<T>>,
    mut events: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    Ok(event) if matches!(event.kind, EventKind::Create(_)) => {
                        for path in event.paths.into_iter().filter(|p| is_pdf(p)) {
                            debug!(path = %path.display(), "File created");
                            tokio::spawn(Arc::clone(&shared).process_file(path));
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Watcher error");
                        shared.emit(PipelineEvent::Status(PipelineStatus::Error(e.to_string())));
                    }
                }
            }
        }
    }
    debug!("Watch loop stopped");
}

async fn sweep_loop<T: MailTransport + 'static>(
    shared: Arc<Shared<T>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = shared.config.snapshot().retry.sweep_interval();
    let mut timer = tokio::time::interval(period.max(std::time::Duration::from_secs(1)));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the first tick to avoid immediate execution
    timer.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = timer.tick() => {
                shared.sweep().await;
            }
        }
    }
    debug!("Sweep loop stopped");
}
