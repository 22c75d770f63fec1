//! File stability detection.
//!
//! A file dropped into the watched folder is usually still being written when
//! the creation event arrives. [`StabilityProber`] polls its size until two
//! consecutive polls agree on a non-zero length, then confirms the writer has
//! let go by taking an exclusive lock.

use std::fs::{File, TryLockError};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use rand::Rng;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace};

use crate::config::{MAX_STABILITY_TIMEOUT_SECS, WatcherConfig};

/// Sharing violation / lock violation on Windows.
const ERROR_SHARING_VIOLATION: i32 = 32;
const ERROR_LOCK_VIOLATION: i32 = 33;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Why a file never became ready.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// Still growing or locked when the timeout expired.
    #[error("file is locked or unreachable after {}s: {}", .after.as_secs(), .path.display())]
    Locked {
        /// File being probed.
        path: PathBuf,
        /// Configured timeout.
        after: Duration,
    },

    /// Removed while being probed.
    #[error("file disappeared: {}", .0.display())]
    Vanished(PathBuf),

    /// Any other file system error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Polls a file until it is safe to open.
#[derive(Debug, Clone, Copy)]
pub struct StabilityProber {
    poll_interval: Duration,
    timeout: Duration,
}

impl StabilityProber {
    /// Creates a prober.
    ///
    /// The poll period is at least 10 ms and the timeout at most a day.
    #[must_use]
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            timeout: timeout.min(Duration::from_secs(MAX_STABILITY_TIMEOUT_SECS)),
        }
    }

    /// Creates a prober from the watcher settings.
    #[must_use]
    pub fn from_config(config: &WatcherConfig) -> Self {
        Self::new(config.poll_interval(), config.stability_timeout())
    }

    /// Waits until `path` has a stable, non-zero size and can be locked.
    ///
    /// Returns the final size in bytes.
    ///
    /// # Errors
    ///
    /// [`ProbeError::Locked`] on timeout, [`ProbeError::Vanished`] if the file
    /// is removed, [`ProbeError::Io`] for anything else.
    pub async fn wait_until_stable(&self, path: &Path) -> Result<u64, ProbeError> {
        let deadline = Instant::now() + self.timeout;
        let mut last_size = None;

        loop {
            let size = match tokio::fs::metadata(path).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(ProbeError::Vanished(path.to_path_buf()));
                }
                Err(e) => return Err(e.into()),
            };

            if size > 0 && last_size == Some(size) {
                if try_exclusive(path).await? {
                    debug!(path = %path.display(), size, "File is stable");
                    return Ok(size);
                }
                trace!(path = %path.display(), "File still locked");
            }
            last_size = Some(size);

            if Instant::now() + self.poll_interval > deadline {
                return Err(ProbeError::Locked {
                    path: path.to_path_buf(),
                    after: self.timeout,
                });
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Takes over a virtual printer's temporary output.
    ///
    /// Waits `grace`, then renames the file to a unique `PrintJob_*` name in
    /// the same folder, retrying while the spooler still holds it. The
    /// returned path is the one to probe and send.
    ///
    /// # Errors
    ///
    /// Same as [`wait_until_stable`](Self::wait_until_stable).
    pub async fn claim_printer_output(
        &self,
        path: &Path,
        grace: Duration,
        now: DateTime<Local>,
    ) -> Result<PathBuf, ProbeError> {
        sleep(grace).await;

        let target = path.with_file_name(printer_job_name(now));
        let deadline = Instant::now() + self.timeout;
        loop {
            match tokio::fs::rename(path, &target).await {
                Ok(()) => {
                    debug!(from = %path.display(), to = %target.display(), "Claimed printer output");
                    return Ok(target);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(ProbeError::Vanished(path.to_path_buf()));
                }
                Err(e) if is_lock_error(&e) => {}
                Err(e) => return Err(e.into()),
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(ProbeError::Locked {
                    path: path.to_path_buf(),
                    after: self.timeout,
                });
            }
            sleep(self.poll_interval).await;
        }
    }
}

/// Returns true if `path` is the printer's temporary output file.
#[must_use]
pub fn is_printer_temp(path: &Path, temp_name: &str) -> bool {
    !temp_name.is_empty()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.eq_ignore_ascii_case(temp_name))
}

/// `PrintJob_<yyyyMMdd_HHmmss>_<8 hex>.pdf`
#[must_use]
pub fn printer_job_name(now: DateTime<Local>) -> String {
    let id: u32 = rand::thread_rng().r#gen();
    format!("PrintJob_{}_{id:08x}.pdf", now.format("%Y%m%d_%H%M%S"))
}

fn is_lock_error(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::PermissionDenied
        || e.kind() == io::ErrorKind::WouldBlock
        || matches!(
            e.raw_os_error(),
            Some(ERROR_SHARING_VIOLATION | ERROR_LOCK_VIOLATION)
        )
}

/// Opens `path` and tries an exclusive lock; `Ok(false)` means busy.
async fn try_exclusive(path: &Path) -> Result<bool, ProbeError> {
    let owned = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || -> io::Result<bool> {
        let file = match File::open(&owned) {
            Ok(file) => file,
            Err(e) if is_lock_error(&e) => return Ok(false),
            Err(e) => return Err(e),
        };
        match file.try_lock() {
            Ok(()) => {
                let _ = file.unlock();
                Ok(true)
            }
            Err(TryLockError::WouldBlock) => Ok(false),
            Err(TryLockError::Error(e)) if is_lock_error(&e) => Ok(false),
            Err(TryLockError::Error(e)) => Err(e),
        }
    })
    .await
    .map_err(io::Error::other)?;

    match result {
        Ok(ready) => Ok(ready),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(ProbeError::Vanished(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}
