//! # pdfpost-core
//!
//! The drop-folder delivery pipeline behind `pdfpost`.
//!
//! This crate provides:
//! - **Configuration** - JSON model, validation and a live handle
//! - **Stability Prober** - waits for writers to finish before a file is read
//! - **Delivery Sender** - MIME assembly, zip fallback, SMTP submission
//! - **Retry Ledger** - fixed-interval retries persisted as `*.retry.json` sidecars
//! - **Pipeline** - directory watcher plus periodic retry sweep
//! - **Outcome Log** - one JSON line per attempt, one file per day
//!
//! Delivery is at-least-once: a crash between a successful send and the move
//! to `Sent/` leaves the file in place, and it is sent again on the next start.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
mod error;
pub mod folders;
pub mod ledger;
pub mod message;
pub mod outcome;
pub mod pipeline;
pub mod prober;
pub mod sender;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ConfigHandle, ConfigStore, ValidationError, validate_config};
pub use error::{Error, Result};
pub use ledger::{Disposition, PendingItem, RetryLedger, SweepReport};
pub use message::DeliveryMessage;
pub use outcome::{Outcome, OutcomeLogger, OutcomeRecord, OutcomeSink};
pub use pipeline::{FileOutcome, Pipeline, PipelineEvent, PipelineStatus};
pub use prober::{ProbeError, StabilityProber};
pub use sender::{DeliverySender, Envelope, MailTransport, SendError, SmtpTransport};
