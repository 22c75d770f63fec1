//! Delivery Sender.
//!
//! Turns a [`DeliveryMessage`] into a MIME message, applies the size policy
//! (zipping oversized files when allowed) and hands it to a
//! [`MailTransport`]. Every call to [`DeliverySender::send`] writes exactly
//! one outcome record; moving the source file is left to the caller.

mod compress;
mod transport;

use std::io;
use std::sync::Arc;
use std::time::Instant;

use pdfpost_mime::{Attachment, MessageBuilder};
use pdfpost_smtp::Address;
use pdfpost_smtp::types::parse_address_list;
use tracing::debug;

pub use compress::{TempArchive, compress_to_temp};
pub use transport::{Envelope, MailTransport, SmtpTransport};

use crate::clock::Clock;
use crate::config::{AppConfig, ConfigHandle};
use crate::message::DeliveryMessage;
use crate::outcome::{Outcome, OutcomeRecord, OutcomeSink};

/// Whole megabytes, for messages.
#[allow(clippy::trivially_copy_pass_by_ref)]
const fn megabytes(bytes: &u64) -> u64 {
    *bytes / (1024 * 1024)
}

/// Why a single attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Attachment over the size limit, after compression if enabled.
    #[error("file too large: {} MB (max {} MB)", megabytes(.size_bytes), megabytes(.limit_bytes))]
    TooLarge {
        /// Size of what would have been attached.
        size_bytes: u64,
        /// Configured limit.
        limit_bytes: u64,
    },

    /// Reading the source or writing the archive failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Zip creation failed.
    #[error("compression failed: {0}")]
    Compression(#[from] zip::result::ZipError),

    /// The relay refused the session or the message.
    #[error(transparent)]
    Transport(#[from] pdfpost_smtp::Error),

    /// No access token could be obtained.
    #[error("OAuth2 error: {0}")]
    OAuth(#[from] pdfpost_oauth::Error),

    /// The message could not be rendered.
    #[error("message error: {0}")]
    Mime(#[from] pdfpost_mime::Error),

    /// Sender or recipients are not usable addresses.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A step outside the SMTP session took too long.
    #[error("{operation} timed out")]
    Timeout {
        /// What was being waited on.
        operation: &'static str,
    },
}

impl SendError {
    /// Returns true for the size-policy failure.
    #[must_use]
    pub const fn is_size_policy(&self) -> bool {
        matches!(self, Self::TooLarge { .. })
    }
}

/// Performs single send attempts and logs their outcome.
pub struct DeliverySender<T> {
    transport: T,
    config: ConfigHandle,
    outcomes: Arc<dyn OutcomeSink>,
    clock: Arc<dyn Clock>,
}

impl<T: MailTransport> DeliverySender<T> {
    /// Creates a sender.
    pub fn new(
        transport: T,
        config: ConfigHandle,
        outcomes: Arc<dyn OutcomeSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            config,
            outcomes,
            clock,
        }
    }

    /// The live configuration.
    pub const fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// The clock stamped on records.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// The outcome sink.
    pub fn outcomes(&self) -> &dyn OutcomeSink {
        self.outcomes.as_ref()
    }

    /// The underlying transport.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Makes one delivery attempt and records its outcome.
    ///
    /// # Errors
    ///
    /// Returns the reason the attempt failed; the failure has already been
    /// logged.
    pub async fn send(&self, message: &DeliveryMessage, attempt: u32) -> Result<(), SendError> {
        let started = Instant::now();
        let config = self.config.snapshot();
        let mut size_bytes = message.size_bytes;

        let result = self.attempt(message, &config, &mut size_bytes).await;

        let (outcome, error) = match &result {
            Ok(()) => (Outcome::Success, String::new()),
            Err(e) => (Outcome::Failure, e.to_string()),
        };
        self.outcomes.record(OutcomeRecord {
            time: self.clock.now(),
            display_name: message.display_name.clone(),
            original_path: message.path.clone(),
            outcome,
            recipient: message.recipients.clone(),
            sender: message.sender.clone(),
            attempt,
            duration_secs: started.elapsed().as_secs_f64(),
            size_bytes,
            user: message.user.clone(),
            error,
        });
        result
    }

    async fn attempt(
        &self,
        message: &DeliveryMessage,
        config: &AppConfig,
        size_bytes: &mut u64,
    ) -> Result<(), SendError> {
        let size = tokio::fs::metadata(&message.path).await?.len();
        *size_bytes = size;
        let limit = config.file.max_size_bytes();

        // Kept alive until the relay has the message; removed on drop.
        let mut archive = None;
        let (name, data) = if size > limit {
            if !config.file.compression_enabled {
                return Err(SendError::TooLarge {
                    size_bytes: size,
                    limit_bytes: limit,
                });
            }
            let zipped = compress_to_temp(&message.path).await?;
            let zipped_size = zipped.size()?;
            debug!(file = %message.display_name, size, zipped_size, "Compressed oversized file");
            if zipped_size > limit {
                return Err(SendError::TooLarge {
                    size_bytes: zipped_size,
                    limit_bytes: limit,
                });
            }
            let data = tokio::fs::read(zipped.path()).await?;
            let name = zipped.file_name();
            archive = Some(zipped);
            (name, data)
        } else {
            (
                message.display_name.clone(),
                tokio::fs::read(&message.path).await?,
            )
        };

        let envelope = envelope(message)?;
        let rendered = MessageBuilder::new()
            .from(envelope.from.as_str())
            .to(envelope.to.iter().map(Address::as_str))
            .subject(&message.subject)
            .html_body(&message.body)
            .attach(Attachment::new(name, data))
            .date(message.created.fixed_offset())
            .build()?;

        self.transport
            .deliver(&envelope, &rendered, &config.smtp)
            .await?;
        drop(archive);
        Ok(())
    }
}

fn envelope(message: &DeliveryMessage) -> Result<Envelope, SendError> {
    let from = Address::new(&message.sender).map_err(|e| SendError::InvalidAddress(e.to_string()))?;
    let to = parse_address_list(&message.recipients)
        .map_err(|e| SendError::InvalidAddress(e.to_string()))?;
    if to.is_empty() {
        return Err(SendError::InvalidAddress("no recipients configured".to_string()));
    }
    Ok(Envelope { from, to })
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
    use crate::config::SmtpSettings;
    use chrono::{Local, TimeZone};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<OutcomeRecord>>);

    impl OutcomeSink for Recorder {
        fn record(&self, record: OutcomeRecord) {
            self.0.lock().unwrap().push(record);
        }
    }

    #[derive(Default)]
    struct Capture {
        sent: Mutex<Vec<(Envelope, String)>>,
        fail_with: Mutex<Option<String>>,
    }

    impl MailTransport for Capture {
        async fn deliver(
            &self,
            envelope: &Envelope,
            message: &[u8],
            _settings: &SmtpSettings,
        ) -> Result<(), SendError> {
            if let Some(reason) = self.fail_with.lock().unwrap().clone() {
                return Err(pdfpost_smtp::Error::rejected(451, reason).into());
            }
            self.sent
                .lock()
                .unwrap()
                .push((envelope.clone(), String::from_utf8_lossy(message).into_owned()));
            Ok(())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        config: ConfigHandle,
        outcomes: Arc<Recorder>,
        sender: DeliverySender<Arc<Capture>>,
        transport: Arc<Capture>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.email.sender = "scanner@example.com".to_string();
        config.email.recipients = "a@example.com; b@example.com,".to_string();
        config.file.max_size_mb = 1;
        let config = ConfigHandle::new(config);
        let outcomes = Arc::new(Recorder::default());
        let transport = Arc::new(Capture::default());
        let clock = Arc::new(ManualClock::new(
            Local.with_ymd_and_hms(2026, 3, 4, 9, 15, 0).unwrap(),
        ));
        let sender = DeliverySender::new(
            Arc::clone(&transport),
            config.clone(),
            outcomes.clone(),
            clock,
        );
        Fixture {
            dir,
            config,
            outcomes,
            sender,
            transport,
        }
    }

    fn write(fx: &Fixture, name: &str, len: usize) -> DeliveryMessage {
        let path = fx.dir.path().join(name);
        std::fs::write(&path, vec![b'x'; len]).unwrap();
        DeliveryMessage::compose(&path, &fx.config.snapshot(), "jdoe", Local::now())
    }

    #[tokio::test]
    async fn test_success_records_one_outcome() {
        let fx = fixture();
        let message = write(&fx, "a.pdf", 1024);

        fx.sender.send(&message, 1).await.unwrap();

        let sent = fx.transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (envelope, body) = &sent[0];
        assert_eq!(envelope.to.len(), 2);
        assert!(body.contains("Content-Type: application/pdf; name=\"a.pdf\""));

        let records = fx.outcomes.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, Outcome::Success);
        assert_eq!(records[0].size_bytes, 1024);
        assert!(records[0].error.is_empty());
        assert!(message.path.exists());
    }

    #[tokio::test]
    async fn test_transport_failure_is_logged() {
        let fx = fixture();
        *fx.transport.fail_with.lock().unwrap() = Some("try later".to_string());
        let message = write(&fx, "a.pdf", 10);

        let err = fx.sender.send(&message, 3).await.unwrap_err();
        assert_eq!(err.to_string(), "SMTP error 451: try later");

        let records = fx.outcomes.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, Outcome::Failure);
        assert_eq!(records[0].attempt, 3);
        assert_eq!(records[0].error, "SMTP error 451: try later");
    }

    #[tokio::test]
    async fn test_exactly_at_limit_is_sent_uncompressed() {
        let fx = fixture();
        fx.config.modify(|c| c.file.compression_enabled = false);
        let message = write(&fx, "edge.pdf", 1024 * 1024);

        fx.sender.send(&message, 1).await.unwrap();
        assert!(fx.transport.sent.lock().unwrap()[0].1.contains("name=\"edge.pdf\""));
    }

    #[tokio::test]
    async fn test_oversized_without_compression() {
        let fx = fixture();
        fx.config.modify(|c| c.file.compression_enabled = false);
        let message = write(&fx, "big.pdf", 1024 * 1024 + 1);

        let err = fx.sender.send(&message, 1).await.unwrap_err();
        assert!(err.is_size_policy());
        assert_eq!(err.to_string(), "file too large: 1 MB (max 1 MB)");
        assert!(fx.transport.sent.lock().unwrap().is_empty());
        assert_eq!(fx.outcomes.0.lock().unwrap()[0].size_bytes, 1024 * 1024 + 1);
    }

    #[tokio::test]
    async fn test_oversized_is_zipped() {
        let fx = fixture();
        let message = write(&fx, "big.pdf", 3 * 1024 * 1024);

        fx.sender.send(&message, 1).await.unwrap();

        let sent = fx.transport.sent.lock().unwrap();
        assert!(sent[0].1.contains("Content-Type: application/zip; name=\"big.zip\""));
        assert_eq!(fx.outcomes.0.lock().unwrap()[0].size_bytes, 3 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_incompressible_oversized_fails() {
        use rand::RngCore;
        let fx = fixture();
        let path = fx.dir.path().join("noise.pdf");
        let mut data = vec![0u8; 2 * 1024 * 1024];
        rand::thread_rng().fill_bytes(&mut data);
        std::fs::write(&path, data).unwrap();
        let message = DeliveryMessage::compose(&path, &fx.config.snapshot(), "jdoe", Local::now());

        let err = fx.sender.send(&message, 1).await.unwrap_err();
        assert!(err.is_size_policy());
        assert!(fx.transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vanished_file_is_a_failure() {
        let fx = fixture();
        let message = write(&fx, "a.pdf", 10);
        std::fs::remove_file(&message.path).unwrap();

        let err = fx.sender.send(&message, 2).await.unwrap_err();
        assert!(matches!(err, SendError::Io(_)));
        assert_eq!(fx.outcomes.0.lock().unwrap()[0].outcome, Outcome::Failure);
    }

    #[tokio::test]
    async fn test_bad_recipient_is_a_failure() {
        let fx = fixture();
        let mut message = write(&fx, "a.pdf", 10);
        message.recipients = "a@example.com; nobody".to_string();

        let err = fx.sender.send(&message, 1).await.unwrap_err();
        assert!(matches!(err, SendError::InvalidAddress(_)));
        assert!(fx.transport.sent.lock().unwrap().is_empty());
    }
}
