//! Pipeline configuration.
//!
//! Provides the configuration model, its validation, the JSON file store and
//! a live handle the pipeline re-reads before every attempt.

mod handle;
mod model;
mod store;
mod validation;

pub use handle::ConfigHandle;
pub use model::{
    AppConfig, EmailConfig, FileConfig, FolderConfig, LoggingConfig, MAX_STABILITY_TIMEOUT_SECS,
    RetryConfig, SmtpSettings, WatcherConfig,
};
pub use store::ConfigStore;
pub use validation::{ValidationError, ValidationResult, validate_config};
