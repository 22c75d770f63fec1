//! Shared, live configuration.

use std::sync::Arc;

use tokio::sync::watch;

use super::model::AppConfig;

/// Cloneable handle to the current configuration.
///
/// Readers take a [`snapshot`](Self::snapshot) per operation, so edits made
/// through [`update`](Self::update) apply from the next attempt on.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    tx: Arc<watch::Sender<Arc<AppConfig>>>,
}

impl ConfigHandle {
    /// Wrap an initial configuration.
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(config));
        Self { tx: Arc::new(tx) }
    }

    /// Current configuration.
    #[must_use]
    pub fn snapshot(&self) -> Arc<AppConfig> {
        Arc::clone(&self.tx.borrow())
    }

    /// Replace the configuration.
    pub fn update(&self, config: AppConfig) {
        self.tx.send_replace(Arc::new(config));
    }

    /// Edit the configuration in place.
    pub fn modify(&self, edit: impl FnOnce(&mut AppConfig)) {
        let mut config = (*self.snapshot()).clone();
        edit(&mut config);
        self.update(config);
    }

    /// Receiver notified on every update.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<AppConfig>> {
        self.tx.subscribe()
    }
}
