//! JSON configuration file storage.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::model::AppConfig;
use super::validation::validate_config;
use crate::{Error, Result};

/// Reads and writes the configuration file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Create a store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a store at the platform default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform has no configuration directory.
    pub fn at_default_path() -> Result<Self> {
        Ok(Self::new(Self::default_path()?))
    }

    /// `<config dir>/pdfpost/config.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform has no configuration directory.
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("pdfpost").join("config.json"))
            .ok_or_else(|| Error::Config("no configuration directory on this platform".into()))
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration, writing the defaults first if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn load(&self) -> Result<AppConfig> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => {
                let config = serde_json::from_str(&text)?;
                debug!(path = %self.path.display(), "Loaded configuration");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = AppConfig::default();
                self.save(&config).await?;
                info!(path = %self.path.display(), "Wrote default configuration");
                Ok(config)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Save the configuration, replacing the file atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let text = serde_json::to_string_pretty(config)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Create every configured folder.
    ///
    /// # Errors
    ///
    /// Returns an error if a folder cannot be created.
    pub async fn ensure_directories(config: &AppConfig) -> Result<()> {
        for dir in config.folders.all() {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Validate `config`, folding every problem into one error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] listing every invalid field.
    pub fn validate(config: &AppConfig) -> Result<()> {
        validate_config(config).map_err(Error::InvalidConfig)
    }
}
