//! `pdfpost` - PDF drop-folder mailer
//!
//! Watches the incoming folder and mails every PDF that lands there.
//!
//! Usage: `pdfpost [--config PATH]`. Without `--config` the configuration
//! lives in the platform config directory and is created with defaults on
//! first run.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use pdfpost_core::{
    ConfigHandle, ConfigStore, OutcomeLogger, Pipeline, PipelineEvent, SmtpTransport, SystemClock,
    validate_config,
};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "pdfpost")]
#[command(about = "Mail every PDF dropped into a folder", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file, created with defaults if missing
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let store = match cli.config {
        Some(path) => ConfigStore::new(path),
        None => ConfigStore::at_default_path()?,
    };
    let config = store
        .load()
        .await
        .with_context(|| format!("failed to load {}", store.path().display()))?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(config = %store.path().display(), "Starting pdfpost");

    if let Err(errors) = validate_config(&config) {
        for e in &errors {
            error!(field = e.field(), "{}", e.message());
        }
        bail!(
            "configuration is incomplete, edit {} and restart",
            store.path().display()
        );
    }

    let outcomes = Arc::new(OutcomeLogger::new(&config.folders.logs));
    let pipeline = Pipeline::new(
        ConfigHandle::new(config),
        SmtpTransport::new(),
        outcomes,
        Arc::new(SystemClock),
    );

    let mut events = pipeline.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let PipelineEvent::Processed { file, delivered } = event {
                debug!(%file, delivered, "First attempt finished");
            }
        }
    });

    pipeline.start().await.context("failed to start pipeline")?;
    info!(pending = pipeline.pending_count(), "Watching for PDFs, press Ctrl-C to stop");

    shutdown_signal().await;
    info!("Shutting down");
    pipeline.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use clap::error::ErrorKind;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_config_flag() {
        let cli = Cli::try_parse_from(["pdfpost", "--config", "/etc/pdfpost.json"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/pdfpost.json")));

        let cli = Cli::try_parse_from(["pdfpost"]).unwrap();
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_flags_are_not_config_paths() {
        let err = Cli::try_parse_from(["pdfpost", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);

        let err = Cli::try_parse_from(["pdfpost", "--verbose"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);

        let err = Cli::try_parse_from(["pdfpost", "config.json"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }
}
