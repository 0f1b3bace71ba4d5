//! strlab daemon: hosts the result watcher and the workflow sweep.
//!
//! ```text
//! main() -> init_tracing() -> LabConfig::load() -> runtime::run(services, shutdown)
//!                                                     |-- sweep_loop
//!                                                     `-- watch_loop
//! ```
//!
//! Ctrl-C flips the shutdown channel; both loops finish their current unit of
//! work and exit.

use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use strlab_engine::{LabConfig, Services, TracingSink, data_dir, runtime};

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // No log file: a daemon still needs its logs somewhere.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    vec![
        // Primary: ~/.strlab/logs/strlab.log
        data_dir().join("logs").join("strlab.log"),
        // Fallback: ./.strlab/logs/strlab.log
        PathBuf::from(".strlab").join("logs").join("strlab.log"),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = LabConfig::load()
        .context("failed to load config")?
        .unwrap_or_default();
    let settings = config.resolve().context("invalid config")?;
    let services = Services::new(settings, Arc::new(TracingSink));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut pipeline = tokio::spawn(runtime::run(services, shutdown_rx));

    tokio::select! {
        finished = &mut pipeline => {
            // Only reachable when start-up fails or a loop dies on its own.
            finished
                .context("pipeline task panicked")?
                .context("pipeline stopped")?;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            tracing::info!("Shutdown requested");
        }
    }

    // The receivers may already be gone if both loops exited.
    let _ = shutdown_tx.send(true);
    pipeline
        .await
        .context("pipeline task panicked")?
        .context("pipeline stopped")?;
    Ok(())
}
