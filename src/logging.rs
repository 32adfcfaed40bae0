//! Logging configuration and initialization
//!
//! Events go to stdout and, when a log directory is configured, are appended
//! without ANSI colours to `<log_dir>/pipeline.log`. The level comes from
//! `RUST_LOG` and defaults to `info`.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::error::{PipelineError, PipelineResult};

/// Log file name inside the log directory
pub const LOG_FILE_NAME: &str = "pipeline.log";

const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber
///
/// Fails instead of panicking when a subscriber is already installed.
pub fn init_logging(log_dir: Option<&Path>) -> PipelineResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .map_err(|e| PipelineError::io_with_path(dir, "creating log directory", e))?;
            let path = dir.join(LOG_FILE_NAME);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| PipelineError::io_with_path(&path, "opening log file", e))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .map_err(|e| PipelineError::ConfigError(format!("logging already initialised: {e}")))?;

    debug!(log_dir = ?log_dir, "Logging initialised");
    Ok(())
}
