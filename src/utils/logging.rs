//! Diagnostic logging setup.
//!
//! Library code only emits `tracing` events; the binary installs a single
//! subscriber here. The filter comes from `SOW_LOG` (same syntax as
//! `RUST_LOG`) and defaults to warnings only, so an interactive chat is not
//! interleaved with log lines unless asked for.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "SOW_LOG";
const DEFAULT_FILTER: &str = "warn";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber. With `log_file` set, events are appended
/// to that file without ANSI colours; otherwise they go to stderr.
///
/// Calling this twice is harmless: the second subscriber is discarded.
pub fn init(log_file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter());

    let result = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    if let Err(err) = result {
        tracing::debug!(error = %err, "log subscriber already installed");
    }
    Ok(())
}
