//! Logging setup: rolling file output plus stdout, filtered via RUST_LOG.
//!
//! The process usually runs headless next to the display hardware, so the
//! file log is the primary record; stdout mirrors it for interactive runs.

use color_eyre::{eyre::eyre, Result};
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Keeps the file writer alive; dropping it flushes and closes the log.
pub struct LoggingGuard {
  _file_guard: WorkerGuard,
}

pub fn init(cfg: &LoggingConfig) -> Result<LoggingGuard> {
  std::fs::create_dir_all(&cfg.dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", cfg.dir.display(), e))?;

  let file_appender = tracing_appender::rolling::daily(&cfg.dir, &cfg.file);
  let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

  let file_layer = tracing_subscriber::fmt::layer()
    .with_writer(non_blocking_file)
    .with_ansi(false);

  let stdout_layer = tracing_subscriber::fmt::layer().with_writer(io::stdout);

  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(env_filter)
    .with(file_layer)
    .with(stdout_layer)
    .init();

  Ok(LoggingGuard {
    _file_guard: file_guard,
  })
}
