use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Initialize file logging under `{data_dir}/logs`.
///
/// Stdout is reserved for the page protocol, so logs never go there.
/// `RUST_LOG` overrides the default filter. Keep the returned guard alive
/// for the lifetime of the process or buffered lines are lost.
pub fn init(data_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
  let log_dir = data_dir.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&log_dir, "nickberg-offline.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = if verbose {
    "nickberg_offline=debug"
  } else {
    "nickberg_offline=info"
  };

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
    .with_writer(writer)
    .with_ansi(false)
    .with_target(true)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
