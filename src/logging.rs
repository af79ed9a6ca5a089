use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber: stderr always, plus a daily rolling file
/// when `log_dir` is set. Keep the returned guard alive to flush the file.
pub fn init(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offline_worker=info"));

  let (file_layer, guard) = match log_dir {
    Some(dir) => {
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      let appender = tracing_appender::rolling::daily(dir, "offline-worker.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      (
        Some(fmt::layer().with_ansi(false).with_writer(writer)),
        Some(guard),
      )
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(file_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
