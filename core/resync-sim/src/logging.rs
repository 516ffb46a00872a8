use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const LOG_FILE_PREFIX: &str = "resync-sim.log";

/// Keeps the file writer flushing until dropped.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Stderr logging always; a daily rolling file too when `log_dir` is given.
///
/// `RESYNC_DEBUG_LOG=1` forces debug. Otherwise `RUST_LOG` applies, falling back to info.
pub fn init(log_dir: Option<&Path>) -> LoggingGuard {
    let debug_enabled = env::var("RESYNC_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let mut file_setup_error = None;
    let (file_layer, file_guard) = match log_dir {
        Some(dir) => match fs_err::create_dir_all(dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .boxed();
                (Some(layer), Some(guard))
            }
            Err(err) => {
                file_setup_error = Some(err.to_string());
                (None, None)
            }
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    if let Some(error) = file_setup_error {
        tracing::warn!(error = %error, "Log directory unavailable; logging to stderr only");
    }

    LoggingGuard { _file: file_guard }
}
