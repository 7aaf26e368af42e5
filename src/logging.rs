use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "competency-engine.log";

/// Flushes the file log writer when dropped.
#[must_use = "dropping the guard stops file logging"]
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

/// Installs a global subscriber filtered by `log_level`, an `EnvFilter`
/// directive (falls back to `info`). With `ENABLE_FILE_LOGS` set, events are
/// also written to daily files under `LOG_DIR` (default `./logs`).
///
/// Returns `None` when no file writer is running, including when the host
/// application already installed a subscriber.
pub fn init_tracing(log_level: &str) -> Option<FileLogGuard> {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match file_log_dir() {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, LOG_FILE_PREFIX));
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .try_init()
        .ok()?;

    guard.map(|guard| FileLogGuard { _guard: guard })
}

fn file_log_dir() -> Option<PathBuf> {
    let enabled = std::env::var("ENABLE_FILE_LOGS")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    if !enabled {
        return None;
    }

    let dir = PathBuf::from(std::env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string()));
    match std::fs::create_dir_all(&dir) {
        Ok(()) => Some(dir),
        Err(err) => {
            eprintln!("file logging disabled, cannot create {}: {err}", dir.display());
            None
        }
    }
}

/// Subscriber that writes through the test harness capture.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("competency_engine=debug"))
        .with_test_writer()
        .try_init();
}
