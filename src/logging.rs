//! Tracing setup for the server and the bulk indexer.
//!
//! Every event goes to stdout. A second, ANSI-free copy is appended to `FINFUNC_LOG_FILE`, or to
//! `logs/finfunc.log` when the variable is unset. Upload, indexing and query events carry
//! `session_id`, `collection` and `filename` fields so a single request can be followed in the
//! file log. `RUST_LOG` controls filtering and defaults to `info`.
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE_ENV: &str = "FINFUNC_LOG_FILE";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_FILE: &str = "finfunc.log";

/// Flushes the file writer on exit; must outlive the subscriber.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where the file copy of the log goes.
#[derive(Debug, PartialEq, Eq)]
enum FileTarget {
    /// Explicit file from the environment, opened for append.
    Explicit(PathBuf),
    /// `logs/finfunc.log` under the working directory.
    Default,
}

impl FileTarget {
    fn from_env_value(value: Option<String>) -> Self {
        match value.filter(|path| !path.trim().is_empty()) {
            Some(path) => Self::Explicit(PathBuf::from(path)),
            None => Self::Default,
        }
    }

    fn open(&self) -> std::io::Result<NonBlocking> {
        let (writer, guard) = match self {
            Self::Explicit(path) => {
                if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                tracing_appender::non_blocking(file)
            }
            Self::Default => {
                std::fs::create_dir_all(DEFAULT_LOG_DIR)?;
                tracing_appender::non_blocking(tracing_appender::rolling::never(
                    DEFAULT_LOG_DIR,
                    DEFAULT_LOG_FILE,
                ))
            }
        };
        let _ = FILE_GUARD.set(guard);
        Ok(writer)
    }
}

/// Install the global subscriber. Falls back to stdout alone when the log file cannot be opened.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact());

    let target = FileTarget::from_env_value(std::env::var(LOG_FILE_ENV).ok());
    match target.open() {
        Ok(writer) => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .compact(),
            )
            .init(),
        Err(error) => {
            registry.init();
            tracing::warn!(target = ?target, error = %error, "File logging disabled");
        }
    }
}
