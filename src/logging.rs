//! Tracing setup for a worker process.
//!
//! One log file per worker launch (`automl-worker_<utc stamp>.log`), mirrored
//! to stdout. Only files carrying the worker prefix are ever pruned, so a
//! shared `logging.directory` is safe.

use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::OnceLock,
    time::SystemTime,
};

use time::{OffsetDateTime, UtcOffset, format_description::FormatItem, macros::format_description};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

use crate::app_dirs::{self, AppDirError};
use crate::config::LoggingSettings;

const LOG_FILE_PREFIX: &str = "automl-worker_";
const LOG_FILE_EXT: &str = "log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error(transparent)]
    AppDir(#[from] AppDirError),
    #[error("Failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to stamp log file name: {0}")]
    FileName(#[from] time::error::Format),
    #[error("A global tracing subscriber is already installed: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

impl LoggingError {
    fn io<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(std::io::Error) -> Self + 'a {
        move |source| Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Install the stdout + file subscriber described by `settings`.
///
/// Only the first successful call has an effect. On error the caller keeps
/// running without a file log.
pub fn init(settings: &LoggingSettings) -> Result<(), LoggingError> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let log_dir = match &settings.directory {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(LoggingError::io("create log directory", dir))?;
            dir.clone()
        }
        None => app_dirs::logs_dir()?,
    };
    let file_name = log_file_name(OffsetDateTime::now_utc())?;
    let log_path = log_dir.join(&file_name);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(LoggingError::io("create log file", &log_path))?;
    prune_worker_logs(&log_dir, settings.max_files.max(1))?;

    let (file_writer, guard) = tracing_appender::non_blocking(rolling::never(&log_dir, file_name));
    let timer = console_timer();
    let subscriber = Registry::default()
        .with(env_filter(&settings.filter))
        .with(fmt::layer().with_timer(timer.clone()).with_writer(std::io::stdout))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_timer(timer)
                .with_writer(file_writer),
        );
    tracing::subscriber::set_global_default(subscriber)?;
    let _ = LOG_GUARD.set(guard);

    tracing::info!(
        log_file = %log_path.display(),
        filter = %settings.filter,
        "Worker logging ready"
    );
    Ok(())
}

fn is_worker_log(path: &Path) -> bool {
    let named = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX));
    named && path.extension().and_then(|ext| ext.to_str()) == Some(LOG_FILE_EXT)
}

/// Delete the oldest worker logs until at most `keep` remain.
fn prune_worker_logs(dir: &Path, keep: usize) -> Result<(), LoggingError> {
    let mut logs: Vec<(SystemTime, PathBuf)> = fs::read_dir(dir)
        .map_err(LoggingError::io("list log directory", dir))?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|ty| ty.is_file()))
        .map(|entry| entry.path())
        .filter(|path| is_worker_log(path))
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .collect();

    logs.sort();
    let excess = logs.len().saturating_sub(keep);
    for (_, path) in logs.into_iter().take(excess) {
        fs::remove_file(&path).map_err(LoggingError::io("remove old log", &path))?;
    }
    Ok(())
}

/// Same basic UTC layout as run tokens, to the second.
fn log_file_name(now: OffsetDateTime) -> Result<String, LoggingError> {
    const STAMP: &[FormatItem<'_>] =
        format_description!("[year][month][day]T[hour][minute][second]Z");
    let stamp = now.to_offset(UtcOffset::UTC).format(STAMP)?;
    Ok(format!("{LOG_FILE_PREFIX}{stamp}.{LOG_FILE_EXT}"))
}

fn console_timer() -> fmt::time::OffsetTime<time::format_description::BorrowedFormatItem<'static>> {
    const DISPLAY: &[FormatItem<'static>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    fmt::time::OffsetTime::new(offset, DISPLAY.into())
}

/// `RUST_LOG` wins; a bad configured directive falls back to `info`.
fn env_filter(configured: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
