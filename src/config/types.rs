use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::ConfigError;

const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_MAX_LOG_FILES: usize = 10;
const DEFAULT_STALE_AFTER_SECS: u64 = 24 * 60 * 60;

/// Worker configuration loaded from `worker.toml`.
///
/// Config keys (TOML): `data_root`, `model_root`, `database`, `logging`, `reconcile`.
/// Relative paths are resolved against the folder holding the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Root for preprocessing inputs and `npy/` artifacts.
    pub data_root: PathBuf,
    /// Root for exported model dumps.
    pub model_root: PathBuf,
    /// SQLite database holding job records.
    pub database: PathBuf,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub reconcile: ReconcileSettings,
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Number of log files kept in the logs directory.
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
    /// Optional override for the logs directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            max_files: default_max_log_files(),
            directory: None,
        }
    }
}

/// Settings for the stuck-job sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Age after which an `in_progress` record is considered abandoned.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl WorkerConfig {
    /// Defaults anchored under a single base folder.
    pub fn with_base(base: &Path) -> Self {
        Self {
            data_root: base.join("data"),
            model_root: base.join("models"),
            database: base.join("jobs.db"),
            logging: LoggingSettings::default(),
            reconcile: ReconcileSettings::default(),
        }
    }

    /// Join relative paths onto `base` and reject values that can never work.
    pub(crate) fn resolved(mut self, base: &Path) -> Result<Self, ConfigError> {
        self.data_root = absolutize(base, self.data_root);
        self.model_root = absolutize(base, self.model_root);
        self.database = absolutize(base, self.database);
        self.logging.directory = self.logging.directory.map(|dir| absolutize(base, dir));
        if self.logging.max_files == 0 {
            return Err(ConfigError::InvalidValue {
                key: "logging.max_files",
                reason: "must keep at least one log file".to_string(),
            });
        }
        if self.reconcile.stale_after_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "reconcile.stale_after_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(self)
    }

    /// Folder that receives preprocessing arrays.
    pub fn npy_dir(&self) -> PathBuf {
        self.data_root.join("npy")
    }
}

fn absolutize(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn default_max_log_files() -> usize {
    DEFAULT_MAX_LOG_FILES
}

fn default_stale_after_secs() -> u64 {
    DEFAULT_STALE_AFTER_SECS
}
