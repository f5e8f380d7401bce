//! Worker configuration stored as TOML.
//!
//! The configuration is loaded once at startup and handed to the components
//! that need it; nothing reads paths from process-wide state.

mod errors;
mod types;

use std::path::{Path, PathBuf};

use crate::app_dirs;

pub use errors::ConfigError;
pub use types::{LoggingSettings, ReconcileSettings, WorkerConfig};

/// Default filename used to store the worker configuration.
pub const CONFIG_FILE_NAME: &str = "worker.toml";

/// Resolve the default configuration file path inside the application root.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let dir = app_dirs::app_root_dir().map_err(map_app_dir_error)?;
    Ok(dir.join(CONFIG_FILE_NAME))
}

/// Load the default configuration file, returning defaults if it is missing.
pub fn load_or_default() -> Result<WorkerConfig, ConfigError> {
    let path = config_path()?;
    load_from_path(&path)
}

/// Load configuration from `path`; a missing file yields defaults rooted next to it.
pub fn load_from_path(path: &Path) -> Result<WorkerConfig, ConfigError> {
    let base = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    if !path.exists() {
        return WorkerConfig::with_base(&base).resolved(&base);
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: WorkerConfig = toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })?;
    config.resolved(&base)
}

/// Write configuration as pretty TOML, creating parent directories as needed.
pub fn save_to_path(config: &WorkerConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let data = toml::to_string_pretty(config).map_err(|source| ConfigError::SerializeToml {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, data).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn map_app_dir_error(error: app_dirs::AppDirError) -> ConfigError {
    match error {
        app_dirs::AppDirError::NoBaseDir => ConfigError::NoConfigDir,
        app_dirs::AppDirError::CreateDir { path, source } => {
            ConfigError::CreateDir { path, source }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults_next_to_it() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = load_from_path(&path).unwrap();
        assert_eq!(config.data_root, dir.path().join("data"));
        assert_eq!(config.model_root, dir.path().join("models"));
        assert_eq!(config.database, dir.path().join("jobs.db"));
        assert_eq!(config.npy_dir(), dir.path().join("data").join("npy"));
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn relative_paths_resolve_against_config_folder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "data_root = \"datasets\"\n\
             model_root = \"/srv/models\"\n\
             database = \"state/jobs.db\"\n\
             [logging]\n\
             filter = \"automl_worker=debug\"\n",
        )
        .unwrap();
        let config = load_from_path(&path).unwrap();
        assert_eq!(config.data_root, dir.path().join("datasets"));
        assert_eq!(config.model_root, PathBuf::from("/srv/models"));
        assert_eq!(config.database, dir.path().join("state/jobs.db"));
        assert_eq!(config.logging.filter, "automl_worker=debug");
        assert_eq!(config.logging.max_files, 10);
        assert_eq!(config.reconcile.stale_after_secs, 86_400);
    }

    #[test]
    fn zero_stale_window_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "data_root = \"d\"\nmodel_root = \"m\"\ndatabase = \"j.db\"\n[reconcile]\nstale_after_secs = 0\n",
        )
        .unwrap();
        let err = load_from_path(&path).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "reconcile.stale_after_secs",
                ..
            }
        ));
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let config = WorkerConfig::with_base(dir.path());
        save_to_path(&config, &path).unwrap();
        let loaded = load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
