use std::path::PathBuf;

use thiserror::Error;

/// Errors that may occur while loading or saving worker configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No application directory could be resolved for the default config path.
    #[error("No suitable directory available for the worker config")]
    NoConfigDir,
    /// Failed to create a directory referenced by the config.
    #[error("Unable to create directory {path}: {source}")]
    CreateDir {
        /// Directory path that failed to create.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// Failed to read a config file.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// Failed to write a config file.
    #[error("Failed to write {path}: {source}")]
    Write {
        /// Path that failed to write.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// Failed to parse TOML config.
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        /// TOML file path.
        path: PathBuf,
        /// TOML parse error.
        source: toml::de::Error,
    },
    /// Failed to serialize config to TOML.
    #[error("Failed to serialize config to TOML at {path}: {source}")]
    SerializeToml {
        /// TOML file path.
        path: PathBuf,
        /// TOML serialization error.
        source: toml::ser::Error,
    },
    /// A value was present but unusable.
    #[error("Invalid config value for `{key}`: {reason}")]
    InvalidValue {
        /// Offending TOML key.
        key: &'static str,
        /// Human readable reason.
        reason: String,
    },
}
