use thiserror::Error;

use crate::dataset::{ArtifactError, DecodeError, NpyError};

/// Failure taxonomy for compute steps.
///
/// Every variant is caught once, at the executor, and stored as the record's
/// `additional_remarks`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Missing or invalid input paths, unsupported data types, bad parameters.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Failure raised by a training or decoding backend.
    #[error("compute error: {0}")]
    Compute(String),
    /// Artifact read or write failure.
    #[error("io error: {0}")]
    Io(String),
    /// Inputs were well formed but unusable, e.g. an empty dataset.
    #[error("validation error: {0}")]
    Validation(String),
}

impl JobError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn compute(msg: impl Into<String>) -> Self {
        Self::Compute(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<ArtifactError> for JobError {
    fn from(err: ArtifactError) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<NpyError> for JobError {
    fn from(err: NpyError) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<DecodeError> for JobError {
    fn from(err: DecodeError) -> Self {
        Self::Compute(err.to_string())
    }
}
