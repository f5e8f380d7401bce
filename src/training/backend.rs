use std::path::{Path, PathBuf};
use std::time::Duration;

use ndarray::ArrayView2;
use thiserror::Error;

use crate::jobs::JobError;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("fit failed: {0}")]
    Fit(String),
    #[error("Failed to write model {path}: {source}")]
    Export {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to read model {path}: {source}")]
    Load {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Model file {path} is invalid: {source}")]
    Format {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Model file {path} was written by backend `{found}`")]
    WrongBackend { path: PathBuf, found: String },
}

impl From<BackendError> for JobError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Fit(_) => JobError::compute(err.to_string()),
            BackendError::Export { .. } | BackendError::Load { .. } => JobError::io(err.to_string()),
            BackendError::Format { .. } | BackendError::WrongBackend { .. } => {
                JobError::configuration(err.to_string())
            }
        }
    }
}

/// A fitted model plus the training time the backend itself reported.
///
/// `reported` is informational; the executor's own measurement is what gets
/// stored as the job's training time.
#[derive(Debug, Clone)]
pub struct Fitted<M> {
    pub model: M,
    pub reported: Duration,
}

/// A training algorithm the worker can hand features and labels to.
pub trait ComputeBackend {
    type Model;

    /// Used as the model file prefix, e.g. `nearest_centroid<token>.dump`.
    fn name(&self) -> &'static str;

    /// `time_limit` is advisory; backends may ignore it.
    fn fit(
        &self,
        features: ArrayView2<'_, f32>,
        labels: &[String],
        time_limit: Option<Duration>,
    ) -> Result<Fitted<Self::Model>, BackendError>;

    fn export(&self, model: &Self::Model, path: &Path) -> Result<(), BackendError>;
}
