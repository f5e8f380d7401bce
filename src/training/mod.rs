//! Model training on preprocessed arrays.

pub mod backend;
pub mod centroid;
pub mod step;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::jobs::JobError;

pub use backend::{BackendError, ComputeBackend, Fitted};
pub use centroid::{CentroidModel, NearestCentroid};
pub use step::TrainingStep;

/// Input of a training job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// `<f4` feature matrix; relative paths resolve under the data root.
    pub input_data_path: PathBuf,
    /// Label vector aligned with `input_data_path`.
    pub labels_path: PathBuf,
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub verbose: bool,
    /// Advisory limit passed through to the backend.
    #[serde(default)]
    pub time_limit_secs: Option<u64>,
}

fn default_backend() -> String {
    NearestCentroid::NAME.to_string()
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), JobError> {
        if self.input_data_path.as_os_str().is_empty() {
            return Err(JobError::configuration("input_data_path is empty"));
        }
        if self.labels_path.as_os_str().is_empty() {
            return Err(JobError::configuration("labels_path is empty"));
        }
        if self.backend.trim().is_empty() {
            return Err(JobError::configuration("backend is empty"));
        }
        if self.time_limit_secs == Some(0) {
            return Err(JobError::configuration("time_limit_secs must be positive"));
        }
        Ok(())
    }
}
