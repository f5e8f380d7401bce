use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ndarray::Array2;
use tracing::{debug, info};

use super::TrainingConfig;
use super::backend::ComputeBackend;
use super::centroid::NearestCentroid;
use crate::dataset::{RunToken, npy};
use crate::jobs::{JobError, JobOutcome};

const MODEL_EXT: &str = "dump";

/// Fits a backend on preprocessed arrays and exports the model.
#[derive(Debug, Clone)]
pub struct TrainingStep {
    data_root: PathBuf,
    model_root: PathBuf,
}

impl TrainingStep {
    pub fn new(data_root: impl Into<PathBuf>, model_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            model_root: model_root.into(),
        }
    }

    /// Run with the backend named in `config`.
    pub fn run(&self, config: &TrainingConfig) -> Result<JobOutcome, JobError> {
        config.validate()?;
        match config.backend.as_str() {
            NearestCentroid::NAME => self.run_with(&NearestCentroid, config),
            other => Err(JobError::configuration(format!(
                "unknown training backend `{other}`"
            ))),
        }
    }

    pub fn run_with<B: ComputeBackend>(
        &self,
        backend: &B,
        config: &TrainingConfig,
    ) -> Result<JobOutcome, JobError> {
        let (features, labels) = load_training_set(
            &resolve(&self.data_root, &config.input_data_path),
            &resolve(&self.data_root, &config.labels_path),
        )?;
        let classes: BTreeSet<&str> = labels.iter().map(String::as_str).collect();
        if config.verbose {
            info!(
                backend = backend.name(),
                samples = labels.len(),
                classes = classes.len(),
                feature_length = features.ncols(),
                "Fitting model"
            );
        }

        let time_limit = config.time_limit_secs.map(Duration::from_secs);
        let fitted = backend.fit(features.view(), &labels, time_limit)?;
        let token = RunToken::generate();
        let path = self
            .model_root
            .join(format!("{}{token}.{MODEL_EXT}", backend.name()));
        backend.export(&fitted.model, &path)?;
        debug!(path = %path.display(), "Exported model");

        Ok(JobOutcome::default()
            .with_artifact("model", path)
            .with_metric("samples", labels.len() as f64)
            .with_metric("classes", classes.len() as f64)
            .with_metric("backend_reported_secs", fitted.reported.as_secs_f64()))
    }
}

/// Relative artifact paths are looked up under `root`.
pub(crate) fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Load a feature matrix and its labels, checking they line up.
pub(crate) fn load_training_set(
    features_path: &Path,
    labels_path: &Path,
) -> Result<(Array2<f32>, Vec<String>), JobError> {
    let features = npy::read_f32_matrix(&mut open(features_path)?)?;
    let labels = npy::read_labels(&mut open(labels_path)?)?;
    if features.nrows() != labels.len() {
        return Err(JobError::validation(format!(
            "{} has {} rows but {} has {} labels",
            features_path.display(),
            features.nrows(),
            labels_path.display(),
            labels.len()
        )));
    }
    if labels.is_empty() {
        return Err(JobError::validation(format!(
            "{} holds no samples",
            features_path.display()
        )));
    }
    Ok((features, labels))
}

fn open(path: &Path) -> Result<BufReader<File>, JobError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|err| JobError::configuration(format!("cannot open {}: {err}", path.display())))
}
