//! Nearest-centroid baseline classifier.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::backend::{BackendError, ComputeBackend, Fitted};

/// Mean feature vector per class; predicts the class with the closest mean.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestCentroid;

impl NearestCentroid {
    pub const NAME: &'static str = "nearest_centroid";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentroidModel {
    pub backend: String,
    pub feature_length: usize,
    /// Sorted class names; `centroids[i]` belongs to `classes[i]`.
    pub classes: Vec<String>,
    pub centroids: Vec<Vec<f32>>,
}

impl CentroidModel {
    /// Load a model exported by [`NearestCentroid`].
    pub fn load(path: &Path) -> Result<Self, BackendError> {
        let bytes = std::fs::read(path).map_err(|source| BackendError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        let model: CentroidModel =
            serde_json::from_slice(&bytes).map_err(|source| BackendError::Format {
                path: path.to_path_buf(),
                source,
            })?;
        if model.backend != NearestCentroid::NAME {
            return Err(BackendError::WrongBackend {
                path: path.to_path_buf(),
                found: model.backend,
            });
        }
        Ok(model)
    }

    /// Class with the smallest squared distance; ties go to the first class.
    pub fn predict(&self, row: ArrayView1<'_, f32>) -> Option<&str> {
        let mut best: Option<(usize, f32)> = None;
        for (idx, centroid) in self.centroids.iter().enumerate() {
            let distance: f32 = centroid
                .iter()
                .zip(row.iter())
                .map(|(c, x)| (c - x) * (c - x))
                .sum();
            if best.is_none_or(|(_, current)| distance < current) {
                best = Some((idx, distance));
            }
        }
        best.map(|(idx, _)| self.classes[idx].as_str())
    }
}

impl ComputeBackend for NearestCentroid {
    type Model = CentroidModel;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn fit(
        &self,
        features: ArrayView2<'_, f32>,
        labels: &[String],
        time_limit: Option<Duration>,
    ) -> Result<Fitted<CentroidModel>, BackendError> {
        let started = Instant::now();
        let (rows, width) = features.dim();
        if rows != labels.len() {
            return Err(BackendError::Fit(format!(
                "{rows} feature rows but {} labels",
                labels.len()
            )));
        }
        if rows == 0 {
            return Err(BackendError::Fit("no training samples".to_string()));
        }
        if let Some(limit) = time_limit {
            debug!(limit_secs = limit.as_secs(), "Time limit not needed by nearest centroid");
        }
        let mut sums: BTreeMap<&str, (Array1<f32>, usize)> = BTreeMap::new();
        for (row, label) in features.outer_iter().zip(labels) {
            let entry = sums
                .entry(label.as_str())
                .or_insert_with(|| (Array1::zeros(width), 0));
            entry.0 += &row;
            entry.1 += 1;
        }
        let mut classes = Vec::with_capacity(sums.len());
        let mut centroids = Vec::with_capacity(sums.len());
        for (label, (sum, count)) in sums {
            classes.push(label.to_string());
            centroids.push((sum / count as f32).to_vec());
        }
        Ok(Fitted {
            model: CentroidModel {
                backend: Self::NAME.to_string(),
                feature_length: width,
                classes,
                centroids,
            },
            reported: started.elapsed(),
        })
    }

    fn export(&self, model: &CentroidModel, path: &Path) -> Result<(), BackendError> {
        let export_err = |source| BackendError::Export {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(export_err)?;
        }
        let bytes = serde_json::to_vec_pretty(model).map_err(|err| export_err(err.into()))?;
        std::fs::write(path, bytes).map_err(export_err)
    }
}
