use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use super::metrics::{self, ConfusionMatrix, PerClassStats};
use super::{EvaluationConfig, ScoringStrategy};
use crate::dataset::RunToken;
use crate::jobs::{JobError, JobOutcome};
use crate::training::CentroidModel;
use crate::training::step::{load_training_set, resolve};

#[derive(Debug, Serialize)]
struct EvaluationReport<'a> {
    model: &'a Path,
    features: &'a Path,
    labels: &'a Path,
    scoring_strategy: ScoringStrategy,
    score: f64,
    accuracy: f64,
    samples: usize,
    per_class: BTreeMap<&'a str, PerClassStats>,
}

/// Scores an exported model against a labelled feature set.
#[derive(Debug, Clone)]
pub struct EvaluationStep {
    data_root: PathBuf,
    model_root: PathBuf,
}

impl EvaluationStep {
    pub fn new(data_root: impl Into<PathBuf>, model_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            model_root: model_root.into(),
        }
    }

    pub fn run(&self, config: &EvaluationConfig) -> Result<JobOutcome, JobError> {
        config.validate()?;
        let model_path = resolve(&self.model_root, &config.model_path);
        let features_path = resolve(&self.data_root, &config.features_path);
        let labels_path = resolve(&self.data_root, &config.labels_path);
        let model = CentroidModel::load(&model_path)?;
        let (features, truth) = load_training_set(&features_path, &labels_path)?;
        if features.ncols() != model.feature_length {
            return Err(JobError::validation(format!(
                "model expects {} features per sample, {} has {}",
                model.feature_length,
                features_path.display(),
                features.ncols()
            )));
        }

        let mut predictions = Vec::with_capacity(truth.len());
        for row in features.outer_iter() {
            let predicted = model
                .predict(row)
                .ok_or_else(|| JobError::validation("model has no classes"))?;
            predictions.push(predicted);
        }

        let mut classes: Vec<&str> = truth
            .iter()
            .map(String::as_str)
            .chain(predictions.iter().copied())
            .collect();
        classes.sort_unstable();
        classes.dedup();
        let index = |name: &str| classes.binary_search_by(|class| (*class).cmp(name)).unwrap_or(0);
        let mut cm = ConfusionMatrix::new(classes.len());
        for (actual, predicted) in truth.iter().zip(&predictions) {
            cm.add(index(actual), index(predicted));
        }
        let stats = metrics::precision_recall_by_class(&cm);
        let accuracy = metrics::accuracy(&cm);
        let score = match config.scoring_strategy {
            ScoringStrategy::Accuracy => accuracy,
            ScoringStrategy::BalancedAccuracy => metrics::balanced_accuracy(&stats),
            ScoringStrategy::MacroF1 => metrics::macro_f1(&stats),
        };

        let report = EvaluationReport {
            model: &model_path,
            features: &features_path,
            labels: &labels_path,
            scoring_strategy: config.scoring_strategy,
            score,
            accuracy,
            samples: truth.len(),
            per_class: classes.iter().copied().zip(stats).collect(),
        };
        let report_path = report_path_for(&model_path, &RunToken::generate());
        write_report(&report_path, &report)?;
        info!(
            model = %model_path.display(),
            strategy = config.scoring_strategy.as_str(),
            score,
            "Evaluated model"
        );

        Ok(JobOutcome::default()
            .with_artifact("report", report_path)
            .with_metric("score", score)
            .with_metric("accuracy", accuracy)
            .with_metric("samples", truth.len() as f64))
    }
}

/// `<model file>.eval_<token>.json` next to the model.
fn report_path_for(model_path: &Path, token: &RunToken) -> PathBuf {
    let mut name = model_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(format!(".eval_{token}.json"));
    model_path.with_file_name(name)
}

fn write_report(path: &Path, report: &EvaluationReport<'_>) -> Result<(), JobError> {
    let io_err = |err: std::io::Error| JobError::io(format!("{}: {err}", path.display()));
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    serde_json::to_writer_pretty(temp.as_file_mut(), report)
        .map_err(|err| JobError::io(format!("{}: {err}", path.display())))?;
    temp.as_file_mut().flush().map_err(io_err)?;
    temp.persist_noclobber(path)
        .map_err(|err| io_err(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::npy;
    use crate::training::{ComputeBackend, NearestCentroid};
    use ndarray::array;
    use std::fs::File;
    use tempfile::tempdir;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    /// Model with centroids at 0 (`ok`) and 10 (`worn`), plus a held-out set
    /// where one `worn` sample sits closer to `ok`.
    fn fixture(root: &Path) -> PathBuf {
        let fitted = NearestCentroid
            .fit(
                array![[0.0f32], [10.0]].view(),
                &labels(&["ok", "worn"]),
                None,
            )
            .unwrap();
        let model_path = root.join("models").join("nearest_centroid_t.dump");
        NearestCentroid.export(&fitted.model, &model_path).unwrap();
        let features = array![[1.0f32], [0.5], [9.0], [4.0]];
        npy::write_f32_matrix(&mut File::create(root.join("x.npy")).unwrap(), &features).unwrap();
        npy::write_str_vector(
            &mut File::create(root.join("y.npy")).unwrap(),
            &labels(&["ok", "ok", "worn", "worn"]),
        )
        .unwrap();
        model_path
    }

    fn config(model_path: &Path, strategy: ScoringStrategy) -> EvaluationConfig {
        EvaluationConfig {
            model_path: model_path.to_path_buf(),
            features_path: PathBuf::from("x.npy"),
            labels_path: PathBuf::from("y.npy"),
            scoring_strategy: strategy,
        }
    }

    #[test]
    fn accuracy_and_report_are_produced() {
        let dir = tempdir().unwrap();
        let model_path = fixture(dir.path());
        let step = EvaluationStep::new(dir.path(), dir.path().join("models"));
        let outcome = step
            .run(&config(&model_path, ScoringStrategy::Accuracy))
            .unwrap();
        assert!((outcome.metrics["score"] - 0.75).abs() < 1e-12);

        let report_path = &outcome.artifacts[0].path;
        let name = report_path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("nearest_centroid_t.dump.eval_"));
        assert!(name.ends_with(".json"));
        let report: serde_json::Value =
            serde_json::from_slice(&std::fs::read(report_path).unwrap()).unwrap();
        assert_eq!(report["scoring_strategy"], "accuracy");
        assert_eq!(report["samples"], 4);
        assert_eq!(report["per_class"]["worn"]["support"], 2);
    }

    #[test]
    fn strategies_pick_different_scores() {
        let dir = tempdir().unwrap();
        let model_path = fixture(dir.path());
        let step = EvaluationStep::new(dir.path(), dir.path().join("models"));
        let balanced = step
            .run(&config(&model_path, ScoringStrategy::BalancedAccuracy))
            .unwrap();
        // recall ok = 1.0, recall worn = 0.5
        assert!((balanced.metrics["score"] - 0.75).abs() < 1e-12);
        let f1 = step
            .run(&config(&model_path, ScoringStrategy::MacroF1))
            .unwrap();
        // f1 ok = 0.8, f1 worn = 2/3
        assert!((f1.metrics["score"] - (0.8 + 2.0 / 3.0) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn relative_model_path_resolves_under_model_root() {
        let dir = tempdir().unwrap();
        fixture(dir.path());
        let step = EvaluationStep::new(dir.path(), dir.path().join("models"));
        let outcome = step
            .run(&config(
                Path::new("nearest_centroid_t.dump"),
                ScoringStrategy::Accuracy,
            ))
            .unwrap();
        assert!(outcome.artifacts[0].path.starts_with(dir.path().join("models")));
    }

    #[test]
    fn feature_width_must_match_model() {
        let dir = tempdir().unwrap();
        let model_path = fixture(dir.path());
        npy::write_f32_matrix(
            &mut File::create(dir.path().join("x.npy")).unwrap(),
            &array![[1.0f32, 2.0], [0.0, 0.0], [1.0, 1.0], [3.0, 3.0]],
        )
        .unwrap();
        let step = EvaluationStep::new(dir.path(), dir.path().join("models"));
        let err = step
            .run(&config(&model_path, ScoringStrategy::Accuracy))
            .unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
    }

    #[test]
    fn missing_model_is_an_io_error() {
        let dir = tempdir().unwrap();
        fixture(dir.path());
        let step = EvaluationStep::new(dir.path(), dir.path().join("models"));
        let err = step
            .run(&config(Path::new("gone.dump"), ScoringStrategy::Accuracy))
            .unwrap_err();
        assert!(matches!(err, JobError::Io(_)));
    }
}
