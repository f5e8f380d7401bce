//! Scoring exported models against held-out arrays.

pub mod metrics;
pub mod step;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::jobs::JobError;

pub use step::EvaluationStep;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringStrategy {
    #[default]
    Accuracy,
    BalancedAccuracy,
    MacroF1,
}

impl ScoringStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ScoringStrategy::Accuracy => "accuracy",
            ScoringStrategy::BalancedAccuracy => "balanced_accuracy",
            ScoringStrategy::MacroF1 => "macro_f1",
        }
    }
}

impl fmt::Display for ScoringStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScoringStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "accuracy" => Ok(ScoringStrategy::Accuracy),
            "balanced_accuracy" => Ok(ScoringStrategy::BalancedAccuracy),
            "macro_f1" => Ok(ScoringStrategy::MacroF1),
            other => Err(format!("unknown scoring strategy `{other}`")),
        }
    }
}

/// Input of an evaluation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Relative paths resolve under the model root.
    pub model_path: PathBuf,
    /// Relative paths resolve under the data root, like `labels_path`.
    pub features_path: PathBuf,
    pub labels_path: PathBuf,
    #[serde(default)]
    pub scoring_strategy: ScoringStrategy,
}

impl EvaluationConfig {
    pub fn validate(&self) -> Result<(), JobError> {
        for (name, path) in [
            ("model_path", &self.model_path),
            ("features_path", &self.features_path),
            ("labels_path", &self.labels_path),
        ] {
            if path.as_os_str().is_empty() {
                return Err(JobError::configuration(format!("{name} is empty")));
            }
        }
        Ok(())
    }
}
