//! Preprocessing: media folder → split (and optionally binarized) `.npy` arrays.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::artifacts::{ArrayData, ArtifactCategory, ArtifactStore, RunToken};
use super::binarize::binarize;
use super::decode::{FeatureDecoder, LabelStrategy, PngDecoder, WavDecoder};
use super::split::split;
use crate::jobs::{JobError, JobOutcome};

/// Generated seeds stay below 2^53 so they survive the f64 metrics column.
const GENERATED_SEED_BOUND: u64 = 1 << 53;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputDataType {
    Image,
    Audio,
}

impl InputDataType {
    pub fn extension(self) -> &'static str {
        match self {
            InputDataType::Image => "png",
            InputDataType::Audio => "wav",
        }
    }

    fn matches(self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(self.extension()))
    }
}

/// Input of a preprocessing job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Absolute, or relative to the worker's data root.
    pub input_folder: PathBuf,
    pub input_data_type: InputDataType,
    pub label_strategy: LabelStrategy,
    #[serde(default)]
    pub binarize: bool,
    /// Required iff `binarize`.
    #[serde(default)]
    pub positive_class: Option<String>,
    /// Shuffle seed; drawn at random and reported in the metrics when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_audio_frames")]
    pub audio_frames: usize,
    /// `[width, height]` images are resized to.
    #[serde(default = "default_image_size")]
    pub image_size: [u32; 2],
}

fn default_audio_frames() -> usize {
    16_000
}

fn default_image_size() -> [u32; 2] {
    [32, 32]
}

impl PreprocessingConfig {
    pub fn validate(&self) -> Result<(), JobError> {
        if self.input_folder.as_os_str().is_empty() {
            return Err(JobError::configuration("input_folder is empty"));
        }
        match (self.binarize, &self.positive_class) {
            (true, None) => {
                return Err(JobError::configuration(
                    "positive_class is required when binarize is set",
                ));
            }
            (true, Some(positive)) if positive.is_empty() => {
                return Err(JobError::configuration("positive_class is empty"));
            }
            (false, Some(_)) => {
                return Err(JobError::configuration(
                    "positive_class is only valid together with binarize",
                ));
            }
            _ => {}
        }
        if let LabelStrategy::FileStemPrefix { separator } = &self.label_strategy {
            if separator.is_empty() {
                return Err(JobError::configuration("label separator is empty"));
            }
        }
        match self.input_data_type {
            InputDataType::Audio if self.audio_frames == 0 => {
                Err(JobError::configuration("audio_frames must be positive"))
            }
            InputDataType::Image if self.image_size.contains(&0) => {
                Err(JobError::configuration("image_size must be positive"))
            }
            _ => Ok(()),
        }
    }
}

/// Drives enumeration, decoding, splitting and artifact writes for one run.
///
/// The pipeline never touches job records; errors go back to the executor.
#[derive(Debug, Clone)]
pub struct PreprocessingPipeline {
    data_root: PathBuf,
    store: ArtifactStore,
}

impl PreprocessingPipeline {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        let data_root = data_root.into();
        Self {
            store: ArtifactStore::new(data_root.clone()),
            data_root,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Run with the decoder for the configured media type and a seeded rng.
    pub fn run(&self, config: &PreprocessingConfig) -> Result<JobOutcome, JobError> {
        config.validate()?;
        let seed = config
            .seed
            .unwrap_or_else(|| rand::rng().random_range(0..GENERATED_SEED_BOUND));
        let mut rng = StdRng::seed_from_u64(seed);
        let outcome = match config.input_data_type {
            InputDataType::Audio => {
                let decoder = WavDecoder {
                    frames: config.audio_frames,
                };
                self.run_with(config, &decoder, &mut rng)?
            }
            InputDataType::Image => {
                let [width, height] = config.image_size;
                self.run_with(config, &PngDecoder { width, height }, &mut rng)?
            }
        };
        Ok(outcome.with_metric("seed", seed as f64))
    }

    /// Run with an explicit decoder and random source.
    pub fn run_with<D, R>(
        &self,
        config: &PreprocessingConfig,
        decoder: &D,
        rng: &mut R,
    ) -> Result<JobOutcome, JobError>
    where
        D: FeatureDecoder + ?Sized,
        R: Rng + ?Sized,
    {
        config.validate()?;
        let folder = self.resolve_input(&config.input_folder);
        if !folder.is_dir() {
            return Err(JobError::configuration(format!(
                "input folder {} does not exist",
                folder.display()
            )));
        }
        let mut files = Vec::new();
        collect_files_recursive(&folder, &mut files)?;
        files.retain(|path| config.input_data_type.matches(path));
        files.sort();
        if files.is_empty() {
            return Err(JobError::validation(format!(
                "no .{} files under {}",
                config.input_data_type.extension(),
                folder.display()
            )));
        }

        let mut pairs = Vec::with_capacity(files.len());
        let mut feature_len = None;
        for path in &files {
            let features = decoder.decode(path)?;
            let expected = *feature_len.get_or_insert(features.len());
            if features.len() != expected {
                return Err(JobError::validation(format!(
                    "{} decoded to {} values, expected {expected}",
                    path.display(),
                    features.len()
                )));
            }
            let label = config.label_strategy.label_for(path)?;
            pairs.push((features, label));
        }
        let feature_len = feature_len.unwrap_or(0);
        let samples = pairs.len();

        let parts = split(pairs, rng);
        if parts.validation_len() == 0 {
            warn!(samples, "Validation partition is empty");
        }
        let training_features = to_matrix(parts.training_features, feature_len)?;
        let validation_features = to_matrix(parts.validation_features, feature_len)?;

        let token = RunToken::generate();
        let mut outcome = JobOutcome::default();
        let mut write = |category: ArtifactCategory, data: ArrayData<'_>| -> Result<(), JobError> {
            let path = self.store.write(category, data, &token)?;
            outcome.artifacts.push(crate::jobs::Artifact::new(category.as_str(), path));
            Ok(())
        };
        write(
            ArtifactCategory::TrainingFeatures,
            ArrayData::Features(&training_features),
        )?;
        write(
            ArtifactCategory::TrainingLabels,
            ArrayData::Labels(&parts.training_labels),
        )?;
        write(
            ArtifactCategory::ValidationFeatures,
            ArrayData::Features(&validation_features),
        )?;
        write(
            ArtifactCategory::ValidationLabels,
            ArrayData::Labels(&parts.validation_labels),
        )?;
        if config.binarize {
            let positive = config
                .positive_class
                .as_ref()
                .ok_or_else(|| JobError::configuration("positive_class is missing"))?;
            if !parts
                .training_labels
                .iter()
                .chain(&parts.validation_labels)
                .any(|label| label == positive)
            {
                warn!(%positive, "Positive class does not occur in the dataset");
            }
            let training_binary = binarize(&parts.training_labels, positive);
            let validation_binary = binarize(&parts.validation_labels, positive);
            write(
                ArtifactCategory::TrainingLabelsBinary,
                ArrayData::Binary(&training_binary),
            )?;
            write(
                ArtifactCategory::ValidationLabelsBinary,
                ArrayData::Binary(&validation_binary),
            )?;
        }

        info!(
            run_token = %token,
            samples,
            training = parts.training_labels.len(),
            validation = parts.validation_labels.len(),
            "Preprocessing wrote {} artifacts",
            outcome.artifacts.len()
        );
        Ok(outcome
            .with_metric("samples", samples as f64)
            .with_metric("training_samples", parts.training_labels.len() as f64)
            .with_metric("validation_samples", parts.validation_labels.len() as f64)
            .with_metric("feature_length", feature_len as f64))
    }

    fn resolve_input(&self, folder: &Path) -> PathBuf {
        if folder.is_absolute() {
            folder.to_path_buf()
        } else {
            self.data_root.join(folder)
        }
    }
}

fn to_matrix(rows: Vec<Vec<f32>>, width: usize) -> Result<Array2<f32>, JobError> {
    let height = rows.len();
    let flat: Vec<f32> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((height, width), flat)
        .map_err(|err| JobError::validation(format!("feature matrix shape: {err}")))
}

fn collect_files_recursive(root: &Path, out: &mut Vec<PathBuf>) -> Result<(), JobError> {
    let entries = fs::read_dir(root)
        .map_err(|err| JobError::io(format!("Read dir {}: {err}", root.display())))?;
    for entry in entries {
        let entry = entry.map_err(|err| JobError::io(format!("Read dir entry: {err}")))?;
        let path = entry.path();
        let ty = entry
            .file_type()
            .map_err(|err| JobError::io(format!("File type {}: {err}", path.display())))?;
        if ty.is_dir() {
            collect_files_recursive(&path, out)?;
        } else if ty.is_file() {
            out.push(path);
        } else if ty.is_symlink() {
            debug!(path = %path.display(), "Skipping symlink");
        }
    }
    Ok(())
}
