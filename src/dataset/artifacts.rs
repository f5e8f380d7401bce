//! Versioned `.npy` artifacts under `<data_root>/npy/`.

use std::fmt;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ndarray::Array2;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;
use tracing::debug;

use super::npy::{self, NpyError};

const NPY_DIR: &str = "npy";
const NPY_EXT: &str = "npy";

/// Which array of a preprocessing run an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactCategory {
    TrainingFeatures,
    TrainingLabels,
    ValidationFeatures,
    ValidationLabels,
    TrainingLabelsBinary,
    ValidationLabelsBinary,
}

impl ArtifactCategory {
    pub const ALL: [ArtifactCategory; 6] = [
        ArtifactCategory::TrainingFeatures,
        ArtifactCategory::TrainingLabels,
        ArtifactCategory::ValidationFeatures,
        ArtifactCategory::ValidationLabels,
        ArtifactCategory::TrainingLabelsBinary,
        ArtifactCategory::ValidationLabelsBinary,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactCategory::TrainingFeatures => "training_features",
            ArtifactCategory::TrainingLabels => "training_labels",
            ArtifactCategory::ValidationFeatures => "validation_features",
            ArtifactCategory::ValidationLabels => "validation_labels",
            ArtifactCategory::TrainingLabelsBinary => "training_labels_binary",
            ArtifactCategory::ValidationLabelsBinary => "validation_labels_binary",
        }
    }

    fn accepts(self, data: &ArrayData<'_>) -> bool {
        matches!(
            (self, data),
            (
                ArtifactCategory::TrainingFeatures | ArtifactCategory::ValidationFeatures,
                ArrayData::Features(_)
            ) | (
                ArtifactCategory::TrainingLabels | ArtifactCategory::ValidationLabels,
                ArrayData::Labels(_)
            ) | (
                ArtifactCategory::TrainingLabelsBinary | ArtifactCategory::ValidationLabelsBinary,
                ArrayData::Binary(_)
            )
        )
    }
}

impl fmt::Display for ArtifactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier shared by every artifact of one pipeline run.
///
/// UTC timestamp with nanoseconds plus eight random hex digits, so two runs
/// started in the same instant still get distinct tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunToken(String);

impl RunToken {
    pub fn generate() -> Self {
        Self::at(OffsetDateTime::now_utc())
    }

    pub fn at(when: OffsetDateTime) -> Self {
        const FORMAT: &[FormatItem<'_>] = format_description!(
            "[year][month][day]T[hour][minute][second].[subsecond digits:9]Z"
        );
        let stamp = when
            .to_offset(time::UtcOffset::UTC)
            .format(&FORMAT)
            .unwrap_or_else(|_| "unknown".into());
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{stamp}-{}", &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Array payload handed to [`ArtifactStore::write`].
#[derive(Debug, Clone, Copy)]
pub enum ArrayData<'a> {
    Features(&'a Array2<f32>),
    Labels(&'a [String]),
    Binary(&'a [i64]),
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("{category} cannot hold this kind of array")]
    CategoryMismatch { category: ArtifactCategory },
    #[error("Failed to create artifact folder {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write artifact {path}: {source}")]
    Write { path: PathBuf, source: NpyError },
    #[error("Refusing to replace artifact {path}: {source}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Writes arrays to `<root>/npy/<category>_<run_token>.npy`.
///
/// There is no retention policy: artifacts of earlier or failed runs stay on
/// disk until something outside the worker removes them.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            root: data_root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn npy_dir(&self) -> PathBuf {
        self.root.join(NPY_DIR)
    }

    pub fn path_for(&self, category: ArtifactCategory, token: &RunToken) -> PathBuf {
        self.npy_dir()
            .join(format!("{}_{}.{NPY_EXT}", category.as_str(), token.as_str()))
    }

    /// Encode `data` and place it at its final path. Never overwrites.
    pub fn write(
        &self,
        category: ArtifactCategory,
        data: ArrayData<'_>,
        token: &RunToken,
    ) -> Result<PathBuf, ArtifactError> {
        if !category.accepts(&data) {
            return Err(ArtifactError::CategoryMismatch { category });
        }
        let dir = self.npy_dir();
        std::fs::create_dir_all(&dir).map_err(|source| ArtifactError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        let path = self.path_for(category, token);
        let write_err = |source: NpyError| ArtifactError::Write {
            path: path.clone(),
            source,
        };
        let mut temp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|err| write_err(NpyError::Io(err)))?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            match data {
                ArrayData::Features(matrix) => npy::write_f32_matrix(&mut writer, matrix),
                ArrayData::Labels(labels) => npy::write_str_vector(&mut writer, labels),
                ArrayData::Binary(values) => npy::write_i64_vector(&mut writer, values),
            }
            .map_err(write_err)?;
            writer
                .flush()
                .map_err(|err| write_err(NpyError::Io(err)))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|err| write_err(NpyError::Io(err)))?;
        temp.persist_noclobber(&path)
            .map_err(|err| ArtifactError::Persist {
                path: path.clone(),
                source: err.error,
            })?;
        debug!(category = category.as_str(), path = %path.display(), "Wrote artifact");
        Ok(path)
    }
}
