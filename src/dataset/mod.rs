//! Dataset preparation: splitting, binarizing and versioned array artifacts.

pub mod artifacts;
pub mod binarize;
pub mod decode;
pub mod npy;
pub mod pipeline;
pub mod split;

pub use artifacts::{ArrayData, ArtifactCategory, ArtifactError, ArtifactStore, RunToken};
pub use binarize::binarize;
pub use decode::{DecodeError, FeatureDecoder, LabelStrategy, PngDecoder, WavDecoder};
pub use npy::NpyError;
pub use pipeline::{InputDataType, PreprocessingConfig, PreprocessingPipeline};
pub use split::{Split, split, validation_len};
