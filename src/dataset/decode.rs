//! Turning media files into feature vectors and labels.

use std::io::BufReader;
use std::path::{Path, PathBuf};

use hound::SampleFormat;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid wav {path}: {source}")]
    Wav {
        path: PathBuf,
        source: hound::Error,
    },
    #[error("Invalid image {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("{path} has no label: {reason}")]
    Label { path: PathBuf, reason: String },
}

/// Decodes one input file into a fixed-length feature vector.
pub trait FeatureDecoder {
    fn decode(&self, path: &Path) -> Result<Vec<f32>, DecodeError>;
}

/// Mono wav samples in [-1, 1], truncated or zero-padded to `frames`.
#[derive(Debug, Clone, Copy)]
pub struct WavDecoder {
    pub frames: usize,
}

impl FeatureDecoder for WavDecoder {
    fn decode(&self, path: &Path) -> Result<Vec<f32>, DecodeError> {
        let wav_err = |source| DecodeError::Wav {
            path: path.to_path_buf(),
            source,
        };
        let file = std::fs::File::open(path).map_err(|err| wav_err(hound::Error::IoError(err)))?;
        let mut reader = hound::WavReader::new(BufReader::new(file)).map_err(wav_err)?;
        let spec = reader.spec();
        let interleaved = match spec.sample_format {
            SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(wav_err)?,
            SampleFormat::Int => {
                let scale = (1i64 << spec.bits_per_sample.saturating_sub(1)).max(1) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|value| value as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(wav_err)?
            }
        };
        let channels = usize::from(spec.channels.max(1));
        let mut mono: Vec<f32> = interleaved
            .chunks(channels)
            .take(self.frames)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        mono.resize(self.frames, 0.0);
        Ok(mono)
    }
}

/// Grayscale pixels in [0, 1], resized to `width × height`, row-major.
#[derive(Debug, Clone, Copy)]
pub struct PngDecoder {
    pub width: u32,
    pub height: u32,
}

impl FeatureDecoder for PngDecoder {
    fn decode(&self, path: &Path) -> Result<Vec<f32>, DecodeError> {
        let image = image::open(path).map_err(|source| DecodeError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        let gray = image
            .resize_exact(self.width, self.height, FilterType::Triangle)
            .to_luma8();
        Ok(gray.pixels().map(|pixel| f32::from(pixel.0[0]) / 255.0).collect())
    }
}

/// How a sample's class label is derived from its path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum LabelStrategy {
    /// Name of the folder directly containing the file.
    ParentDirectory,
    /// File stem up to the first `separator`, e.g. `dog_003.png` → `dog`.
    FileStemPrefix { separator: String },
}

impl LabelStrategy {
    pub fn label_for(&self, path: &Path) -> Result<String, DecodeError> {
        let missing = |reason: &str| DecodeError::Label {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        match self {
            LabelStrategy::ParentDirectory => path
                .parent()
                .and_then(Path::file_name)
                .and_then(|name| name.to_str())
                .map(str::to_string)
                .ok_or_else(|| missing("no parent folder name")),
            LabelStrategy::FileStemPrefix { separator } => {
                let stem = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .ok_or_else(|| missing("file stem is not valid utf-8"))?;
                match stem.split_once(separator.as_str()) {
                    Some((prefix, _)) if !prefix.is_empty() => Ok(prefix.to_string()),
                    Some(_) => Err(missing("empty prefix before separator")),
                    None => Err(missing(&format!("stem has no `{separator}`"))),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_wav(path: &Path, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for sample in samples {
            writer.write_sample(*sample).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn wav_is_downmixed_and_padded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 2, &[16_384, 0, -16_384, -16_384]);
        let features = WavDecoder { frames: 4 }.decode(&path).unwrap();
        assert_eq!(features, vec![0.25, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn wav_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("long.wav");
        write_wav(&path, 1, &[0; 100]);
        assert_eq!(WavDecoder { frames: 10 }.decode(&path).unwrap().len(), 10);
    }

    #[test]
    fn png_is_scaled_to_unit_range() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("white.png");
        image::GrayImage::from_pixel(8, 8, image::Luma([255u8]))
            .save(&path)
            .unwrap();
        let features = PngDecoder {
            width: 4,
            height: 2,
        }
        .decode(&path)
        .unwrap();
        assert_eq!(features.len(), 8);
        assert!(features.iter().all(|value| (*value - 1.0).abs() < 1e-6));
    }

    #[test]
    fn broken_files_are_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fake.wav");
        std::fs::write(&path, b"not a wav").unwrap();
        assert!(matches!(
            WavDecoder { frames: 4 }.decode(&path),
            Err(DecodeError::Wav { .. })
        ));
    }

    #[test]
    fn labels_from_parent_or_prefix() {
        let path = Path::new("/data/clips/broken_part/take_01.wav");
        assert_eq!(
            LabelStrategy::ParentDirectory.label_for(path).unwrap(),
            "broken_part"
        );
        let prefix = LabelStrategy::FileStemPrefix {
            separator: "_".to_string(),
        };
        assert_eq!(prefix.label_for(path).unwrap(), "take");
        assert!(prefix.label_for(Path::new("/data/plain.wav")).is_err());
        assert!(prefix.label_for(Path::new("/data/_01.wav")).is_err());
    }
}
