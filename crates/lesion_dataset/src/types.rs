//! Core types, error definitions, and data structures for lesion_dataset.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, LesionDatasetError>;

#[derive(Debug, Error)]
pub enum LesionDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no ground-truth mask for {image} in {truth_dir}")]
    MissingMask { image: PathBuf, truth_dir: PathBuf },
    #[error("dimension mismatch for {id}: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        id: String,
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("no image/mask pairs found under {0}")]
    Empty(PathBuf),
    #[error("{0}")]
    Other(String),
}

/// One dermoscopic image paired with its binary ground-truth mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleIndex {
    /// File stem of the image, e.g. `ISIC_0000000`.
    pub id: String,
    pub image_path: PathBuf,
    pub mask_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LesionSample {
    pub id: String,
    /// Image in CHW layout after normalization.
    pub image_chw: Vec<f32>,
    /// Mask in HW layout, values in {0, 1}.
    pub mask: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

impl LesionSample {
    /// Fraction of pixels labelled as lesion.
    pub fn foreground_ratio(&self) -> f32 {
        if self.mask.is_empty() {
            return 0.0;
        }
        self.mask.iter().sum::<f32>() / self.mask.len() as f32
    }
}

/// How rotation fills pixels that fall outside the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BorderMode {
    /// Mirror without repeating the edge pixel (`dcb|abcd|cba`).
    #[default]
    Reflect101,
    /// Fill with zeros.
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
    /// Raw pixel value mapped to 1.0 before mean/std are applied.
    pub max_pixel_value: f32,
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            mean: [0.0, 0.0, 0.0],
            std: [1.0, 1.0, 1.0],
            max_pixel_value: 255.0,
        }
    }
}

impl Normalization {
    pub fn apply(&self, channel: usize, raw: u8) -> f32 {
        let std = if self.std[channel].abs() < f32::EPSILON {
            1.0
        } else {
            self.std[channel]
        };
        (raw as f32 / self.max_pixel_value - self.mean[channel]) / std
    }
}

/// Counts reported while indexing a dataset directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexSummary {
    pub images_seen: usize,
    pub paired: usize,
    pub missing_mask: usize,
    pub skipped_auxiliary: usize,
}
