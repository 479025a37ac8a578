//! Dataset indexing, joint augmentation, and Burn batching for lesion segmentation.
//!
//! This crate provides utilities for:
//! - Pairing dermoscopic images with ground-truth masks (ISIC layout)
//! - Train/val splitting
//! - Joint image/mask augmentation (resize, rotate, flips, normalization)
//! - Burn-compatible batch iteration with parallel decoding

pub mod aug;
pub mod batch;
pub mod index;
pub mod splits;
pub mod types;

pub use aug::{rotate_pair, DatasetConfig, TransformPipeline, TransformPipelineBuilder};
pub use batch::{
    build_train_val_iters, build_train_val_iters_with_summary, permissive_from_env, BatchIter,
    LesionBatch,
};
pub use index::{index_pairs, index_pairs_with_summary, load_sample, mask_candidates};
pub use splits::split_pairs;
pub use types::*;
