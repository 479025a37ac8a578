#![recursion_limit = "256"]

pub mod config;
pub mod loss;
pub mod metrics;
pub mod schedule;
pub mod util;

pub use config::TrainConfig;
pub use loss::{bce_with_logits, segmentation_loss, DiceLoss, LossKind};
pub use metrics::{
    dice_coefficient, jaccard_index, pixel_accuracy, MetricSummary, SegmentationMetrics,
};
pub use models::{ImprovedUnet, ImprovedUnetConfig};
pub use schedule::CosineAnnealing;
pub use util::{run_train, train_with_config, TrainArgs, TrainingReport};
/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
