//! Burn model for binary lesion segmentation.
//!
//! This crate defines the Improved U-Net: a five-level encoder-decoder with
//! residual context blocks in the encoder, localization blocks in the decoder,
//! and deep supervision. Two auxiliary segmentation heads taken from the
//! decoder are upsampled, summed, and added to the full-resolution head.
//!
//! The model returns raw logits. Losses and thresholds live in the `training`
//! crate; this crate is a pure Burn `Module` with no knowledge of datasets.

pub mod blocks;

use blocks::{conv, ContextBlock, DownsampleConv, LocalizationBlock, UpsamplingBlock};
use burn::module::Module;
use burn::nn::conv::Conv2d;
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of stride-2 stages; input height and width must be divisible by `2^DEPTH`.
pub const DOWNSAMPLE_STAGES: u32 = 4;

#[derive(Debug, Error, PartialEq)]
pub enum UnetError {
    #[error("input {height}x{width} is not divisible by {factor}")]
    InvalidInputDims {
        height: usize,
        width: usize,
        factor: usize,
    },
    #[error("expected {expected} input channels, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("binary segmentation expects num_classes = 1, got {classes}")]
    UnsupportedClasses { classes: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImprovedUnetConfig {
    pub in_channels: usize,
    pub num_classes: usize,
    /// Filters at the first level; doubled at every level below.
    pub base_filters: usize,
    pub dropout: f64,
    pub leaky_slope: f64,
}

impl Default for ImprovedUnetConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            num_classes: 1,
            base_filters: 16,
            dropout: 0.3,
            leaky_slope: 0.01,
        }
    }
}

impl ImprovedUnetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ImprovedUnet<B> {
        ImprovedUnet::new(self.clone(), device)
    }

    /// The head emits one logit map per pixel; only `num_classes = 1` is supported.
    pub fn validate(&self) -> Result<(), UnetError> {
        if self.num_classes != 1 {
            return Err(UnetError::UnsupportedClasses {
                classes: self.num_classes,
            });
        }
        Ok(())
    }

    /// Input spatial dims must survive four halvings without remainder.
    pub fn validate_input_dims(&self, height: usize, width: usize) -> Result<(), UnetError> {
        let factor = 2usize.pow(DOWNSAMPLE_STAGES);
        if height == 0 || width == 0 || height % factor != 0 || width % factor != 0 {
            return Err(UnetError::InvalidInputDims {
                height,
                width,
                factor,
            });
        }
        Ok(())
    }

    pub fn validate_input_shape(&self, dims: [usize; 4]) -> Result<(), UnetError> {
        self.validate()?;
        let [_, channels, height, width] = dims;
        if channels != self.in_channels {
            return Err(UnetError::ChannelMismatch {
                expected: self.in_channels,
                actual: channels,
            });
        }
        self.validate_input_dims(height, width)
    }
}

/// Raw outputs of the three segmentation heads, before deep-supervision summation.
#[derive(Debug, Clone)]
pub struct SegmentationHeads<B: Backend> {
    /// `[batch, num_classes, H, W]` from the last decoder level.
    pub full: Tensor<B, 4>,
    /// `[batch, base_filters, H/2, W/2]` from the second decoder level.
    pub half: Tensor<B, 4>,
    /// `[batch, 2 * base_filters, H/4, W/4]` from the third decoder level.
    pub quarter: Tensor<B, 4>,
}

#[derive(Debug, Module)]
pub struct ImprovedUnet<B: Backend> {
    stem: Conv2d<B>,
    context1: ContextBlock<B>,
    down2: DownsampleConv<B>,
    context2: ContextBlock<B>,
    down3: DownsampleConv<B>,
    context3: ContextBlock<B>,
    down4: DownsampleConv<B>,
    context4: ContextBlock<B>,
    down5: DownsampleConv<B>,
    context5: ContextBlock<B>,
    up5: UpsamplingBlock<B>,
    local4: LocalizationBlock<B>,
    up4: UpsamplingBlock<B>,
    local3: LocalizationBlock<B>,
    up3: UpsamplingBlock<B>,
    local2: LocalizationBlock<B>,
    up2: UpsamplingBlock<B>,
    final_conv: Conv2d<B>,
    seg3: Conv2d<B>,
    seg2: Conv2d<B>,
    seg1: Conv2d<B>,
    seg3_up: UpsamplingBlock<B>,
    seg2_up: UpsamplingBlock<B>,
}

impl<B: Backend> ImprovedUnet<B> {
    pub fn new(cfg: ImprovedUnetConfig, device: &B::Device) -> Self {
        let f = cfg.base_filters.max(1);
        let classes = cfg.num_classes.max(1);
        let p = cfg.dropout;
        let slope = cfg.leaky_slope;
        Self {
            stem: conv(cfg.in_channels, f, 3, 1, 1, device),
            context1: ContextBlock::new(f, p, slope, device),
            down2: DownsampleConv::new(f, 2 * f, device),
            context2: ContextBlock::new(2 * f, p, slope, device),
            down3: DownsampleConv::new(2 * f, 4 * f, device),
            context3: ContextBlock::new(4 * f, p, slope, device),
            down4: DownsampleConv::new(4 * f, 8 * f, device),
            context4: ContextBlock::new(8 * f, p, slope, device),
            down5: DownsampleConv::new(8 * f, 16 * f, device),
            context5: ContextBlock::new(16 * f, p, slope, device),
            up5: UpsamplingBlock::new(16 * f, 8 * f, device),
            local4: LocalizationBlock::new(16 * f, 8 * f, slope, device),
            up4: UpsamplingBlock::new(8 * f, 4 * f, device),
            local3: LocalizationBlock::new(8 * f, 4 * f, slope, device),
            up3: UpsamplingBlock::new(4 * f, 2 * f, device),
            local2: LocalizationBlock::new(4 * f, 2 * f, slope, device),
            up2: UpsamplingBlock::new(2 * f, f, device),
            final_conv: conv(2 * f, 2 * f, 3, 1, 1, device),
            seg3: conv(4 * f, 2 * f, 3, 1, 1, device),
            seg2: conv(2 * f, f, 3, 1, 1, device),
            seg1: conv(2 * f, classes, 3, 1, 1, device),
            seg3_up: UpsamplingBlock::with_kernel(2 * f, f, 2, 3, 1, device),
            seg2_up: UpsamplingBlock::with_kernel(f, classes, 2, 1, 0, device),
        }
    }

    /// Forward pass returning logits shaped `[batch, num_classes, height, width]`.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.combine_heads(self.forward_heads(input))
    }

    /// Run encoder and decoder, stopping at the three segmentation heads.
    pub fn forward_heads(&self, input: Tensor<B, 4>) -> SegmentationHeads<B> {
        // Encoder: residual context block at every level.
        let x = self.stem.forward(input);
        let r1 = x.clone() + self.context1.forward(x);

        let x = self.down2.forward(r1.clone());
        let r2 = x.clone() + self.context2.forward(x);

        let x = self.down3.forward(r2.clone());
        let r3 = x.clone() + self.context3.forward(x);

        let x = self.down4.forward(r3.clone());
        let r4 = x.clone() + self.context4.forward(x);

        // Bottleneck.
        let x = self.down5.forward(r4.clone());
        let x = x.clone() + self.context5.forward(x);
        let x = self.up5.forward(x);

        // Decoder.
        let x = self.local4.forward(Tensor::cat(vec![x, r4], 1));
        let x = self.up4.forward(x);

        let s3 = self.local3.forward(Tensor::cat(vec![x, r3], 1));
        let x = self.up3.forward(s3.clone());
        let quarter = self.seg3.forward(s3);

        let s2 = self.local2.forward(Tensor::cat(vec![x, r2], 1));
        let x = self.up2.forward(s2.clone());
        let half = self.seg2.forward(s2);

        let x = self.final_conv.forward(Tensor::cat(vec![x, r1], 1));
        SegmentationHeads {
            full: self.seg1.forward(x),
            half,
            quarter,
        }
    }

    /// Deep supervision: upsample the quarter head onto the half head, upsample
    /// the sum to full resolution, and add it to the full head.
    pub fn combine_heads(&self, heads: SegmentationHeads<B>) -> Tensor<B, 4> {
        let low = self.seg3_up.forward(heads.quarter);
        let mid = self.seg2_up.forward(heads.half + low);
        heads.full + mid
    }

    pub fn predict_probs(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        sigmoid(self.forward(input))
    }

    /// Binary mask (0.0 / 1.0) from probabilities at `threshold`.
    pub fn predict_mask(&self, input: Tensor<B, 4>, threshold: f32) -> Tensor<B, 4> {
        self.predict_probs(input).greater_elem(threshold).float()
    }
}

pub mod prelude {
    pub use super::blocks::{
        ContextBlock, DownsampleConv, LocalizationBlock, SpatialDropout, UpsamplingBlock,
    };
    pub use super::{
        ImprovedUnet, ImprovedUnetConfig, SegmentationHeads, UnetError, DOWNSAMPLE_STAGES,
    };
}
