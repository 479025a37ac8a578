//! Building blocks of the Improved U-Net.
//!
//! Every block here is a plain Burn `Module`. The `ImprovedUnet` wires them
//! together in `lib.rs`; nothing in this file knows about the overall topology.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{InstanceNorm, InstanceNormConfig, PaddingConfig2d};
use burn::tensor::activation::leaky_relu;
use burn::tensor::backend::Backend;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};
use burn::tensor::{Distribution, Tensor};

/// Square convolution with symmetric explicit padding.
pub(crate) fn conv<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .init(device)
}

/// Channel-wise dropout: whole feature maps are zeroed.
///
/// Only active on autodiff backends, so inference through a plain backend is
/// deterministic. Survivors are rescaled by `1 / (1 - prob)`.
#[derive(Debug, Module, Clone)]
pub struct SpatialDropout {
    prob: f64,
}

impl SpatialDropout {
    pub fn new(prob: f64) -> Self {
        Self {
            prob: prob.clamp(0.0, 1.0),
        }
    }

    pub fn prob(&self) -> f64 {
        self.prob
    }

    pub fn forward<B: Backend>(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        if !B::ad_enabled() || self.prob <= 0.0 {
            return input;
        }
        if self.prob >= 1.0 {
            return input.zeros_like();
        }
        let [batch, channels, _, _] = input.dims();
        let keep = 1.0 - self.prob;
        let mask = Tensor::<B, 4>::random(
            [batch, channels, 1, 1],
            Distribution::Bernoulli(keep),
            &input.device(),
        );
        input * mask.div_scalar(keep)
    }
}

/// Pre-activation residual body used at every encoder level.
///
/// norm -> leaky relu -> conv3x3 -> spatial dropout -> norm -> leaky relu -> conv3x3.
/// The caller adds the block input back onto the output.
#[derive(Debug, Module)]
pub struct ContextBlock<B: Backend> {
    norm1: InstanceNorm<B>,
    conv1: Conv2d<B>,
    dropout: SpatialDropout,
    norm2: InstanceNorm<B>,
    conv2: Conv2d<B>,
    slope: f64,
}

impl<B: Backend> ContextBlock<B> {
    pub fn new(channels: usize, dropout: f64, slope: f64, device: &B::Device) -> Self {
        Self {
            norm1: InstanceNormConfig::new(channels).init(device),
            conv1: conv(channels, channels, 3, 1, 1, device),
            dropout: SpatialDropout::new(dropout),
            norm2: InstanceNormConfig::new(channels).init(device),
            conv2: conv(channels, channels, 3, 1, 1, device),
            slope,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = leaky_relu(self.norm1.forward(input), self.slope);
        let x = self.conv1.forward(x);
        let x = self.dropout.forward(x);
        let x = leaky_relu(self.norm2.forward(x), self.slope);
        self.conv2.forward(x)
    }
}

/// Stride-2 3x3 convolution that halves resolution between encoder levels.
#[derive(Debug, Module)]
pub struct DownsampleConv<B: Backend> {
    conv: Conv2d<B>,
}

impl<B: Backend> DownsampleConv<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: conv(in_channels, out_channels, 3, 2, 1, device),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv.forward(input)
    }
}

/// Decoder block applied after concatenating a skip connection.
#[derive(Debug, Module)]
pub struct LocalizationBlock<B: Backend> {
    conv3: Conv2d<B>,
    conv1: Conv2d<B>,
    slope: f64,
}

impl<B: Backend> LocalizationBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, slope: f64, device: &B::Device) -> Self {
        Self {
            conv3: conv(in_channels, out_channels, 3, 1, 1, device),
            conv1: conv(out_channels, out_channels, 1, 1, 0, device),
            slope,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = leaky_relu(self.conv3.forward(input), self.slope);
        leaky_relu(self.conv1.forward(x), self.slope)
    }
}

/// Nearest-neighbour upsample followed by a convolution.
#[derive(Debug, Module)]
pub struct UpsamplingBlock<B: Backend> {
    conv: Conv2d<B>,
    scale: usize,
}

impl<B: Backend> UpsamplingBlock<B> {
    /// 3x3 convolution, padding 1, scale 2.
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self::with_kernel(in_channels, out_channels, 2, 3, 1, device)
    }

    pub fn with_kernel(
        in_channels: usize,
        out_channels: usize,
        scale: usize,
        kernel: usize,
        padding: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            conv: conv(in_channels, out_channels, kernel, 1, padding, device),
            scale: scale.max(1),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv.forward(upsample_nearest(input, self.scale))
    }
}

pub(crate) fn upsample_nearest<B: Backend>(input: Tensor<B, 4>, scale: usize) -> Tensor<B, 4> {
    if scale == 1 {
        return input;
    }
    let [_, _, height, width] = input.dims();
    interpolate(
        input,
        [height * scale, width * scale],
        InterpolateOptions::new(InterpolateMode::Nearest),
    )
}
