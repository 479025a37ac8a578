//! Segmentation losses computed on raw logits.

use burn::tensor::activation::sigmoid;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LossKind {
    /// Soft Dice loss on sigmoid probabilities.
    #[default]
    Dice,
    /// Binary cross-entropy on logits.
    Bce,
    /// Sum of BCE and Dice.
    BceDice,
}

/// Soft Dice loss: `1 - (2|P.T| + s) / (|P| + |T| + s)`, averaged over the batch.
#[derive(Debug, Clone, Copy)]
pub struct DiceLoss {
    pub smooth: f32,
}

impl Default for DiceLoss {
    fn default() -> Self {
        Self { smooth: 1.0 }
    }
}

impl DiceLoss {
    pub fn new(smooth: f32) -> Self {
        Self { smooth }
    }

    pub fn forward<B: Backend>(&self, logits: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1> {
        self.forward_probs(sigmoid(logits), targets)
    }

    pub fn forward_probs<B: Backend>(
        &self,
        probs: Tensor<B, 4>,
        targets: Tensor<B, 4>,
    ) -> Tensor<B, 1> {
        let probs = probs.flatten::<2>(1, 3);
        let targets = targets.flatten::<2>(1, 3);
        let intersection = (probs.clone() * targets.clone()).sum_dim(1);
        let denom = probs.sum_dim(1) + targets.sum_dim(1);
        let dice = (intersection.mul_scalar(2.0).add_scalar(self.smooth))
            / denom.add_scalar(self.smooth);
        dice.mean().neg().add_scalar(1.0)
    }
}

/// Numerically stable BCE on logits: `max(x, 0) - x*t + log(1 + exp(-|x|))`, mean over pixels.
pub fn bce_with_logits<B: Backend>(logits: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1> {
    let positive = logits.clone().clamp_min(0.0);
    let soft = logits.clone().abs().neg().exp().log1p();
    (positive - logits * targets + soft).mean()
}

pub fn segmentation_loss<B: Backend>(
    kind: LossKind,
    logits: Tensor<B, 4>,
    targets: Tensor<B, 4>,
) -> Tensor<B, 1> {
    match kind {
        LossKind::Dice => DiceLoss::default().forward(logits, targets),
        LossKind::Bce => bce_with_logits(logits, targets),
        LossKind::BceDice => {
            bce_with_logits(logits.clone(), targets.clone())
                + DiceLoss::default().forward(logits, targets)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    fn scalar(t: Tensor<B, 1>) -> f32 {
        t.into_scalar()
    }

    #[test]
    fn dice_loss_is_zero_for_perfect_prediction() {
        let device = Default::default();
        let target = Tensor::<B, 4>::from_floats([[[[1.0, 0.0], [1.0, 0.0]]]], &device);
        let loss = DiceLoss::new(0.0).forward_probs(target.clone(), target);
        assert!(scalar(loss).abs() < 1e-6);
    }

    #[test]
    fn dice_loss_is_one_for_disjoint_prediction() {
        let device = Default::default();
        let pred = Tensor::<B, 4>::from_floats([[[[0.0, 1.0], [0.0, 1.0]]]], &device);
        let target = Tensor::<B, 4>::from_floats([[[[1.0, 0.0], [1.0, 0.0]]]], &device);
        let loss = DiceLoss::new(0.0).forward_probs(pred, target);
        assert!((scalar(loss) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn smoothing_makes_empty_masks_perfect() {
        let device = Default::default();
        let empty = Tensor::<B, 4>::zeros([2, 1, 4, 4], &device);
        let loss = DiceLoss::default().forward_probs(empty.clone(), empty);
        assert!(scalar(loss).abs() < 1e-6);
    }

    #[test]
    fn bce_matches_closed_form() {
        let device = Default::default();
        let logits = Tensor::<B, 4>::from_floats([[[[0.0, 2.0]]]], &device);
        let targets = Tensor::<B, 4>::from_floats([[[[1.0, 0.0]]]], &device);
        let loss = scalar(bce_with_logits(logits, targets));
        // -ln(sigmoid(0)) = ln 2 ; -ln(1 - sigmoid(2)) = 2 + ln(1 + e^-2)
        let expected = (2f32.ln() + 2.0 + (1.0 + (-2f32).exp()).ln()) / 2.0;
        assert!((loss - expected).abs() < 1e-5, "{loss} vs {expected}");
    }

    #[test]
    fn bce_is_stable_for_large_logits() {
        let device = Default::default();
        let logits = Tensor::<B, 4>::from_floats([[[[80.0, -80.0]]]], &device);
        let targets = Tensor::<B, 4>::from_floats([[[[1.0, 0.0]]]], &device);
        let loss = scalar(bce_with_logits(logits, targets));
        assert!(loss.is_finite() && loss < 1e-6);
    }

    #[test]
    fn combined_loss_is_sum() {
        let device = Default::default();
        let logits = Tensor::<B, 4>::from_floats([[[[0.5, -1.0], [2.0, 0.0]]]], &device);
        let targets = Tensor::<B, 4>::from_floats([[[[1.0, 0.0], [1.0, 1.0]]]], &device);
        let bce = scalar(segmentation_loss(LossKind::Bce, logits.clone(), targets.clone()));
        let dice = scalar(segmentation_loss(LossKind::Dice, logits.clone(), targets.clone()));
        let both = scalar(segmentation_loss(LossKind::BceDice, logits, targets));
        assert!((both - (bce + dice)).abs() < 1e-5);
    }
}
