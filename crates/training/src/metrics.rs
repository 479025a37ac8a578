//! Overlap metrics for binary masks.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Dice similarity of two binary masks; two empty masks score 1.0.
pub fn dice_coefficient(pred: &[bool], target: &[bool]) -> f32 {
    let (inter, pred_pos, target_pos) = overlap_counts(pred, target);
    let denom = pred_pos + target_pos;
    if denom == 0 {
        1.0
    } else {
        2.0 * inter as f32 / denom as f32
    }
}

/// Intersection over union; two empty masks score 1.0.
pub fn jaccard_index(pred: &[bool], target: &[bool]) -> f32 {
    let (inter, pred_pos, target_pos) = overlap_counts(pred, target);
    let union = pred_pos + target_pos - inter;
    if union == 0 {
        1.0
    } else {
        inter as f32 / union as f32
    }
}

/// Share of matching pixels. Both masks must have the same length.
pub fn pixel_accuracy(pred: &[bool], target: &[bool]) -> f32 {
    debug_assert_eq!(pred.len(), target.len(), "mask length mismatch");
    let compared = pred.len().min(target.len());
    if compared == 0 {
        return 1.0;
    }
    let correct = pred.iter().zip(target).filter(|(p, t)| p == t).count();
    correct as f32 / compared as f32
}

fn overlap_counts(pred: &[bool], target: &[bool]) -> (usize, usize, usize) {
    let mut inter = 0;
    let mut pred_pos = 0;
    let mut target_pos = 0;
    for (p, t) in pred.iter().zip(target) {
        pred_pos += *p as usize;
        target_pos += *t as usize;
        inter += (*p && *t) as usize;
    }
    (inter, pred_pos, target_pos)
}

/// Running per-sample Dice/Jaccard and global pixel accuracy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentationMetrics {
    pub samples: usize,
    pub dice_sum: f64,
    pub jaccard_sum: f64,
    pub correct_pixels: u64,
    pub total_pixels: u64,
}

impl SegmentationMetrics {
    /// `probs` and `targets` are flattened batches of `pixels_per_sample` values each.
    pub fn update(
        &mut self,
        probs: &[f32],
        targets: &[f32],
        pixels_per_sample: usize,
        threshold: f32,
    ) {
        if pixels_per_sample == 0 {
            return;
        }
        for (p_chunk, t_chunk) in probs
            .chunks(pixels_per_sample)
            .zip(targets.chunks(pixels_per_sample))
        {
            let pred: Vec<bool> = p_chunk.iter().map(|v| *v > threshold).collect();
            let target: Vec<bool> = t_chunk.iter().map(|v| *v > 0.5).collect();
            self.samples += 1;
            self.dice_sum += dice_coefficient(&pred, &target) as f64;
            self.jaccard_sum += jaccard_index(&pred, &target) as f64;
            self.correct_pixels += pred.iter().zip(&target).filter(|(p, t)| p == t).count() as u64;
            self.total_pixels += pred.len() as u64;
        }
    }

    pub fn update_from_tensors<B: Backend>(
        &mut self,
        probs: Tensor<B, 4>,
        targets: Tensor<B, 4>,
        threshold: f32,
    ) -> anyhow::Result<()> {
        if probs.dims() != targets.dims() {
            anyhow::bail!(
                "prediction shape {:?} does not match target shape {:?}",
                probs.dims(),
                targets.dims()
            );
        }
        let [_, channels, height, width] = probs.dims();
        let probs = probs
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("failed to read predictions: {e:?}"))?;
        let targets = targets
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("failed to read targets: {e:?}"))?;
        self.update(&probs, &targets, channels * height * width, threshold);
        Ok(())
    }

    pub fn mean_dice(&self) -> f32 {
        if self.samples == 0 {
            0.0
        } else {
            (self.dice_sum / self.samples as f64) as f32
        }
    }

    pub fn mean_jaccard(&self) -> f32 {
        if self.samples == 0 {
            0.0
        } else {
            (self.jaccard_sum / self.samples as f64) as f32
        }
    }

    pub fn accuracy(&self) -> f32 {
        if self.total_pixels == 0 {
            0.0
        } else {
            (self.correct_pixels as f64 / self.total_pixels as f64) as f32
        }
    }

    pub fn summary(&self) -> MetricSummary {
        MetricSummary {
            samples: self.samples,
            dice: self.mean_dice(),
            jaccard: self.mean_jaccard(),
            accuracy: self.accuracy(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricSummary {
    pub samples: usize,
    pub dice: f32,
    pub jaccard: f32,
    pub accuracy: f32,
}
