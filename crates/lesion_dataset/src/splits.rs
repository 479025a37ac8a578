//! Train/validation splitting.

use crate::types::SampleIndex;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Split pairs into (train, val) after a seeded shuffle.
///
/// The validation share is rounded to the nearest sample, but at least one
/// training sample is kept whenever the input is non-empty.
pub fn split_pairs(
    mut indices: Vec<SampleIndex>,
    val_ratio: f32,
    seed: u64,
) -> (Vec<SampleIndex>, Vec<SampleIndex>) {
    let ratio = val_ratio.clamp(0.0, 1.0);
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let total = indices.len();
    let mut val_count = (total as f32 * ratio).round() as usize;
    if total > 0 && val_count >= total {
        val_count = total - 1;
    }
    let val = indices.split_off(total - val_count);
    (indices, val)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fake(n: usize) -> Vec<SampleIndex> {
        (0..n)
            .map(|i| SampleIndex {
                id: format!("ISIC_{i:07}"),
                image_path: PathBuf::from(format!("img/{i}.jpg")),
                mask_path: PathBuf::from(format!("gt/{i}.png")),
            })
            .collect()
    }

    #[test]
    fn split_is_disjoint_and_complete() {
        let (train, val) = split_pairs(fake(10), 0.2, 1);
        assert_eq!(train.len(), 8);
        assert_eq!(val.len(), 2);
        for v in &val {
            assert!(!train.contains(v));
        }
    }

    #[test]
    fn split_is_deterministic_for_seed() {
        let (a, _) = split_pairs(fake(20), 0.25, 99);
        let (b, _) = split_pairs(fake(20), 0.25, 99);
        assert_eq!(a, b);
    }

    #[test]
    fn keeps_one_training_sample() {
        let (train, val) = split_pairs(fake(3), 1.0, 0);
        assert_eq!(train.len(), 1);
        assert_eq!(val.len(), 2);

        let (train, val) = split_pairs(Vec::new(), 0.5, 0);
        assert!(train.is_empty() && val.is_empty());
    }
}
