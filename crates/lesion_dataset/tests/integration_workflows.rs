//! End-to-end checks over a synthetic ISIC-style directory layout.

use burn_ndarray::NdArray;
use image::{GrayImage, Luma, Rgb, RgbImage};
use lesion_dataset::{
    build_train_val_iters, build_train_val_iters_with_summary, index_pairs,
    index_pairs_with_summary, DatasetConfig, LesionDatasetError,
};
use std::fs;
use std::path::{Path, PathBuf};

type B = NdArray<f32>;

/// Write `count` images with a centred square lesion and matching masks.
fn create_isic_layout(root: &Path, count: usize, size: u32) -> anyhow::Result<(PathBuf, PathBuf)> {
    let images = root.join("ISIC_data/train");
    let truth = root.join("ISIC_data/ground_truth");
    fs::create_dir_all(&images)?;
    fs::create_dir_all(&truth)?;

    let (lo, hi) = (size / 4, 3 * size / 4);
    for i in 0..count {
        let id = format!("ISIC_{:07}", i);
        let img = RgbImage::from_fn(size, size, |x, y| {
            if (lo..hi).contains(&x) && (lo..hi).contains(&y) {
                Rgb([90, 40, 30])
            } else {
                Rgb([220, 180, 160])
            }
        });
        img.save(images.join(format!("{id}.jpg")))?;
        let mask = GrayImage::from_fn(size, size, |x, y| {
            if (lo..hi).contains(&x) && (lo..hi).contains(&y) {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        mask.save(truth.join(format!("{id}_segmentation.png")))?;
    }
    // ISIC ships superpixel maps next to the inputs; they must be ignored.
    RgbImage::new(size, size).save(images.join("ISIC_0000000_superpixels.png"))?;
    Ok((images, truth))
}

#[test]
fn workflow_index_split_and_batch() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (images, truth) = create_isic_layout(tmp.path(), 6, 40)?;

    let (pairs, summary) = index_pairs_with_summary(&images, &truth, false)?;
    assert_eq!(pairs.len(), 6);
    assert_eq!(summary.skipped_auxiliary, 1);
    assert_eq!(summary.missing_mask, 0);

    let cfg = DatasetConfig {
        target_size: Some((32, 32)),
        seed: Some(5),
        ..Default::default()
    };
    let (mut train, mut val) = build_train_val_iters(&images, &truth, 0.34, cfg, None)?;
    assert_eq!(train.len() + val.len(), 6);
    assert_eq!(val.len(), 2);

    let device = Default::default();
    let mut seen = 0;
    while let Some(batch) = train.next_batch::<B>(3, &device)? {
        assert_eq!(batch.images.dims()[1..], [3, 32, 32]);
        assert_eq!(batch.masks.dims()[1..], [1, 32, 32]);
        seen += batch.len();
    }
    assert_eq!(seen, 4);

    // Validation is unaugmented: the lesion square keeps its area (a quarter of the frame).
    let batch = val.next_batch::<B>(2, &device)?.expect("validation batch");
    let values = batch.masks.into_data().to_vec::<f32>().unwrap_or_default();
    let per_sample = 32 * 32;
    for chunk in values.chunks(per_sample) {
        let ratio = chunk.iter().sum::<f32>() / per_sample as f32;
        assert!((ratio - 0.25).abs() < 0.05, "ratio {ratio}");
    }
    Ok(())
}

#[test]
fn missing_mask_is_an_error_unless_permissive() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (images, truth) = create_isic_layout(tmp.path(), 3, 16)?;
    fs::remove_file(truth.join("ISIC_0000001_segmentation.png"))?;

    match index_pairs(&images, &truth, false) {
        Err(LesionDatasetError::MissingMask { image, .. }) => {
            assert!(image.ends_with("ISIC_0000001.jpg"));
        }
        other => panic!("expected missing mask error, got {other:?}"),
    }

    let (pairs, summary) = index_pairs_with_summary(&images, &truth, true)?;
    assert_eq!(pairs.len(), 2);
    assert_eq!(summary.missing_mask, 1);
    Ok(())
}

#[test]
fn split_reports_pairs_dropped_for_missing_masks() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (images, truth) = create_isic_layout(tmp.path(), 4, 16)?;
    fs::remove_file(truth.join("ISIC_0000002_segmentation.png"))?;
    let cfg = DatasetConfig {
        target_size: Some((16, 16)),
        seed: Some(1),
        ..Default::default()
    };

    let (train, val, summary) =
        build_train_val_iters_with_summary(&images, &truth, 0.25, cfg.clone(), None, true)?;
    assert_eq!(summary.missing_mask, 1);
    assert_eq!(summary.paired, 3);
    assert_eq!(train.len() + val.len(), 3);

    let strict = build_train_val_iters_with_summary(&images, &truth, 0.25, cfg, None, false);
    assert!(matches!(strict, Err(LesionDatasetError::MissingMask { .. })));
    Ok(())
}

#[test]
fn plain_stem_masks_are_accepted() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let images = tmp.path().join("img");
    let truth = tmp.path().join("gt");
    fs::create_dir_all(&images)?;
    fs::create_dir_all(&truth)?;
    RgbImage::new(8, 8).save(images.join("lesion_a.png"))?;
    GrayImage::new(8, 8).save(truth.join("lesion_a.png"))?;

    let pairs = index_pairs(&images, &truth, false)?;
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].id, "lesion_a");
    assert_eq!(pairs[0].mask_path, truth.join("lesion_a.png"));
    Ok(())
}

#[test]
fn empty_directory_is_reported() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let images = tmp.path().join("img");
    let truth = tmp.path().join("gt");
    fs::create_dir_all(&images)?;
    fs::create_dir_all(&truth)?;
    let result = build_train_val_iters(&images, &truth, 0.2, DatasetConfig::default(), None);
    assert!(matches!(result, Err(LesionDatasetError::Empty(_))));
    Ok(())
}
