//! Pairing dermoscopic images with their ground-truth masks on disk.

use crate::aug::TransformPipeline;
use crate::types::{DatasetResult, IndexSummary, LesionDatasetError, LesionSample, SampleIndex};
use std::fs;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
/// Files shipped alongside ISIC training images that are not inputs.
const AUXILIARY_SUFFIXES: &[&str] = &["_superpixels"];

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Candidate mask paths for an image stem, in lookup order.
pub fn mask_candidates(truth_dir: &Path, stem: &str) -> [PathBuf; 2] {
    [
        truth_dir.join(format!("{stem}_segmentation.png")),
        truth_dir.join(format!("{stem}.png")),
    ]
}

/// Index `image_dir` against `truth_dir`.
///
/// Each image is paired with `<stem>_segmentation.png` or `<stem>.png`. Images
/// without a mask fail the whole index unless `permissive` is set, in which
/// case they are skipped and counted. Results are sorted by id.
pub fn index_pairs_with_summary(
    image_dir: &Path,
    truth_dir: &Path,
    permissive: bool,
) -> DatasetResult<(Vec<SampleIndex>, IndexSummary)> {
    let entries = fs::read_dir(image_dir).map_err(|e| LesionDatasetError::Io {
        path: image_dir.to_path_buf(),
        source: e,
    })?;

    let mut summary = IndexSummary::default();
    let mut pairs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| LesionDatasetError::Io {
            path: image_dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if !path.is_file() || !is_image_file(&path) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if AUXILIARY_SUFFIXES.iter().any(|suffix| stem.ends_with(suffix)) {
            summary.skipped_auxiliary += 1;
            continue;
        }
        summary.images_seen += 1;

        match mask_candidates(truth_dir, stem).into_iter().find(|p| p.is_file()) {
            Some(mask_path) => {
                pairs.push(SampleIndex {
                    id: stem.to_string(),
                    image_path: path.clone(),
                    mask_path,
                });
                summary.paired += 1;
            }
            None if permissive => {
                tracing::warn!(image = %path.display(), "no ground-truth mask; skipping");
                summary.missing_mask += 1;
            }
            None => {
                return Err(LesionDatasetError::MissingMask {
                    image: path,
                    truth_dir: truth_dir.to_path_buf(),
                });
            }
        }
    }

    pairs.sort_by(|a, b| a.id.cmp(&b.id));
    tracing::debug!(
        image_dir = %image_dir.display(),
        paired = summary.paired,
        missing = summary.missing_mask,
        "indexed lesion dataset"
    );
    Ok((pairs, summary))
}

pub fn index_pairs(
    image_dir: &Path,
    truth_dir: &Path,
    permissive: bool,
) -> DatasetResult<Vec<SampleIndex>> {
    index_pairs_with_summary(image_dir, truth_dir, permissive).map(|(pairs, _)| pairs)
}

/// Decode one pair and run it through `pipeline` for the given epoch.
pub fn load_sample(
    idx: &SampleIndex,
    pipeline: &TransformPipeline,
    epoch: u64,
) -> DatasetResult<LesionSample> {
    let image = image::open(&idx.image_path)
        .map_err(|e| LesionDatasetError::Image {
            path: idx.image_path.clone(),
            source: e,
        })?
        .to_rgb8();
    let mask = image::open(&idx.mask_path)
        .map_err(|e| LesionDatasetError::Image {
            path: idx.mask_path.clone(),
            source: e,
        })?
        .to_luma8();
    if image.dimensions() != mask.dimensions() {
        return Err(LesionDatasetError::DimensionMismatch {
            id: idx.id.clone(),
            expected: image.dimensions(),
            actual: mask.dimensions(),
        });
    }
    pipeline.apply_epoch(image, mask, &idx.id, epoch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_extensions_are_case_insensitive() {
        assert!(is_image_file(Path::new("a/ISIC_0000000.JPG")));
        assert!(is_image_file(Path::new("a/ISIC_0000000.png")));
        assert!(!is_image_file(Path::new("a/ISIC_0000000.txt")));
        assert!(!is_image_file(Path::new("a/README")));
    }

    #[test]
    fn segmentation_suffix_is_preferred() {
        let [first, second] = mask_candidates(Path::new("truth"), "ISIC_1");
        assert_eq!(first, Path::new("truth/ISIC_1_segmentation.png"));
        assert_eq!(second, Path::new("truth/ISIC_1.png"));
    }
}
