//! Batch iteration for training and validation.

use crate::aug::{DatasetConfig, TransformPipeline};
use crate::index::{index_pairs, index_pairs_with_summary, load_sample};
use crate::splits::split_pairs;
use crate::types::{DatasetResult, IndexSummary, LesionDatasetError, LesionSample, SampleIndex};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::path::Path;
use std::time::Instant;

pub(crate) const DEFAULT_LOG_EVERY_SAMPLES: usize = 1000;

/// Index `image_dir`/`truth_dir`, split, and build train and validation iterators.
///
/// The validation iterator defaults to the train config without augmentation or shuffling.
pub fn build_train_val_iters(
    image_dir: &Path,
    truth_dir: &Path,
    val_ratio: f32,
    train_cfg: DatasetConfig,
    val_cfg: Option<DatasetConfig>,
) -> DatasetResult<(BatchIter, BatchIter)> {
    build_train_val_iters_with_summary(
        image_dir,
        truth_dir,
        val_ratio,
        train_cfg,
        val_cfg,
        permissive_from_env(),
    )
    .map(|(train, val, _)| (train, val))
}

/// Like [`build_train_val_iters`], with explicit strictness and the indexing summary.
///
/// With `permissive`, images without a mask are dropped and counted in
/// `IndexSummary::missing_mask`; otherwise the first one is an error.
pub fn build_train_val_iters_with_summary(
    image_dir: &Path,
    truth_dir: &Path,
    val_ratio: f32,
    train_cfg: DatasetConfig,
    val_cfg: Option<DatasetConfig>,
    permissive: bool,
) -> DatasetResult<(BatchIter, BatchIter, IndexSummary)> {
    let (indices, summary) = index_pairs_with_summary(image_dir, truth_dir, permissive)?;
    if indices.is_empty() {
        return Err(LesionDatasetError::Empty(image_dir.to_path_buf()));
    }
    let (train_idx, val_idx) = split_pairs(indices, val_ratio, train_cfg.seed.unwrap_or(0));
    let val_cfg = val_cfg.unwrap_or_else(|| train_cfg.for_evaluation());
    let train_iter = BatchIter::from_indices(train_idx, train_cfg)?.with_permissive(permissive);
    let val_iter = BatchIter::from_indices(val_idx, val_cfg)?.with_permissive(permissive);
    Ok((train_iter, val_iter, summary))
}

/// `LESION_DATASET_PERMISSIVE=0|false|off` turns per-sample failures into errors.
pub fn permissive_from_env() -> bool {
    std::env::var("LESION_DATASET_PERMISSIVE")
        .ok()
        .map(|v| v.trim().to_ascii_lowercase())
        .map(|v| !(v == "0" || v == "false" || v == "off"))
        .unwrap_or(true)
}

pub struct LesionBatch<B: Backend> {
    /// `[batch, 3, height, width]`
    pub images: Tensor<B, 4>,
    /// `[batch, 1, height, width]`, values in {0, 1}.
    pub masks: Tensor<B, 4>,
    pub ids: Vec<String>,
}

impl<B: Backend> LesionBatch<B> {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

pub struct BatchIter {
    indices: Vec<SampleIndex>,
    cursor: usize,
    cfg: DatasetConfig,
    pipeline: TransformPipeline,
    rng: rand::rngs::StdRng,
    permissive_errors: bool,
    processed_samples: usize,
    processed_batches: usize,
    skipped_errors: usize,
    last_logged_samples: usize,
    log_every_samples: Option<usize>,
    started: Instant,
    epoch: u64,
}

impl BatchIter {
    pub fn from_dirs(
        image_dir: &Path,
        truth_dir: &Path,
        cfg: DatasetConfig,
    ) -> DatasetResult<Self> {
        let indices = index_pairs(image_dir, truth_dir, permissive_from_env())?;
        Self::from_indices(indices, cfg)
    }

    pub fn from_indices(indices: Vec<SampleIndex>, cfg: DatasetConfig) -> DatasetResult<Self> {
        let rng = match cfg.seed {
            Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
            None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
        };
        let log_every_samples = match std::env::var("LESION_DATASET_LOG_EVERY") {
            Ok(val) => {
                if val.eq_ignore_ascii_case("off") || val.trim() == "0" {
                    None
                } else {
                    val.parse::<usize>().ok().filter(|v| *v > 0)
                }
            }
            Err(_) => Some(DEFAULT_LOG_EVERY_SAMPLES),
        };
        let pipeline = cfg
            .transform
            .clone()
            .unwrap_or_else(|| TransformPipeline::from_config(&cfg));
        tracing::debug!(
            samples = indices.len(),
            pipeline = %pipeline.describe(),
            "batch iterator ready"
        );
        let mut iter = Self {
            indices,
            cursor: 0,
            cfg,
            pipeline,
            rng,
            permissive_errors: permissive_from_env(),
            processed_samples: 0,
            processed_batches: 0,
            skipped_errors: 0,
            last_logged_samples: 0,
            log_every_samples,
            started: Instant::now(),
            epoch: 0,
        };
        iter.shuffle_if_enabled();
        Ok(iter)
    }

    /// Override the `LESION_DATASET_PERMISSIVE` setting.
    pub fn with_permissive(mut self, permissive: bool) -> Self {
        self.permissive_errors = permissive;
        self
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn indices(&self) -> &[SampleIndex] {
        &self.indices
    }

    pub fn pipeline(&self) -> &TransformPipeline {
        &self.pipeline
    }

    pub fn skipped(&self) -> usize {
        self.skipped_errors
    }

    /// Number of `reset` calls so far; seeded augmentation is redrawn per epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Rewind for the next epoch, reshuffling when enabled.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.epoch += 1;
        self.shuffle_if_enabled();
    }

    fn shuffle_if_enabled(&mut self) {
        if self.cfg.shuffle {
            self.indices.shuffle(&mut self.rng);
        }
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        batch_size: usize,
        device: &B::Device,
    ) -> DatasetResult<Option<LesionBatch<B>>> {
        let batch_size = batch_size.max(1);
        loop {
            if self.cursor >= self.indices.len() {
                return Ok(None);
            }
            let end = (self.cursor + batch_size).min(self.indices.len());
            if self.cfg.drop_last && end - self.cursor < batch_size {
                self.cursor = self.indices.len();
                return Ok(None);
            }
            let slice = &self.indices[self.cursor..end];
            self.cursor = end;

            let pipeline = &self.pipeline;
            let epoch = self.epoch;
            let loaded: Vec<(&SampleIndex, DatasetResult<LesionSample>)> = slice
                .par_iter()
                .map(|idx| (idx, load_sample(idx, pipeline, epoch)))
                .collect();

            let mut samples = Vec::with_capacity(loaded.len());
            for (idx, res) in loaded {
                match res {
                    Ok(sample) => samples.push(sample),
                    Err(e) if self.permissive_errors => {
                        tracing::warn!(id = %idx.id, "skipping sample: {e}");
                        self.skipped_errors += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
            if samples.is_empty() {
                // Every sample in this slice failed; move on to the next one.
                continue;
            }

            let batch = self.assemble::<B>(samples, device)?;
            self.processed_batches += 1;
            self.processed_samples += batch.len();
            self.maybe_log_progress();
            return Ok(Some(batch));
        }
    }

    fn assemble<B: Backend>(
        &self,
        samples: Vec<LesionSample>,
        device: &B::Device,
    ) -> DatasetResult<LesionBatch<B>> {
        let (width, height) = (samples[0].width, samples[0].height);
        let plane = (width * height) as usize;
        let mut images_buf = Vec::with_capacity(samples.len() * plane * 3);
        let mut masks_buf = Vec::with_capacity(samples.len() * plane);
        let mut ids = Vec::with_capacity(samples.len());
        for sample in samples {
            if (sample.width, sample.height) != (width, height) {
                return Err(LesionDatasetError::DimensionMismatch {
                    id: sample.id,
                    expected: (width, height),
                    actual: (sample.width, sample.height),
                });
            }
            images_buf.extend_from_slice(&sample.image_chw);
            masks_buf.extend_from_slice(&sample.mask);
            ids.push(sample.id);
        }

        let n = ids.len();
        let (h, w) = (height as usize, width as usize);
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(images_buf, [n, 3, h, w]),
            device,
        );
        let masks = Tensor::<B, 4>::from_data(
            TensorData::new(masks_buf, [n, 1, h, w]),
            device,
        );
        Ok(LesionBatch { images, masks, ids })
    }

    fn maybe_log_progress(&mut self) {
        let Some(every) = self.log_every_samples else {
            return;
        };
        if self.processed_samples - self.last_logged_samples < every {
            return;
        }
        self.last_logged_samples = self.processed_samples;
        let elapsed = self.started.elapsed().as_secs_f32().max(1e-6);
        tracing::info!(
            samples = self.processed_samples,
            batches = self.processed_batches,
            skipped = self.skipped_errors,
            "{:.1} samples/s",
            self.processed_samples as f32 / elapsed
        );
    }
}
