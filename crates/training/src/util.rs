use burn::backend::Autodiff;
use burn::module::{AutodiffModule, Module};
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer, SgdConfig};
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::backend::Backend;
use burn::tensor::ElementConversion;
use lesion_dataset::{build_train_val_iters_with_summary, permissive_from_env, BatchIter};
use models::{ImprovedUnet, ImprovedUnetConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::TrainConfig;
use crate::loss::{segmentation_loss, LossKind};
use crate::metrics::{MetricSummary, SegmentationMetrics};
use crate::schedule::CosineAnnealing;
use crate::TrainBackend;
use clap::{Parser, ValueEnum};
use image::imageops::FilterType;
use image::{GrayImage, Luma};

type ADBackend = Autodiff<TrainBackend>;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizerKind {
    Sgd,
    Adam,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Train the Improved U-Net on ISIC image/mask pairs"
)]
pub struct TrainArgs {
    /// TOML config file (defaults to $LESION_TRAIN_CONFIG or ./lesion-train.toml when present).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Directory of dermoscopic input images.
    #[arg(long)]
    pub image_dir: Option<PathBuf>,
    /// Directory of ground-truth masks.
    #[arg(long)]
    pub truth_dir: Option<PathBuf>,
    /// Square side every pair is resized to (multiple of 16).
    #[arg(long)]
    pub image_size: Option<u32>,
    /// Share of pairs held out for validation.
    #[arg(long)]
    pub val_ratio: Option<f32>,
    /// Seed for splitting, shuffling, and augmentation.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Number of epochs.
    #[arg(long)]
    pub epochs: Option<usize>,
    /// Batch size.
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Initial learning rate.
    #[arg(long)]
    pub lr: Option<f64>,
    #[arg(long, value_enum)]
    pub optimizer: Option<OptimizerKind>,
    #[arg(long, value_enum)]
    pub loss: Option<LossKind>,
    /// Filters at the first U-Net level.
    #[arg(long)]
    pub base_filters: Option<usize>,
    /// Checkpoint output path.
    #[arg(long)]
    pub checkpoint_out: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub lr: f64,
    pub train_loss: f32,
    pub val: Option<MetricSummary>,
}

/// Written next to the checkpoint so eval/predict can rebuild the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub model: ImprovedUnetConfig,
    pub image_size: u32,
    pub normalization: lesion_dataset::Normalization,
    pub loss: LossKind,
    pub epochs: Vec<EpochReport>,
}

impl TrainingReport {
    pub fn path_for(checkpoint: &Path) -> PathBuf {
        checkpoint.with_extension("json")
    }

    pub fn load(checkpoint: &Path) -> anyhow::Result<Self> {
        let path = Self::path_for(checkpoint);
        let raw = fs::read(&path)
            .map_err(|e| anyhow::anyhow!("failed to read report {}: {e}", path.display()))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn save(&self, checkpoint: &Path) -> anyhow::Result<()> {
        let path = Self::path_for(checkpoint);
        fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

/// Install a fmt subscriber honouring `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .try_init();
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<TrainingReport> {
    validate_backend_choice(args.backend)?;
    let cfg = TrainConfig::load(args.config.as_deref())?.apply_args(&args);
    train_with_config(&cfg)
}

pub fn train_with_config(cfg: &TrainConfig) -> anyhow::Result<TrainingReport> {
    cfg.validate()?;
    if let Some(parent) = cfg.checkpoint_out.parent() {
        fs::create_dir_all(parent)?;
    }

    let (mut train_iter, mut val_iter, summary) = build_train_val_iters_with_summary(
        &cfg.data.image_dir,
        &cfg.data.truth_dir,
        cfg.data.val_ratio,
        cfg.dataset_config(),
        None,
        permissive_from_env(),
    )
    .map_err(|e| {
        anyhow::anyhow!(
            "failed to index dataset at {}: {e}",
            cfg.data.image_dir.display()
        )
    })?;
    tracing::info!(
        paired = summary.paired,
        missing_mask = summary.missing_mask,
        skipped_auxiliary = summary.skipped_auxiliary,
        "indexed image/mask pairs"
    );
    tracing::info!(
        train = train_iter.len(),
        val = val_iter.len(),
        pipeline = %train_iter.pipeline().describe(),
        "dataset ready"
    );

    let device = <ADBackend as Backend>::Device::default();
    let model: ImprovedUnet<ADBackend> = cfg.model.init(&device);

    let report = match cfg.optim.kind {
        OptimizerKind::Sgd => {
            let optim = SgdConfig::new()
                .with_momentum(Some(
                    MomentumConfig::new()
                        .with_momentum(cfg.optim.momentum)
                        .with_dampening(0.0),
                ))
                .with_weight_decay(Some(WeightDecayConfig::new(cfg.optim.weight_decay)))
                .init::<ADBackend, ImprovedUnet<ADBackend>>();
            train_loop(cfg, model, optim, &mut train_iter, &mut val_iter, &device)?
        }
        OptimizerKind::Adam => {
            let optim = AdamConfig::new()
                .with_weight_decay(Some(WeightDecayConfig::new(cfg.optim.weight_decay)))
                .init::<ADBackend, ImprovedUnet<ADBackend>>();
            train_loop(cfg, model, optim, &mut train_iter, &mut val_iter, &device)?
        }
    };

    tracing::info!(path = %cfg.checkpoint_out.display(), "saved checkpoint");
    Ok(report)
}

fn train_loop<O>(
    cfg: &TrainConfig,
    mut model: ImprovedUnet<ADBackend>,
    mut optim: O,
    train_iter: &mut BatchIter,
    val_iter: &mut BatchIter,
    device: &<ADBackend as Backend>::Device,
) -> anyhow::Result<TrainingReport>
where
    O: Optimizer<ImprovedUnet<ADBackend>, ADBackend>,
{
    let mut schedule =
        CosineAnnealing::new(cfg.optim.lr, cfg.optim.t_max).with_min_lr(cfg.optim.min_lr);
    let batch_size = cfg.batch_size.max(1);
    let mut report = TrainingReport {
        model: cfg.model.clone(),
        image_size: cfg.data.image_size,
        normalization: cfg.augment.normalization,
        loss: cfg.loss,
        epochs: Vec::new(),
    };

    for epoch in 0..cfg.epochs {
        let lr = schedule.current();
        let mut losses = Vec::new();
        train_iter.reset();
        while let Some(batch) = train_iter.next_batch::<ADBackend>(batch_size, device)? {
            let logits = model.forward(batch.images);
            let loss = segmentation_loss(cfg.loss, logits, batch.masks);
            let loss_detached = loss.clone().detach();
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(lr, model, grads);

            let loss_val: f32 = loss_detached.into_scalar().elem();
            tracing::debug!(epoch, loss = loss_val, "step");
            losses.push(loss_val);
        }
        let avg_loss: f32 = if losses.is_empty() {
            0.0
        } else {
            losses.iter().sum::<f32>() / losses.len() as f32
        };

        let val = if val_iter.is_empty() {
            None
        } else {
            val_iter.reset();
            let summary = evaluate(&model.valid(), val_iter, batch_size, cfg.threshold)?;
            Some(summary)
        };
        match &val {
            Some(v) => tracing::info!(
                epoch,
                lr,
                loss = avg_loss,
                val_dice = v.dice,
                val_accuracy = v.accuracy,
                "epoch complete"
            ),
            None => tracing::info!(epoch, lr, loss = avg_loss, "epoch complete"),
        }
        report.epochs.push(EpochReport {
            epoch,
            lr,
            train_loss: avg_loss,
            val,
        });
        schedule.step();

        // Checkpoint every epoch so an interrupted run keeps its progress.
        save_checkpoint(&model, &cfg.checkpoint_out)?;
        report.save(&cfg.checkpoint_out)?;
    }

    if cfg.epochs == 0 {
        save_checkpoint(&model, &cfg.checkpoint_out)?;
        report.save(&cfg.checkpoint_out)?;
    }
    Ok(report)
}

/// Mean Dice, Jaccard, and pixel accuracy of `model` over every batch left in `iter`.
pub fn evaluate<B: Backend>(
    model: &ImprovedUnet<B>,
    iter: &mut BatchIter,
    batch_size: usize,
    threshold: f32,
) -> anyhow::Result<MetricSummary> {
    let device = B::Device::default();
    let mut metrics = SegmentationMetrics::default();
    while let Some(batch) = iter.next_batch::<B>(batch_size, &device)? {
        let probs = model.predict_probs(batch.images);
        metrics.update_from_tensors(probs, batch.masks, threshold)?;
    }
    Ok(metrics.summary())
}

pub fn save_checkpoint<B: Backend>(model: &ImprovedUnet<B>, path: &Path) -> anyhow::Result<()> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path, &recorder)
        .map_err(|e| anyhow::anyhow!("failed to save checkpoint: {e}"))
}

pub fn load_unet_from_checkpoint<P: AsRef<Path>>(
    path: P,
    cfg: &ImprovedUnetConfig,
    device: &<TrainBackend as Backend>::Device,
) -> Result<ImprovedUnet<TrainBackend>, RecorderError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    cfg.init::<TrainBackend>(device)
        .load_file(path.as_ref(), &recorder, device)
}

/// Turn a flat `side x side` mask (row-major, 0.0/1.0) into an 8-bit PNG-ready
/// image at `(width, height)`. Values above 0.5 become 255; resizing is nearest.
pub fn mask_to_image(values: &[f32], side: u32, (width, height): (u32, u32)) -> GrayImage {
    let small = GrayImage::from_fn(side, side, |x, y| {
        let v = values.get((y * side + x) as usize).copied().unwrap_or(0.0);
        Luma([if v > 0.5 { 255 } else { 0 }])
    });
    if (width, height) == (side, side) {
        return small;
    }
    image::imageops::resize(&small, width, height, FilterType::Nearest)
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            tracing::warn!("built with backend-wgpu; the WGPU backend is used despite --backend nd-array");
        }
        _ => {}
    }
    Ok(())
}
