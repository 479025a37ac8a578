//! Training configuration: TOML file defaults layered under CLI flags.

use crate::loss::LossKind;
use crate::util::{OptimizerKind, TrainArgs};
use lesion_dataset::{BorderMode, DatasetConfig, Normalization};
use models::ImprovedUnetConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_NAME: &str = "lesion-train.toml";
pub const CONFIG_ENV_VAR: &str = "LESION_TRAIN_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSection {
    pub image_dir: PathBuf,
    pub truth_dir: PathBuf,
    /// Square side length every pair is resized to.
    pub image_size: u32,
    pub val_ratio: f32,
    pub seed: u64,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("ISIC_data/train"),
            truth_dir: PathBuf::from("ISIC_data/ground_truth"),
            image_size: 256,
            val_ratio: 0.1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentSection {
    pub rotate_prob: f32,
    pub rotate_limit_deg: f32,
    pub border_mode: BorderMode,
    pub flip_horizontal_prob: f32,
    pub flip_vertical_prob: f32,
    pub normalization: Normalization,
}

impl Default for AugmentSection {
    fn default() -> Self {
        let d = DatasetConfig::default();
        Self {
            rotate_prob: d.rotate_prob,
            rotate_limit_deg: d.rotate_limit_deg,
            border_mode: d.border_mode,
            flip_horizontal_prob: d.flip_horizontal_prob,
            flip_vertical_prob: d.flip_vertical_prob,
            normalization: d.normalization,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimSection {
    pub kind: OptimizerKind,
    pub lr: f64,
    pub momentum: f64,
    pub weight_decay: f32,
    /// Cosine annealing period, in epochs.
    pub t_max: usize,
    pub min_lr: f64,
}

impl Default for OptimSection {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Sgd,
            lr: 0.01,
            momentum: 0.1,
            weight_decay: 5e-4,
            t_max: 200,
            min_lr: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub data: DataSection,
    pub augment: AugmentSection,
    pub optim: OptimSection,
    pub model: ImprovedUnetConfig,
    pub loss: LossKind,
    pub epochs: usize,
    pub batch_size: usize,
    /// Probability cut-off used when scoring validation masks.
    pub threshold: f32,
    pub checkpoint_out: PathBuf,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data: DataSection::default(),
            augment: AugmentSection::default(),
            optim: OptimSection::default(),
            model: ImprovedUnetConfig::default(),
            loss: LossKind::Dice,
            epochs: 3,
            batch_size: 16,
            threshold: 0.5,
            checkpoint_out: PathBuf::from("checkpoints/improved_unet.bin"),
        }
    }
}

impl TrainConfig {
    /// `explicit`, then `$LESION_TRAIN_CONFIG`, then `./lesion-train.toml`, then defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::from_path(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::from_path(Path::new(&path));
        }
        let default_path = Path::new(DEFAULT_CONFIG_NAME);
        if default_path.exists() {
            return Self::from_path(default_path);
        }
        Ok(Self::default())
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("failed to parse config {}: {e}", path.display()))?;
        tracing::info!(path = %path.display(), "loaded training config");
        Ok(cfg)
    }

    /// Flags given on the command line win over file values.
    pub fn apply_args(mut self, args: &TrainArgs) -> Self {
        if let Some(v) = &args.image_dir {
            self.data.image_dir = v.clone();
        }
        if let Some(v) = &args.truth_dir {
            self.data.truth_dir = v.clone();
        }
        if let Some(v) = args.image_size {
            self.data.image_size = v;
        }
        if let Some(v) = args.val_ratio {
            self.data.val_ratio = v;
        }
        if let Some(v) = args.seed {
            self.data.seed = v;
        }
        if let Some(v) = args.epochs {
            self.epochs = v;
        }
        if let Some(v) = args.batch_size {
            self.batch_size = v;
        }
        if let Some(v) = args.lr {
            self.optim.lr = v;
        }
        if let Some(v) = args.optimizer {
            self.optim.kind = v;
        }
        if let Some(v) = args.loss {
            self.loss = v;
        }
        if let Some(v) = args.base_filters {
            self.model.base_filters = v;
        }
        if let Some(v) = &args.checkpoint_out {
            self.checkpoint_out = v.clone();
        }
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let side = self.data.image_size as usize;
        self.model.validate_input_dims(side, side)?;
        self.model.validate()?;
        if !(0.0..1.0).contains(&self.data.val_ratio) {
            anyhow::bail!("val_ratio must be in [0, 1), got {}", self.data.val_ratio);
        }
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }
        Ok(())
    }

    pub fn dataset_config(&self) -> DatasetConfig {
        DatasetConfig {
            target_size: Some((self.data.image_size, self.data.image_size)),
            rotate_prob: self.augment.rotate_prob,
            rotate_limit_deg: self.augment.rotate_limit_deg,
            border_mode: self.augment.border_mode,
            flip_horizontal_prob: self.augment.flip_horizontal_prob,
            flip_vertical_prob: self.augment.flip_vertical_prob,
            normalization: self.augment.normalization,
            seed: Some(self.data.seed),
            shuffle: true,
            ..DatasetConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_match_reference_hyperparameters() {
        let cfg = TrainConfig::default();
        assert_eq!(cfg.batch_size, 16);
        assert_eq!(cfg.epochs, 3);
        assert_eq!(cfg.optim.kind, OptimizerKind::Sgd);
        assert!((cfg.optim.lr - 0.01).abs() < 1e-12);
        assert!((cfg.optim.momentum - 0.1).abs() < 1e-12);
        assert_eq!(cfg.optim.t_max, 200);
        assert_eq!(cfg.data.image_size, 256);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let raw = r#"
            epochs = 10
            loss = "bce-dice"

            [data]
            image_size = 128

            [optim]
            kind = "adam"
            lr = 0.001

            [model]
            base_filters = 8
        "#;
        let cfg: TrainConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.epochs, 10);
        assert_eq!(cfg.loss, LossKind::BceDice);
        assert_eq!(cfg.data.image_size, 128);
        assert_eq!(cfg.data.val_ratio, 0.1);
        assert_eq!(cfg.optim.kind, OptimizerKind::Adam);
        assert_eq!(cfg.optim.t_max, 200);
        assert_eq!(cfg.model.base_filters, 8);
        assert_eq!(cfg.augment.rotate_limit_deg, 35.0);
    }

    #[test]
    fn cli_flags_override_file_values() {
        let args = TrainArgs::parse_from([
            "train",
            "--epochs",
            "7",
            "--image-size",
            "64",
            "--loss",
            "bce",
        ]);
        let cfg = TrainConfig::default().apply_args(&args);
        assert_eq!(cfg.epochs, 7);
        assert_eq!(cfg.data.image_size, 64);
        assert_eq!(cfg.loss, LossKind::Bce);
        assert_eq!(cfg.batch_size, 16);
    }

    #[test]
    fn validate_rejects_unaligned_image_size() {
        let mut cfg = TrainConfig::default();
        cfg.data.image_size = 100;
        assert!(cfg.validate().is_err());
        cfg.data.image_size = 96;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_multi_class_model() {
        let mut cfg = TrainConfig::default();
        cfg.model.num_classes = 2;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("num_classes = 1"), "{err}");
    }

    #[test]
    fn load_reads_explicit_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cfg.toml");
        std::fs::write(&path, "batch_size = 4\n").unwrap();
        let cfg = TrainConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.batch_size, 4);
        assert!(TrainConfig::load(Some(&tmp.path().join("missing.toml"))).is_err());
    }
}
