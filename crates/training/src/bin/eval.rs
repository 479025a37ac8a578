use clap::Parser;
use lesion_dataset::{BatchIter, DatasetConfig};
use std::path::PathBuf;
use training::util::{
    evaluate, init_tracing, load_unet_from_checkpoint, validate_backend_choice, BackendKind,
    TrainingReport,
};
use training::TrainBackend;

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Evaluate an Improved U-Net checkpoint on image/mask pairs (Dice, Jaccard, accuracy)"
)]
struct Args {
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    backend: BackendKind,
    /// Checkpoint written by `train`; its sibling .json report supplies the model config.
    #[arg(long)]
    checkpoint: PathBuf,
    /// Directory of input images.
    #[arg(long, default_value = "ISIC_data/train")]
    image_dir: PathBuf,
    /// Directory of ground-truth masks.
    #[arg(long, default_value = "ISIC_data/ground_truth")]
    truth_dir: PathBuf,
    #[arg(long, default_value_t = 8)]
    batch_size: usize,
    /// Probability cut-off for a lesion pixel.
    #[arg(long, default_value_t = 0.5)]
    threshold: f32,
    /// Optional path to write the metric summary as JSON.
    #[arg(long)]
    json_out: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    validate_backend_choice(args.backend)?;

    let report = TrainingReport::load(&args.checkpoint)?;
    report.model.validate()?;
    let device = <TrainBackend as burn::tensor::backend::Backend>::Device::default();
    let model = load_unet_from_checkpoint(&args.checkpoint, &report.model, &device).map_err(|e| {
        anyhow::anyhow!(
            "failed to load checkpoint {}: {e}",
            args.checkpoint.display()
        )
    })?;

    let cfg = DatasetConfig {
        target_size: Some((report.image_size, report.image_size)),
        normalization: report.normalization,
        ..DatasetConfig::default().for_evaluation()
    };
    let mut iter = BatchIter::from_dirs(&args.image_dir, &args.truth_dir, cfg)?;
    if iter.is_empty() {
        println!("No image/mask pairs found under {}", args.image_dir.display());
        return Ok(());
    }
    tracing::info!(pairs = iter.len(), "evaluating");

    let summary = evaluate(&model, &mut iter, args.batch_size.max(1), args.threshold)?;
    println!(
        "Eval over {} samples: dice {:.4}, jaccard {:.4}, accuracy {:.4}",
        summary.samples, summary.dice, summary.jaccard, summary.accuracy
    );
    if let Some(path) = args.json_out {
        std::fs::write(&path, serde_json::to_vec_pretty(&summary)?)?;
        println!("Wrote metrics to {}", path.display());
    }
    Ok(())
}
