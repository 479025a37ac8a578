use burn::tensor::{Tensor, TensorData};
use clap::Parser;
use image::GrayImage;
use lesion_dataset::TransformPipelineBuilder;
use std::path::{Path, PathBuf};
use training::util::{
    init_tracing, load_unet_from_checkpoint, mask_to_image, validate_backend_choice, BackendKind,
    TrainingReport,
};
use training::TrainBackend;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Segment a single dermoscopic image and write the binary lesion mask as PNG"
)]
struct Args {
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    backend: BackendKind,
    /// Input image path (any format supported by the `image` crate).
    #[arg(long)]
    image: PathBuf,
    /// Checkpoint written by `train`.
    #[arg(long)]
    checkpoint: PathBuf,
    /// Output path (defaults to <stem>_mask.png alongside the input).
    #[arg(long)]
    out: Option<PathBuf>,
    /// Probability cut-off for a lesion pixel.
    #[arg(long, default_value_t = 0.5)]
    threshold: f32,
}

fn default_out_path(input: &Path) -> PathBuf {
    let parent = input.parent().unwrap_or_else(|| Path::new("."));
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    parent.join(format!("{stem}_mask.png"))
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    validate_backend_choice(args.backend)?;
    let in_path = &args.image;
    if !in_path.exists() {
        anyhow::bail!("input image not found: {}", in_path.display());
    }
    let out_path = args.out.clone().unwrap_or_else(|| default_out_path(in_path));

    let report = TrainingReport::load(&args.checkpoint)?;
    report.model.validate()?;
    let device = <TrainBackend as burn::tensor::backend::Backend>::Device::default();
    let model = load_unet_from_checkpoint(&args.checkpoint, &report.model, &device)
        .map_err(|e| anyhow::anyhow!("failed to load checkpoint: {e}"))?;

    let img = image::open(in_path)?.to_rgb8();
    let (w, h) = img.dimensions();
    let side = report.image_size;
    let pipeline = TransformPipelineBuilder::identity()
        .target_size(Some((side, side)))
        .normalization(report.normalization)
        .build();
    let sample = pipeline.apply(img, GrayImage::new(w, h), "predict")?;

    let input = Tensor::<TrainBackend, 4>::from_data(
        TensorData::new(sample.image_chw, [1, 3, side as usize, side as usize]),
        &device,
    );
    let mask = model.predict_mask(input, args.threshold);
    let values = mask
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("failed to read mask tensor: {e:?}"))?;
    let full = mask_to_image(&values, side, (w, h));
    full.save(&out_path)?;

    let lesion_pixels = full.pixels().filter(|p| p[0] > 0).count();
    println!(
        "saved mask to {} ({:.1}% lesion)",
        out_path.display(),
        100.0 * lesion_pixels as f32 / (w * h).max(1) as f32
    );
    Ok(())
}
