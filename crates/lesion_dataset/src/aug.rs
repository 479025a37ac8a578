//! Joint image/mask augmentation and normalization pipeline.
//!
//! Geometric ops (resize, rotate, flips) are applied identically to the image
//! and its mask. The image is resampled bilinearly; the mask always uses
//! nearest-neighbour so it stays binary.

use crate::types::{BorderMode, DatasetResult, LesionSample, Normalization};
use image::imageops::FilterType;
use image::{GrayImage, Luma, Rgb, RgbImage};
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
pub struct DatasetConfig {
    /// Resize every pair to this (width, height). If None, pairs must already share shape.
    pub target_size: Option<(u32, u32)>,
    /// Probability of applying a random rotation.
    pub rotate_prob: f32,
    /// Rotation angle is drawn uniformly from [-limit, limit] degrees.
    pub rotate_limit_deg: f32,
    pub border_mode: BorderMode,
    pub flip_horizontal_prob: f32,
    pub flip_vertical_prob: f32,
    pub normalization: Normalization,
    /// Mask pixels strictly above this value are foreground.
    pub mask_threshold: u8,
    /// Shuffle samples before iteration.
    pub shuffle: bool,
    /// Seed for reproducible shuffling and augmentation.
    pub seed: Option<u64>,
    /// Drop the last partial batch.
    pub drop_last: bool,
    /// Optional transform pipeline override; if None, built from other fields.
    pub transform: Option<TransformPipeline>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            target_size: Some((256, 256)),
            rotate_prob: 1.0,
            rotate_limit_deg: 35.0,
            border_mode: BorderMode::Reflect101,
            flip_horizontal_prob: 0.5,
            flip_vertical_prob: 0.1,
            normalization: Normalization::default(),
            mask_threshold: 127,
            shuffle: true,
            seed: None,
            drop_last: false,
            transform: None,
        }
    }
}

impl DatasetConfig {
    /// Same geometry and normalization, no random augmentation, no shuffling.
    pub fn for_evaluation(&self) -> Self {
        Self {
            rotate_prob: 0.0,
            flip_horizontal_prob: 0.0,
            flip_vertical_prob: 0.0,
            shuffle: false,
            drop_last: false,
            transform: None,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipeline {
    pub target_size: Option<(u32, u32)>,
    pub rotate_prob: f32,
    pub rotate_limit_deg: f32,
    pub border_mode: BorderMode,
    pub flip_horizontal_prob: f32,
    pub flip_vertical_prob: f32,
    pub normalization: Normalization,
    pub mask_threshold: u8,
    pub seed: Option<u64>,
}

impl TransformPipeline {
    pub fn from_config(cfg: &DatasetConfig) -> Self {
        Self {
            target_size: cfg.target_size,
            rotate_prob: cfg.rotate_prob,
            rotate_limit_deg: cfg.rotate_limit_deg,
            border_mode: cfg.border_mode,
            flip_horizontal_prob: cfg.flip_horizontal_prob,
            flip_vertical_prob: cfg.flip_vertical_prob,
            normalization: cfg.normalization,
            mask_threshold: cfg.mask_threshold,
            seed: cfg.seed,
        }
    }

    pub fn describe(&self) -> String {
        let ts = self
            .target_size
            .map(|(w, h)| format!("{}x{}", w, h))
            .unwrap_or_else(|| "none".to_string());
        format!(
            "target_size={} rotate_p={:.2} limit={:.1}deg border={:?} hflip_p={:.2} vflip_p={:.2} mean={:?} std={:?} mask_thresh={} seed={}",
            ts,
            self.rotate_prob,
            self.rotate_limit_deg,
            self.border_mode,
            self.flip_horizontal_prob,
            self.flip_vertical_prob,
            self.normalization.mean,
            self.normalization.std,
            self.mask_threshold,
            self.seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string())
        )
    }

    pub fn apply(&self, img: RgbImage, mask: GrayImage, id: &str) -> DatasetResult<LesionSample> {
        self.apply_epoch(img, mask, id, 0)
    }

    /// Like [`apply`](Self::apply), with the draw keyed on `(seed, id, epoch)`.
    ///
    /// A seeded pipeline gives the same sample identical transforms within an
    /// epoch and fresh ones in the next.
    pub fn apply_epoch(
        &self,
        img: RgbImage,
        mask: GrayImage,
        id: &str,
        epoch: u64,
    ) -> DatasetResult<LesionSample> {
        let mut rng_local;
        let mut seeded_rng;
        let rng: &mut dyn rand::RngCore = if let Some(seed) = self.seed {
            seeded_rng = rand::rngs::StdRng::seed_from_u64(sample_seed(seed, id, epoch));
            &mut seeded_rng
        } else {
            rng_local = rand::rng();
            &mut rng_local
        };

        let (mut img, mut mask) = match self.target_size {
            Some((w, h)) if img.dimensions() != (w, h) => (
                image::imageops::resize(&img, w, h, FilterType::Triangle),
                image::imageops::resize(&mask, w, h, FilterType::Nearest),
            ),
            _ => (img, mask),
        };

        maybe_rotate(
            &mut img,
            &mut mask,
            self.rotate_prob,
            self.rotate_limit_deg,
            self.border_mode,
            rng,
        );
        maybe_hflip(&mut img, &mut mask, self.flip_horizontal_prob, rng);
        maybe_vflip(&mut img, &mut mask, self.flip_vertical_prob, rng);

        Ok(build_sample(
            &img,
            &mask,
            id,
            &self.normalization,
            self.mask_threshold,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipelineBuilder {
    inner: TransformPipeline,
}

impl Default for TransformPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformPipelineBuilder {
    pub fn new() -> Self {
        Self {
            inner: TransformPipeline::from_config(&DatasetConfig::default()),
        }
    }
    /// Start from a pipeline that only resizes and normalizes.
    pub fn identity() -> Self {
        Self {
            inner: TransformPipeline::from_config(&DatasetConfig::default().for_evaluation()),
        }
    }
    pub fn target_size(mut self, size: Option<(u32, u32)>) -> Self {
        self.inner.target_size = size;
        self
    }
    pub fn rotate(mut self, prob: f32, limit_deg: f32) -> Self {
        self.inner.rotate_prob = prob;
        self.inner.rotate_limit_deg = limit_deg;
        self
    }
    pub fn border_mode(mut self, mode: BorderMode) -> Self {
        self.inner.border_mode = mode;
        self
    }
    pub fn flip_horizontal_prob(mut self, p: f32) -> Self {
        self.inner.flip_horizontal_prob = p;
        self
    }
    pub fn flip_vertical_prob(mut self, p: f32) -> Self {
        self.inner.flip_vertical_prob = p;
        self
    }
    pub fn normalization(mut self, norm: Normalization) -> Self {
        self.inner.normalization = norm;
        self
    }
    pub fn mask_threshold(mut self, threshold: u8) -> Self {
        self.inner.mask_threshold = threshold;
        self
    }
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.inner.seed = seed;
        self
    }
    pub fn build(self) -> TransformPipeline {
        self.inner
    }
}

/// FNV-1a; stable across runs and platforms, unlike `DefaultHasher`.
fn stable_hash(id: &str) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for byte in id.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn sample_seed(seed: u64, id: &str, epoch: u64) -> u64 {
    seed ^ stable_hash(id) ^ epoch.wrapping_mul(0x9e3779b97f4a7c15)
}

fn build_sample(
    img: &RgbImage,
    mask: &GrayImage,
    id: &str,
    norm: &Normalization,
    mask_threshold: u8,
) -> LesionSample {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut image_chw = vec![0.0f32; plane * 3];
    for (x, y, pixel) in img.enumerate_pixels() {
        let base = (y * width + x) as usize;
        for c in 0..3 {
            image_chw[c * plane + base] = norm.apply(c, pixel[c]);
        }
    }
    let mask = mask
        .pixels()
        .map(|p| if p[0] > mask_threshold { 1.0 } else { 0.0 })
        .collect();
    LesionSample {
        id: id.to_string(),
        image_chw,
        mask,
        width,
        height,
    }
}

pub(crate) fn maybe_hflip(
    img: &mut RgbImage,
    mask: &mut GrayImage,
    prob: f32,
    rng: &mut dyn rand::RngCore,
) {
    if prob <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) < prob {
        image::imageops::flip_horizontal_in_place(img);
        image::imageops::flip_horizontal_in_place(mask);
    }
}

pub(crate) fn maybe_vflip(
    img: &mut RgbImage,
    mask: &mut GrayImage,
    prob: f32,
    rng: &mut dyn rand::RngCore,
) {
    if prob <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) < prob {
        image::imageops::flip_vertical_in_place(img);
        image::imageops::flip_vertical_in_place(mask);
    }
}

pub(crate) fn maybe_rotate(
    img: &mut RgbImage,
    mask: &mut GrayImage,
    prob: f32,
    limit_deg: f32,
    border: BorderMode,
    rng: &mut dyn rand::RngCore,
) {
    if prob <= 0.0 || limit_deg <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    let angle = rng.random_range(-limit_deg..=limit_deg);
    let (rotated_img, rotated_mask) = rotate_pair(img, mask, angle, border);
    *img = rotated_img;
    *mask = rotated_mask;
}

/// Rotate counter-clockwise by `angle_deg` about the image centre.
pub fn rotate_pair(
    img: &RgbImage,
    mask: &GrayImage,
    angle_deg: f32,
    border: BorderMode,
) -> (RgbImage, GrayImage) {
    let (w, h) = img.dimensions();
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    let cx = (w as f32 - 1.0) * 0.5;
    let cy = (h as f32 - 1.0) * 0.5;
    let source = |x: u32, y: u32| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        (cos * dx - sin * dy + cx, sin * dx + cos * dy + cy)
    };

    let rotated_img = RgbImage::from_fn(w, h, |x, y| {
        let (sx, sy) = source(x, y);
        sample_bilinear(img, sx, sy, border)
    });
    let rotated_mask = GrayImage::from_fn(w, h, |x, y| {
        let (sx, sy) = source(x, y);
        sample_nearest(mask, sx, sy, border)
    });
    (rotated_img, rotated_mask)
}

fn reflect101(i: i64, n: i64) -> i64 {
    if n <= 1 {
        return 0;
    }
    let period = 2 * (n - 1);
    let m = i.rem_euclid(period);
    if m >= n {
        period - m
    } else {
        m
    }
}

/// Map a possibly out-of-range coordinate to a valid one, or None for a constant fill.
fn resolve(i: i64, n: u32, border: BorderMode) -> Option<u32> {
    let n = n as i64;
    if (0..n).contains(&i) {
        return Some(i as u32);
    }
    match border {
        BorderMode::Reflect101 => Some(reflect101(i, n) as u32),
        BorderMode::Constant => None,
    }
}

fn sample_nearest(mask: &GrayImage, sx: f32, sy: f32, border: BorderMode) -> Luma<u8> {
    let (w, h) = mask.dimensions();
    match (
        resolve(sx.round() as i64, w, border),
        resolve(sy.round() as i64, h, border),
    ) {
        (Some(x), Some(y)) => *mask.get_pixel(x, y),
        _ => Luma([0]),
    }
}

fn sample_bilinear(img: &RgbImage, sx: f32, sy: f32, border: BorderMode) -> Rgb<u8> {
    let (w, h) = img.dimensions();
    let x0 = sx.floor();
    let y0 = sy.floor();
    let fx = sx - x0;
    let fy = sy - y0;
    let taps = [
        (x0 as i64, y0 as i64, (1.0 - fx) * (1.0 - fy)),
        (x0 as i64 + 1, y0 as i64, fx * (1.0 - fy)),
        (x0 as i64, y0 as i64 + 1, (1.0 - fx) * fy),
        (x0 as i64 + 1, y0 as i64 + 1, fx * fy),
    ];
    let mut acc = [0.0f32; 3];
    for (tx, ty, weight) in taps {
        if weight <= 0.0 {
            continue;
        }
        if let (Some(x), Some(y)) = (resolve(tx, w, border), resolve(ty, h, border)) {
            let p = img.get_pixel(x, y);
            for c in 0..3 {
                acc[c] += p[c] as f32 * weight;
            }
        }
    }
    Rgb(acc.map(|v| v.round().clamp(0.0, 255.0) as u8))
}
