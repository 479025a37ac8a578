use burn::backend::Autodiff;
use burn::module::Module;
use burn::tensor::Tensor;
use burn_ndarray::NdArray;
use models::{ImprovedUnet, ImprovedUnetConfig, SegmentationHeads};

// CPU backend keeps this shape check independent of any GPU feature flags.
type B = NdArray<f32>;
type ADBackend = Autodiff<NdArray<f32>>;

fn small_config() -> ImprovedUnetConfig {
    ImprovedUnetConfig {
        base_filters: 4,
        ..Default::default()
    }
}

#[test]
fn forward_preserves_spatial_dims() {
    let device = <B as burn::tensor::backend::Backend>::Device::default();
    let model: ImprovedUnet<B> = small_config().init(&device);

    let input = Tensor::<B, 4>::zeros([2, 3, 32, 48], &device);
    let logits = model.forward(input);
    assert_eq!(logits.dims(), [2, 1, 32, 48]);
}

#[test]
fn forward_with_default_filters_on_isic_resolution_slice() {
    let device = <B as burn::tensor::backend::Backend>::Device::default();
    let model: ImprovedUnet<B> = ImprovedUnetConfig::default().init(&device);

    let input = Tensor::<B, 4>::ones([1, 3, 16, 16], &device);
    let logits = model.forward(input);
    assert_eq!(logits.dims(), [1, 1, 16, 16]);
}

#[test]
fn predict_mask_is_binary_and_probs_bounded() {
    let device = <B as burn::tensor::backend::Backend>::Device::default();
    let model: ImprovedUnet<B> = small_config().init(&device);
    let input = Tensor::<B, 4>::random(
        [1, 3, 32, 32],
        burn::tensor::Distribution::Uniform(0.0, 1.0),
        &device,
    );

    let probs = model.predict_probs(input.clone());
    let pmin: f32 = probs.clone().min().into_scalar();
    let pmax: f32 = probs.max().into_scalar();
    assert!(pmin >= 0.0 && pmax <= 1.0);

    let mask = model.predict_mask(input, 0.5);
    let values = mask.into_data().to_vec::<f32>().unwrap_or_default();
    assert_eq!(values.len(), 32 * 32);
    assert!(values.iter().all(|v| *v == 0.0 || *v == 1.0));
}

#[test]
fn inference_is_deterministic_without_autodiff() {
    let device = <B as burn::tensor::backend::Backend>::Device::default();
    let model: ImprovedUnet<B> = small_config().init(&device);
    let input = Tensor::<B, 4>::ones([1, 3, 16, 16], &device);

    let a = model.forward(input.clone());
    let b = model.forward(input);
    let diff: f32 = (a - b).abs().max().into_scalar();
    assert_eq!(diff, 0.0);
}

#[test]
fn gradients_reach_the_stem() {
    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    let model: ImprovedUnet<ADBackend> = small_config().init(&device);
    let input = Tensor::<ADBackend, 4>::ones([1, 3, 16, 16], &device).require_grad();

    let loss = model.forward(input.clone()).mean();
    let grads = loss.backward();
    let input_grad = input.grad(&grads).expect("input gradient");
    assert_eq!(input_grad.dims(), [1, 3, 16, 16]);
}

fn conv_params(cin: usize, cout: usize, kernel: usize) -> usize {
    cin * cout * kernel * kernel + cout
}

#[test]
fn default_parameter_count_matches_layer_list() {
    let device = <B as burn::tensor::backend::Backend>::Device::default();
    let model: ImprovedUnet<B> = ImprovedUnetConfig::default().init(&device);

    let f = 16;
    // Two affine instance norms and two 3x3 convs per context block.
    let context = |c: usize| 2 * 2 * c + 2 * conv_params(c, c, 3);
    let localization =
        |cin: usize, cout: usize| conv_params(cin, cout, 3) + conv_params(cout, cout, 1);
    let encoder = conv_params(3, f, 3)
        + (0..5).map(|level| context(f << level)).sum::<usize>()
        + (0..4)
            .map(|level| conv_params(f << level, f << (level + 1), 3))
            .sum::<usize>();
    let decoder = conv_params(16 * f, 8 * f, 3)
        + localization(16 * f, 8 * f)
        + conv_params(8 * f, 4 * f, 3)
        + localization(8 * f, 4 * f)
        + conv_params(4 * f, 2 * f, 3)
        + localization(4 * f, 2 * f)
        + conv_params(2 * f, f, 3)
        + conv_params(2 * f, 2 * f, 3);
    let heads = conv_params(4 * f, 2 * f, 3)
        + conv_params(2 * f, f, 3)
        + conv_params(2 * f, 1, 3)
        + conv_params(2 * f, f, 3)
        + conv_params(f, 1, 1);

    assert_eq!(encoder + decoder + heads, 2_805_122);
    assert_eq!(model.num_params(), 2_805_122);
}

#[test]
fn heads_sit_at_their_decoder_levels() {
    let device = <B as burn::tensor::backend::Backend>::Device::default();
    let model: ImprovedUnet<B> = small_config().init(&device);
    let input = Tensor::<B, 4>::ones([2, 3, 32, 48], &device);

    let heads = model.forward_heads(input);
    assert_eq!(heads.full.dims(), [2, 1, 32, 48]);
    assert_eq!(heads.half.dims(), [2, 4, 16, 24]);
    assert_eq!(heads.quarter.dims(), [2, 8, 8, 12]);
}

#[test]
fn deep_supervision_adds_lower_heads_to_output() {
    let device = <B as burn::tensor::backend::Backend>::Device::default();
    let model: ImprovedUnet<B> = small_config().init(&device);
    let input = Tensor::<B, 4>::random(
        [1, 3, 32, 32],
        burn::tensor::Distribution::Uniform(-1.0, 1.0),
        &device,
    );

    let heads = model.forward_heads(input.clone());
    let logits = model.forward(input);
    let combined = model.combine_heads(heads.clone());
    let same: f32 = (logits.clone() - combined).abs().max().into_scalar();
    assert_eq!(same, 0.0);

    // Output is more than the full-resolution head alone.
    let extra: f32 = (logits.clone() - heads.full.clone()).abs().max().into_scalar();
    assert!(extra > 0.0);

    // The quarter-resolution head reaches the output through the half head.
    let without_quarter = model.combine_heads(SegmentationHeads {
        quarter: heads.quarter.zeros_like(),
        ..heads
    });
    let quarter_share: f32 = (logits - without_quarter).abs().max().into_scalar();
    assert!(quarter_share > 0.0);
}
