use burn::module::{Param, RunningState};
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::{Initializer, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::{leaky_relu, relu};
use burn::tensor::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Negative slope of every LeakyReLU in both networks.
pub const LEAKY_SLOPE: f64 = 0.3;
/// Drop probability of decoder stages flagged with `dropout`.
pub const DROPOUT_PROB: f64 = 0.5;

/// Weight initialiser shared by all convolutions.
pub fn conv_initializer() -> Initializer {
    Initializer::Normal {
        mean: 0.0,
        std: 0.02,
    }
}

/// How normalisation and dropout behave during a forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardMode {
    /// Normalise with the current batch's statistics instead of the running averages.
    pub use_batch_statistics: bool,
    /// Fold the batch statistics into the running averages.
    pub update_running_statistics: bool,
    pub dropout: bool,
    /// Draw dropout masks from this seed instead of the backend generator,
    /// so a pass can be replayed exactly.
    pub dropout_seed: Option<u64>,
}

impl ForwardMode {
    pub const fn training() -> Self {
        ForwardMode {
            use_batch_statistics: true,
            update_running_statistics: true,
            dropout: true,
            dropout_seed: None,
        }
    }

    /// Sample rendering during training.
    ///
    /// Uses per-batch statistics and active dropout, as a training pass would,
    /// rather than the accumulated statistics conventional inference uses. The
    /// running averages are left untouched.
    pub const fn visualization() -> Self {
        ForwardMode {
            use_batch_statistics: true,
            update_running_statistics: false,
            dropout: true,
            dropout_seed: None,
        }
    }

    pub const fn inference() -> Self {
        ForwardMode {
            use_batch_statistics: false,
            update_running_statistics: false,
            dropout: false,
            dropout_seed: None,
        }
    }

    /// Same mode, but leave the running averages alone.
    pub const fn frozen_statistics(self) -> Self {
        ForwardMode {
            update_running_statistics: false,
            ..self
        }
    }

    pub const fn with_dropout_seed(self, seed: u64) -> Self {
        ForwardMode {
            dropout_seed: Some(seed),
            ..self
        }
    }

    /// Mode for the `index`-th dropout site of a network: each site gets its
    /// own mask stream derived from the pass seed.
    pub const fn for_layer(self, index: usize) -> Self {
        match self.dropout_seed {
            Some(seed) => self.with_dropout_seed(
                seed.wrapping_add((index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)),
            ),
            None => self,
        }
    }
}

/// One entry of an encoder or decoder stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LayerSpec {
    pub filters: usize,
    #[serde(default = "default_kernel_size")]
    pub kernel_size: usize,
    #[serde(default = "default_batch_norm")]
    pub batch_norm: bool,
    #[serde(default)]
    pub dropout: bool,
}

fn default_kernel_size() -> usize {
    4
}

fn default_batch_norm() -> bool {
    true
}

impl LayerSpec {
    /// 4x4 kernel, batch norm, no dropout.
    pub const fn new(filters: usize) -> Self {
        LayerSpec {
            filters,
            kernel_size: 4,
            batch_norm: true,
            dropout: false,
        }
    }

    pub const fn without_batch_norm(self) -> Self {
        LayerSpec {
            batch_norm: false,
            ..self
        }
    }

    pub const fn with_dropout(self) -> Self {
        LayerSpec {
            dropout: true,
            ..self
        }
    }
}

/// Batch normalisation over the channel axis of `[B, C, H, W]` input with an
/// explicit choice between batch and running statistics.
#[derive(Module, Debug)]
pub struct BatchNorm2d<B: Backend> {
    gamma: Param<Tensor<B, 1>>,
    beta: Param<Tensor<B, 1>>,
    running_mean: RunningState<Tensor<B, 1>>,
    running_var: RunningState<Tensor<B, 1>>,
    momentum: f64,
    epsilon: f64,
}

impl<B: Backend> BatchNorm2d<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        BatchNorm2d {
            gamma: Param::from_tensor(Tensor::ones([channels], device)),
            beta: Param::from_tensor(Tensor::zeros([channels], device)),
            running_mean: RunningState::new(Tensor::zeros([channels], device)),
            running_var: RunningState::new(Tensor::ones([channels], device)),
            momentum: 0.01,
            epsilon: 1e-3,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>, mode: ForwardMode) -> Tensor<B, 4> {
        let [batch, channels, height, width] = x.dims();
        let (mean, var) = if mode.use_batch_statistics {
            let flat = x
                .clone()
                .swap_dims(0, 1)
                .reshape([channels, batch * height * width]);
            let mean = flat.clone().mean_dim(1);
            let var = (flat - mean.clone()).powf_scalar(2.0).mean_dim(1);
            let mean = mean.reshape([channels]);
            let var = var.reshape([channels]);
            if mode.update_running_statistics {
                self.update_running(mean.clone().detach(), var.clone().detach());
            }
            (mean, var)
        } else {
            (self.running_mean.value_sync(), self.running_var.value_sync())
        };

        let shape = [1, channels, 1, 1];
        let std = var.add_scalar(self.epsilon).sqrt().reshape(shape);
        let normalized = (x - mean.reshape(shape)) / std;
        normalized * self.gamma.val().reshape(shape) + self.beta.val().reshape(shape)
    }

    fn update_running(&self, mean: Tensor<B, 1>, var: Tensor<B, 1>) {
        let keep = 1.0 - self.momentum;
        let running_mean = self.running_mean.value_sync();
        let running_var = self.running_var.value_sync();
        self.running_mean
            .update(running_mean.mul_scalar(keep).add(mean.mul_scalar(self.momentum)));
        self.running_var
            .update(running_var.mul_scalar(keep).add(var.mul_scalar(self.momentum)));
    }
}

/// Inverted dropout that is only active when `mode.dropout` is set.
fn dropout<B: Backend>(x: Tensor<B, 4>, prob: f64, mode: ForwardMode) -> Tensor<B, 4> {
    if !mode.dropout || prob <= 0.0 {
        return x;
    }
    let keep = 1.0 - prob;
    let mask = match mode.dropout_seed {
        Some(seed) => seeded_mask::<B>(x.dims(), keep, seed, &x.device()),
        None => x.random_like(Distribution::Bernoulli(keep)),
    };
    x * mask.div_scalar(keep)
}

/// Bernoulli(`keep`) mask drawn on the host from `seed`.
fn seeded_mask<B: Backend>(
    dims: [usize; 4],
    keep: f64,
    seed: u64,
    device: &B::Device,
) -> Tensor<B, 4> {
    let mut rng = StdRng::seed_from_u64(seed);
    let len = dims.iter().product();
    let values: Vec<f32> = (0..len)
        .map(|_| if rng.random_bool(keep) { 1.0 } else { 0.0 })
        .collect();
    Tensor::from_data(
        TensorData::new(values, dims).convert::<B::FloatElem>(),
        device,
    )
}

/// Padding that halves (or doubles) the spatial size for a stride-2 kernel.
fn same_padding(kernel_size: usize) -> usize {
    (kernel_size - 1) / 2
}

/// Conv (stride 2) -> optional BatchNorm -> LeakyReLU.
#[derive(Module, Debug)]
pub struct DownBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: Option<BatchNorm2d<B>>,
}

impl<B: Backend> DownBlock<B> {
    pub fn new(in_channels: usize, spec: &LayerSpec, device: &B::Device) -> Self {
        let pad = same_padding(spec.kernel_size);
        let conv = Conv2dConfig::new([in_channels, spec.filters], [spec.kernel_size; 2])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(pad, pad))
            .with_bias(false)
            .with_initializer(conv_initializer())
            .init(device);
        let norm = spec
            .batch_norm
            .then(|| BatchNorm2d::new(spec.filters, device));
        DownBlock { conv, norm }
    }

    pub fn forward(&self, x: Tensor<B, 4>, mode: ForwardMode) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = match &self.norm {
            Some(norm) => norm.forward(x, mode),
            None => x,
        };
        leaky_relu(x, LEAKY_SLOPE)
    }
}

/// Transposed conv (stride 2) -> optional BatchNorm -> optional Dropout -> ReLU.
#[derive(Module, Debug)]
pub struct UpBlock<B: Backend> {
    deconv: ConvTranspose2d<B>,
    norm: Option<BatchNorm2d<B>>,
    dropout: f64,
}

impl<B: Backend> UpBlock<B> {
    pub fn new(in_channels: usize, spec: &LayerSpec, device: &B::Device) -> Self {
        let deconv = upsample_conv(in_channels, spec.filters, spec.kernel_size, false, device);
        let norm = spec
            .batch_norm
            .then(|| BatchNorm2d::new(spec.filters, device));
        UpBlock {
            deconv,
            norm,
            dropout: if spec.dropout { DROPOUT_PROB } else { 0.0 },
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>, mode: ForwardMode) -> Tensor<B, 4> {
        let x = self.deconv.forward(x);
        let x = match &self.norm {
            Some(norm) => norm.forward(x, mode),
            None => x,
        };
        relu(dropout(x, self.dropout, mode))
    }
}

/// Stride-2 transposed convolution that exactly doubles height and width.
pub fn upsample_conv<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    bias: bool,
    device: &B::Device,
) -> ConvTranspose2d<B> {
    let pad = same_padding(kernel_size);
    let padding_out = kernel_size % 2;
    ConvTranspose2dConfig::new([in_channels, out_channels], [kernel_size; 2])
        .with_stride([2, 2])
        .with_padding([pad, pad])
        .with_padding_out([padding_out, padding_out])
        .with_bias(bias)
        .with_initializer(conv_initializer())
        .init(device)
}
