use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::*;
use burn::tensor::activation::leaky_relu;
use serde::{Deserialize, Serialize};

use crate::error::ShapeError;
use crate::model::layers::{
    conv_initializer, BatchNorm2d, DownBlock, ForwardMode, LayerSpec, LEAKY_SLOPE,
};

/// Layout of the PatchGAN discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscriminatorConfig {
    /// Channels of each image; the network sees input and target stacked.
    pub image_channels: usize,
    pub encoder: Vec<LayerSpec>,
    /// Filters of the stride-1 convolution before the logit map.
    pub patch_filters: usize,
    pub kernel_size: usize,
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        DiscriminatorConfig {
            image_channels: 3,
            encoder: vec![
                LayerSpec::new(32).without_batch_norm(),
                LayerSpec::new(64),
                LayerSpec::new(128),
                LayerSpec::new(256),
            ],
            patch_filters: 512,
            kernel_size: 4,
        }
    }
}

impl DiscriminatorConfig {
    pub fn validate_layout(&self) -> Result<(), ShapeError> {
        if self.image_channels == 0 || self.patch_filters == 0 {
            return Err(ShapeError::Layout(
                "discriminator channel counts must be positive".into(),
            ));
        }
        if self.kernel_size == 0 || self.encoder.iter().any(|l| l.kernel_size == 0) {
            return Err(ShapeError::Layout("kernel size must be positive".into()));
        }
        if self.encoder.iter().any(|l| l.filters == 0) {
            return Err(ShapeError::Layout("layer filter counts must be positive".into()));
        }
        Ok(())
    }

    /// Shape `[1, h, w]` of the logit map for `height` x `width` images.
    pub fn output_shape(&self, height: usize, width: usize) -> Result<[usize; 3], ShapeError> {
        self.validate_layout()?;
        let factor = 1usize
            .checked_shl(self.encoder.len() as u32)
            .ok_or_else(|| ShapeError::Layout("discriminator encoder is too deep".into()))?;
        if height == 0 || width == 0 || height % factor != 0 || width % factor != 0 {
            return Err(ShapeError::Layout(format!(
                "{height}x{width} images are not divisible by 2^{} for the discriminator",
                self.encoder.len()
            )));
        }
        // two stride-1 convolutions padded by one on each side
        let patch = |side: usize| -> Option<usize> {
            let after_first = (side + 3).checked_sub(self.kernel_size)?;
            let after_second = (after_first + 3).checked_sub(self.kernel_size)?;
            (after_first > 0 && after_second > 0).then_some(after_second)
        };
        match (patch(height / factor), patch(width / factor)) {
            (Some(h), Some(w)) => Ok([1, h, w]),
            _ => Err(ShapeError::Layout(format!(
                "{height}x{width} images are too small for the discriminator patch head"
            ))),
        }
    }

    pub fn validate(&self, height: usize, width: usize) -> Result<(), ShapeError> {
        self.output_shape(height, width).map(|_| ())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Discriminator<B>, ShapeError> {
        self.validate_layout()?;

        let mut channels = self.image_channels * 2;
        let mut encoder = Vec::with_capacity(self.encoder.len());
        for spec in &self.encoder {
            encoder.push(DownBlock::new(channels, spec, device));
            channels = spec.filters;
        }

        let patch = Conv2dConfig::new([channels, self.patch_filters], [self.kernel_size; 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .with_initializer(conv_initializer())
            .init(device);
        let norm = BatchNorm2d::new(self.patch_filters, device);
        let head = Conv2dConfig::new([self.patch_filters, 1], [self.kernel_size; 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_initializer(conv_initializer())
            .init(device);

        Ok(Discriminator {
            encoder,
            patch,
            norm,
            head,
        })
    }
}

/// Conditional PatchGAN: scores every receptive-field patch of a
/// (input, candidate) pair with an unbounded logit.
#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    encoder: Vec<DownBlock<B>>,
    patch: Conv2d<B>,
    norm: BatchNorm2d<B>,
    head: Conv2d<B>,
}

impl<B: Backend> Discriminator<B> {
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
        candidate: Tensor<B, 4>,
        mode: ForwardMode,
    ) -> Tensor<B, 4> {
        let mut x = Tensor::cat(vec![input, candidate], 1);
        for block in &self.encoder {
            x = block.forward(x, mode);
        }
        let x = self.norm.forward(self.patch.forward(x), mode);
        self.head.forward(leaky_relu(x, LEAKY_SLOPE))
    }
}
