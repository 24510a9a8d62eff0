use burn::nn::conv::ConvTranspose2d;
use burn::prelude::*;
use burn::tensor::activation::tanh;
use serde::{Deserialize, Serialize};

use crate::error::ShapeError;
use crate::model::layers::{upsample_conv, DownBlock, ForwardMode, LayerSpec, UpBlock};

/// Layout of the U-Net generator.
///
/// The decoder must have exactly one stage fewer than the encoder: the deepest
/// encoder output is the bottleneck and every other encoder output is
/// concatenated onto the decoder stage of matching resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub input_channels: usize,
    pub output_channels: usize,
    pub encoder: Vec<LayerSpec>,
    pub decoder: Vec<LayerSpec>,
    /// Kernel of the final upsampling convolution.
    pub final_kernel_size: usize,
}

impl Default for GeneratorConfig {
    /// Nine downsampling stages, sized for 512x512 images.
    fn default() -> Self {
        GeneratorConfig {
            input_channels: 3,
            output_channels: 3,
            encoder: vec![
                LayerSpec::new(32).without_batch_norm(),
                LayerSpec::new(64),
                LayerSpec::new(128),
                LayerSpec::new(256),
                LayerSpec::new(512),
                LayerSpec::new(1024),
                LayerSpec::new(1024),
                LayerSpec::new(1024),
                LayerSpec::new(1024),
            ],
            decoder: vec![
                LayerSpec::new(1024).with_dropout(),
                LayerSpec::new(1024).with_dropout(),
                LayerSpec::new(1024).with_dropout(),
                LayerSpec::new(512),
                LayerSpec::new(256),
                LayerSpec::new(128),
                LayerSpec::new(64),
                LayerSpec::new(32),
            ],
            final_kernel_size: 4,
        }
    }
}

impl GeneratorConfig {
    /// Check the stack layout on its own.
    pub fn validate_layout(&self) -> Result<(), ShapeError> {
        if self.encoder.is_empty() {
            return Err(ShapeError::Layout("generator encoder is empty".into()));
        }
        if self.decoder.len() + 1 != self.encoder.len() {
            return Err(ShapeError::Layout(format!(
                "generator needs one decoder stage fewer than encoder stages, got {} encoder and {} decoder",
                self.encoder.len(),
                self.decoder.len()
            )));
        }
        if self.input_channels == 0 || self.output_channels == 0 {
            return Err(ShapeError::Layout("generator channel counts must be positive".into()));
        }
        let kernels = self.encoder.iter().chain(&self.decoder).map(|l| l.kernel_size);
        for kernel in kernels.chain([self.final_kernel_size]) {
            if kernel == 0 {
                return Err(ShapeError::Layout("kernel size must be positive".into()));
            }
        }
        if self.encoder.iter().chain(&self.decoder).any(|l| l.filters == 0) {
            return Err(ShapeError::Layout("layer filter counts must be positive".into()));
        }
        Ok(())
    }

    /// Check that the layout fits `height` x `width` images: each encoder stage
    /// halves the resolution, so both sides must be divisible by `2^depth`.
    pub fn validate(&self, height: usize, width: usize) -> Result<(), ShapeError> {
        self.validate_layout()?;
        let factor = 1usize
            .checked_shl(self.encoder.len() as u32)
            .ok_or_else(|| ShapeError::Layout("generator encoder is too deep".into()))?;
        if height == 0 || width == 0 || height % factor != 0 || width % factor != 0 {
            return Err(ShapeError::Layout(format!(
                "{height}x{width} images are not divisible by 2^{} for a {}-stage encoder",
                self.encoder.len(),
                self.encoder.len()
            )));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Generator<B>, ShapeError> {
        self.validate_layout()?;

        let mut encoder = Vec::with_capacity(self.encoder.len());
        let mut channels = self.input_channels;
        let mut skip_channels = Vec::with_capacity(self.encoder.len());
        for spec in &self.encoder {
            encoder.push(DownBlock::new(channels, spec, device));
            channels = spec.filters;
            skip_channels.push(channels);
        }
        skip_channels.pop();

        let mut decoder = Vec::with_capacity(self.decoder.len());
        for (spec, skip) in self.decoder.iter().zip(skip_channels.iter().rev()) {
            decoder.push(UpBlock::new(channels, spec, device));
            channels = spec.filters + skip;
        }

        let last = upsample_conv(
            channels,
            self.output_channels,
            self.final_kernel_size,
            true,
            device,
        );
        Ok(Generator {
            encoder,
            decoder,
            last,
        })
    }
}

/// U-Net generator mapping an input image to an output image of the same size,
/// with values in `[-1, 1]`.
#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    encoder: Vec<DownBlock<B>>,
    decoder: Vec<UpBlock<B>>,
    last: ConvTranspose2d<B>,
}

impl<B: Backend> Generator<B> {
    /// `input` is `[batch, channels, height, width]`.
    pub fn forward(&self, input: Tensor<B, 4>, mode: ForwardMode) -> Tensor<B, 4> {
        let mut x = input;
        let mut skips = Vec::with_capacity(self.encoder.len());
        for block in &self.encoder {
            x = block.forward(x, mode);
            skips.push(x.clone());
        }
        // bottleneck
        skips.pop();

        for (i, (block, skip)) in self.decoder.iter().zip(skips.into_iter().rev()).enumerate() {
            x = block.forward(x, mode.for_layer(i));
            x = Tensor::cat(vec![x, skip], 1);
        }
        tanh(self.last.forward(x))
    }

    pub fn depth(&self) -> usize {
        self.encoder.len()
    }
}
