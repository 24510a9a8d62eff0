use image::imageops::{self, FilterType};
use image::RgbImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::data::sample::SourcePair;
use crate::error::ShapeError;

/// One draw of random jitter, shared by both members of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jitter {
    pub crop_y: usize,
    pub crop_x: usize,
    pub flip: bool,
}

/// Resize / random-crop / random-mirror augmentation.
pub struct Augmenter {
    height: usize,
    width: usize,
    jitter_scale: f64,
    rng: StdRng,
}

impl Augmenter {
    /// `height` x `width` is the output resolution; `jitter_scale` (>= 1) sets
    /// the intermediate upscale before cropping.
    pub fn new(height: usize, width: usize, jitter_scale: f64, rng: StdRng) -> Self {
        Augmenter {
            height,
            width,
            jitter_scale,
            rng,
        }
    }

    pub fn with_seed(height: usize, width: usize, jitter_scale: f64, seed: u64) -> Self {
        Self::new(height, width, jitter_scale, StdRng::seed_from_u64(seed))
    }

    /// Resolution both images are upscaled to before cropping (rounded down).
    pub fn jitter_size(&self) -> (usize, usize) {
        (
            (self.height as f64 * self.jitter_scale) as usize,
            (self.width as f64 * self.jitter_scale) as usize,
        )
    }

    /// Draw a fresh crop origin and flip decision for a `height` x `width` image.
    pub fn sample_jitter(&mut self, height: usize, width: usize) -> Result<Jitter, ShapeError> {
        if height < self.height || width < self.width {
            return Err(ShapeError::CropTooLarge {
                actual: [height, width],
                crop: [self.height, self.width],
            });
        }
        Ok(Jitter {
            crop_y: self.rng.random_range(0..=height - self.height),
            crop_x: self.rng.random_range(0..=width - self.width),
            flip: self.rng.random_bool(0.5),
        })
    }

    /// Training-time transform: upscale, crop at one shared origin, then mirror
    /// both images or neither.
    pub fn training_transform(&mut self, pair: SourcePair) -> Result<SourcePair, ShapeError> {
        let (jh, jw) = self.jitter_size();
        let resized = pair.map_both(|img| resize_nearest(img, jh, jw));
        let jitter = self.sample_jitter(jh, jw)?;
        self.apply_jitter(resized, jitter)
    }

    /// Crop and optionally mirror with an already drawn jitter.
    pub fn apply_jitter(&self, pair: SourcePair, jitter: Jitter) -> Result<SourcePair, ShapeError> {
        let [height, width, _] = pair.dims();
        if jitter.crop_y + self.height > height || jitter.crop_x + self.width > width {
            return Err(ShapeError::CropTooLarge {
                actual: [height, width],
                crop: [jitter.crop_y + self.height, jitter.crop_x + self.width],
            });
        }
        Ok(pair.map_both(|img| {
            let mut window = imageops::crop_imm(
                img,
                jitter.crop_x as u32,
                jitter.crop_y as u32,
                self.width as u32,
                self.height as u32,
            )
            .to_image();
            if jitter.flip {
                imageops::flip_horizontal_in_place(&mut window);
            }
            window
        }))
    }

    /// Evaluation-time transform: a deterministic resize, no crop or mirror.
    pub fn eval_transform(&self, pair: SourcePair) -> SourcePair {
        pair.map_both(|img| resize_nearest(img, self.height, self.width))
    }
}

/// Nearest-neighbour resize to `height` x `width`.
pub fn resize_nearest(img: &RgbImage, height: usize, width: usize) -> RgbImage {
    imageops::resize(img, width as u32, height as u32, FilterType::Nearest)
}
