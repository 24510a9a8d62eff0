use image::RgbImage;

use crate::error::ShapeError;

/// Host-side float image stored row-major as `[height, width, channels]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
    height: usize,
    width: usize,
    channels: usize,
}

impl ImageTensor {
    /// Wrap raw HWC data holding exactly `height * width * channels` values.
    pub fn new(
        data: Vec<f32>,
        height: usize,
        width: usize,
        channels: usize,
    ) -> Result<Self, ShapeError> {
        let expected = height * width * channels;
        if data.len() != expected {
            return Err(ShapeError::BufferLength {
                dims: [height, width, channels],
                expected,
                actual: data.len(),
            });
        }
        Ok(ImageTensor {
            data,
            height,
            width,
            channels,
        })
    }

    /// An image with every element set to `value`.
    pub fn filled(height: usize, width: usize, channels: usize, value: f32) -> Self {
        ImageTensor {
            data: vec![value; height * width * channels],
            height,
            width,
            channels,
        }
    }

    /// Cast 8-bit RGB to floats in `[0, 255]`.
    pub fn from_rgb(img: &RgbImage) -> Self {
        let (width, height) = img.dimensions();
        ImageTensor {
            data: img.as_raw().iter().map(|&v| f32::from(v)).collect(),
            height: height as usize,
            width: width as usize,
            channels: 3,
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// `[height, width, channels]`.
    pub fn dims(&self) -> [usize; 3] {
        [self.height, self.width, self.channels]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// The `channels` values of the pixel at (`y`, `x`).
    pub fn pixel(&self, y: usize, x: usize) -> &[f32] {
        let start = (y * self.width + x) * self.channels;
        &self.data[start..start + self.channels]
    }

    /// Apply `f` to every element.
    pub fn map(mut self, f: impl Fn(f32) -> f32) -> ImageTensor {
        for v in &mut self.data {
            *v = f(*v);
        }
        self
    }
}

/// Anything that can sit in an [`ImagePair`].
pub trait PairImage {
    /// `[height, width, channels]`.
    fn dims(&self) -> [usize; 3];
}

impl PairImage for ImageTensor {
    fn dims(&self) -> [usize; 3] {
        ImageTensor::dims(self)
    }
}

impl PairImage for RgbImage {
    fn dims(&self) -> [usize; 3] {
        [self.height() as usize, self.width() as usize, 3]
    }
}

/// An aligned (input, target) pair cut from one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePair<I = ImageTensor> {
    pub input: I,
    pub target: I,
}

/// A pair straight from the decoder, before normalisation.
pub type SourcePair = ImagePair<RgbImage>;

impl<I: PairImage> ImagePair<I> {
    /// Build a pair, rejecting members whose shapes disagree.
    pub fn new(input: I, target: I) -> Result<Self, ShapeError> {
        if input.dims() != target.dims() {
            return Err(ShapeError::PairMismatch {
                input: input.dims(),
                target: target.dims(),
            });
        }
        Ok(ImagePair { input, target })
    }

    pub fn dims(&self) -> [usize; 3] {
        self.input.dims()
    }

    /// Apply the same transform to both members.
    pub fn map_both<J>(self, f: impl Fn(&I) -> J) -> ImagePair<J> {
        ImagePair {
            input: f(&self.input),
            target: f(&self.target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_new_rejects_wrong_length() {
        let err = ImageTensor::new(vec![0.0; 11], 2, 2, 3).unwrap_err();
        assert!(matches!(
            err,
            ShapeError::BufferLength {
                expected: 12,
                actual: 11,
                ..
            }
        ));
        assert!(ImageTensor::new(vec![0.0; 12], 2, 2, 3).is_ok());
    }

    #[test]
    fn test_from_rgb_keeps_byte_values_and_layout() {
        let img = RgbImage::from_fn(3, 2, |x, y| Rgb([x as u8, y as u8, 200]));
        let t = ImageTensor::from_rgb(&img);
        assert_eq!(t.dims(), [2, 3, 3]);
        assert_eq!(t.pixel(1, 2), &[2.0, 1.0, 200.0]);
        assert_eq!(t.pixel(0, 0), &[0.0, 0.0, 200.0]);
    }

    #[test]
    fn test_pair_rejects_mismatch() {
        let err = ImagePair::new(
            ImageTensor::filled(2, 2, 3, 0.0),
            ImageTensor::filled(2, 3, 3, 0.0),
        )
        .unwrap_err();
        assert!(matches!(err, ShapeError::PairMismatch { .. }));

        let err = SourcePair::new(RgbImage::new(2, 2), RgbImage::new(3, 2)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "input/target shape mismatch: input [2, 2, 3], target [2, 3, 3]"
        );
    }

    #[test]
    fn test_map_both_changes_member_type() {
        let pair = SourcePair::new(RgbImage::new(2, 1), RgbImage::new(2, 1)).unwrap();
        let floats: ImagePair = pair.map_both(ImageTensor::from_rgb);
        assert_eq!(floats.dims(), [1, 2, 3]);
    }
}
