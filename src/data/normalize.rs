use image::RgbImage;

use crate::data::sample::{ImagePair, ImageTensor, SourcePair};

/// Map byte-range intensities `[0, 255]` to `[-1, 1]`.
pub fn normalize(pair: SourcePair) -> ImagePair {
    pair.map_both(normalize_rgb)
}

pub fn normalize_rgb(img: &RgbImage) -> ImageTensor {
    normalize_image(ImageTensor::from_rgb(img))
}

pub fn normalize_image(img: ImageTensor) -> ImageTensor {
    img.map(|x| x / 127.5 - 1.0)
}

/// Inverse of [`normalize_image`].
pub fn denormalize_image(img: ImageTensor) -> ImageTensor {
    img.map(|x| (x + 1.0) * 127.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_normalize_endpoints() {
        let img = ImageTensor::new(vec![0.0, 127.5, 255.0], 1, 1, 3).unwrap();
        let out = normalize_image(img);
        assert_eq!(out.as_slice(), &[-1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_normalize_applies_to_both_members() {
        let input = RgbImage::from_pixel(2, 2, Rgb([255, 255, 255]));
        let target = RgbImage::from_pixel(2, 2, Rgb([0, 0, 0]));
        let pair = normalize(SourcePair::new(input, target).unwrap());
        assert_eq!(pair.dims(), [2, 2, 3]);
        assert!(pair.input.as_slice().iter().all(|&v| v == 1.0));
        assert!(pair.target.as_slice().iter().all(|&v| v == -1.0));
    }

    #[test]
    fn test_roundtrip_all_byte_values() {
        let img = RgbImage::from_fn(256, 1, |x, _| Rgb([x as u8, 255 - x as u8, 0]));
        let back = denormalize_image(normalize_rgb(&img));
        let original = ImageTensor::from_rgb(&img);
        for (orig, got) in original.as_slice().iter().zip(back.as_slice()) {
            assert!((orig - got).abs() < 1e-3, "{orig} -> {got}");
        }
    }
}
