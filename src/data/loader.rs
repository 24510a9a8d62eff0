use std::path::Path;

use image::imageops;
use image::RgbImage;

use crate::data::sample::SourcePair;
use crate::error::DataError;

/// Decode a side-by-side paired image file.
///
/// The left half is the target ("real") image and the right half is the
/// input image. Pixels keep their 8-bit values; normalisation happens later.
pub fn load_pair(path: &Path) -> Result<SourcePair, DataError> {
    let decoded = image::open(path).map_err(|source| DataError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    split_pair(&decoded.to_rgb8(), path)
}

/// Decode an in-memory encoded image (any format `image` recognises).
pub fn decode_pair(bytes: &[u8], origin: &Path) -> Result<SourcePair, DataError> {
    let decoded = image::load_from_memory(bytes).map_err(|source| DataError::Decode {
        path: origin.to_path_buf(),
        source,
    })?;
    split_pair(&decoded.to_rgb8(), origin)
}

/// Split at column `width / 2` (floor). With an odd width the input half is one
/// column wider, which is rejected as a shape mismatch.
fn split_pair(rgb: &RgbImage, origin: &Path) -> Result<SourcePair, DataError> {
    let (width, height) = rgb.dimensions();
    if width < 2 {
        return Err(DataError::TooNarrow {
            path: origin.to_path_buf(),
            width,
        });
    }
    let half = width / 2;
    let target = imageops::crop_imm(rgb, 0, 0, half, height).to_image();
    let input = imageops::crop_imm(rgb, half, 0, width - half, height).to_image();
    Ok(SourcePair::new(input, target)?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::sample::PairImage;
    use crate::error::ShapeError;
    use image::Rgb;

    /// Write a `height` x `2 * half_width` PNG whose left half is `target` and
    /// right half is `input`.
    pub(crate) fn write_pair_png(
        path: &Path,
        height: u32,
        half_width: u32,
        target: [u8; 3],
        input: [u8; 3],
    ) {
        let img = RgbImage::from_fn(2 * half_width, height, |x, _| {
            if x < half_width {
                Rgb(target)
            } else {
                Rgb(input)
            }
        });
        img.save(path).unwrap();
    }

    #[test]
    fn test_load_four_pixel_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pair.png");
        write_pair_png(&path, 1, 2, [200, 10, 30], [5, 250, 128]);

        let pair = load_pair(&path).unwrap();
        assert_eq!(pair.input.dims(), [1, 2, 3]);
        assert_eq!(pair.target.dims(), [1, 2, 3]);
        for x in 0..2 {
            assert_eq!(pair.target.get_pixel(x, 0), &Rgb([200, 10, 30]));
            assert_eq!(pair.input.get_pixel(x, 0), &Rgb([5, 250, 128]));
        }
    }

    #[test]
    fn test_halves_share_shape_and_are_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pair.png");
        write_pair_png(&path, 6, 5, [1, 2, 3], [4, 5, 6]);

        let pair = load_pair(&path).unwrap();
        assert_eq!(pair.input.dims(), pair.target.dims());
        assert_eq!(pair.input.dims(), [6, 5, 3]);
    }

    fn encode_png(img: &RgbImage) -> Vec<u8> {
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_decode_from_memory() {
        let img = RgbImage::from_fn(4, 2, |x, _| Rgb([x as u8, 0, 0]));
        let pair = decode_pair(&encode_png(&img), Path::new("mem.png")).unwrap();
        assert_eq!(pair.dims(), [2, 2, 3]);
        assert_eq!(pair.target.get_pixel(1, 0)[0], 1);
        assert_eq!(pair.input.get_pixel(0, 0)[0], 2);
        assert_eq!(pair.input.get_pixel(1, 1)[0], 3);
    }

    #[test]
    fn test_odd_width_is_shape_error() {
        let img = RgbImage::from_fn(5, 2, |x, _| Rgb([x as u8, 0, 0]));
        let err = decode_pair(&encode_png(&img), Path::new("odd.png")).unwrap_err();
        assert!(
            matches!(err, DataError::Shape(ShapeError::PairMismatch { .. })),
            "got {err}"
        );
    }

    #[test]
    fn test_corrupt_file_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let err = load_pair(&path).unwrap_err();
        assert!(matches!(err, DataError::Decode { .. }), "got {err}");
    }
}
