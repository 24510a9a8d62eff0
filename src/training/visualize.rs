use std::fs;
use std::path::{Path, PathBuf};

use burn::prelude::*;
use image::{imageops, RgbImage};
use tracing::debug;

use crate::data::{denormalize_image, ImageTensor};
use crate::error::{ShapeError, TrainingError};

/// Split an `[N, C, H, W]` tensor into `N` HWC images.
pub fn images_from_tensor<B: Backend>(
    tensor: Tensor<B, 4>,
) -> Result<Vec<ImageTensor>, ShapeError> {
    let [n, c, h, w] = tensor.dims();
    let values: Vec<f32> = tensor.permute([0, 2, 3, 1]).into_data().iter::<f32>().collect();
    values
        .chunks_exact(h * w * c)
        .take(n)
        .map(|chunk| ImageTensor::new(chunk.to_vec(), h, w, c))
        .collect()
}

/// Convert a normalised `[-1, 1]` RGB image to 8 bits, clamping overshoot.
pub fn to_rgb8(img: &ImageTensor) -> Result<RgbImage, ShapeError> {
    if img.channels() != 3 {
        return Err(ShapeError::Channels {
            expected: 3,
            actual: img.channels(),
        });
    }
    let bytes = denormalize_image(img.clone())
        .into_vec()
        .into_iter()
        .map(|v| v.round().clamp(0.0, 255.0) as u8)
        .collect();
    RgbImage::from_raw(img.width() as u32, img.height() as u32, bytes).ok_or(
        ShapeError::BufferLength {
            dims: img.dims(),
            expected: img.height() * img.width() * 3,
            actual: img.as_slice().len(),
        },
    )
}

/// Place normalised `[-1, 1]` RGB images left to right in one 8-bit image.
pub fn side_by_side(panels: &[&ImageTensor]) -> Result<RgbImage, ShapeError> {
    let Some(first) = panels.first() else {
        return Err(ShapeError::EmptyBatch);
    };
    let expected = first.dims();
    let (width, height) = (first.width() as u32, first.height() as u32);

    let mut canvas = RgbImage::new(width * panels.len() as u32, height);
    for (i, panel) in panels.iter().enumerate() {
        if panel.dims() != expected {
            return Err(ShapeError::BatchMismatch {
                expected,
                actual: panel.dims(),
            });
        }
        imageops::replace(&mut canvas, &to_rgb8(panel)?, i as i64 * width as i64, 0);
    }
    Ok(canvas)
}

/// Writes numbered `{index}.png` previews into one directory.
///
/// The first index is the number of PNG files already present, so reruns
/// never overwrite earlier previews.
pub struct SampleWriter {
    dir: PathBuf,
    next_index: usize,
}

impl SampleWriter {
    pub fn new(dir: &Path) -> Result<Self, TrainingError> {
        fs::create_dir_all(dir)?;
        let existing = fs::read_dir(dir)?
            .filter_map(Result::ok)
            .filter(|e| {
                e.path()
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
            })
            .count();
        Ok(SampleWriter {
            dir: dir.to_path_buf(),
            next_index: existing,
        })
    }

    /// Never move the index backwards, e.g. when a checkpoint recorded a
    /// later index than the files on disk suggest.
    pub fn advance_to(&mut self, index: usize) {
        self.next_index = self.next_index.max(index);
    }

    pub fn next_index(&self) -> usize {
        self.next_index
    }

    pub fn write(
        &mut self,
        input: &ImageTensor,
        target: &ImageTensor,
        prediction: &ImageTensor,
    ) -> Result<PathBuf, TrainingError> {
        let image = side_by_side(&[input, target, prediction])?;
        let path = self.dir.join(format!("{}.png", self.next_index));
        image
            .save(&path)
            .map_err(|source| TrainingError::SampleWrite {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "sample written");
        self.next_index += 1;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::Rgb;

    #[test]
    fn test_images_from_tensor_restores_hwc() {
        let device = Default::default();
        // channel c of pixel (y, x) holds c * 100 + y * 10 + x
        let mut data = Vec::new();
        for c in 0..3 {
            for y in 0..2 {
                for x in 0..3 {
                    data.push((c * 100 + y * 10 + x) as f32);
                }
            }
        }
        let t = Tensor::<NdArray<f32>, 4>::from_data(TensorData::new(data, [1, 3, 2, 3]), &device);
        let images = images_from_tensor(t).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].dims(), [2, 3, 3]);
        assert_eq!(images[0].pixel(1, 2), &[12.0, 112.0, 212.0]);
    }

    #[test]
    fn test_side_by_side_layout() {
        let a = ImageTensor::filled(2, 2, 3, -1.0);
        let b = ImageTensor::filled(2, 2, 3, 1.0);
        let c = ImageTensor::filled(2, 2, 3, 0.0);
        let img = side_by_side(&[&a, &b, &c]).unwrap();
        assert_eq!(img.dimensions(), (6, 2));
        assert_eq!(img.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(img.get_pixel(3, 1), &Rgb([255, 255, 255]));
        assert_eq!(img.get_pixel(5, 0), &Rgb([128, 128, 128]));
    }

    #[test]
    fn test_side_by_side_rejects_mismatch() {
        let a = ImageTensor::filled(2, 2, 3, 0.0);
        let b = ImageTensor::filled(2, 3, 3, 0.0);
        assert!(matches!(
            side_by_side(&[&a, &b]),
            Err(ShapeError::BatchMismatch { .. })
        ));
        assert!(side_by_side(&[]).is_err());
        let grey = ImageTensor::filled(2, 2, 1, 0.0);
        assert!(matches!(to_rgb8(&grey), Err(ShapeError::Channels { .. })));
    }

    #[test]
    fn test_index_seeded_from_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0.png"), b"x").unwrap();
        std::fs::write(dir.path().join("1.png"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let mut writer = SampleWriter::new(dir.path()).unwrap();
        assert_eq!(writer.next_index(), 2);

        let img = ImageTensor::filled(4, 4, 3, 0.5);
        let path = writer.write(&img, &img, &img).unwrap();
        assert!(path.ends_with("2.png"));
        assert_eq!(writer.next_index(), 3);

        let written = image::open(&path).unwrap().to_rgb8();
        assert_eq!(written.dimensions(), (12, 4));

        writer.advance_to(1);
        assert_eq!(writer.next_index(), 3);
        writer.advance_to(10);
        assert_eq!(writer.next_index(), 10);
    }
}
