use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use burn::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::data::augment::Augmenter;
use crate::data::loader::load_pair;
use crate::data::normalize::normalize;
use crate::data::sample::{ImagePair, ImageTensor};
use crate::error::{DataError, ShapeError};

/// Dataset location and input pipeline settings.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub dataset_root: PathBuf,
    pub train_subdir: String,
    pub test_subdir: String,
    /// Extension (without the dot) of source files to enumerate.
    pub file_extension: String,
    /// Shuffle reservoir size for the training stream.
    pub buffer_size: usize,
    pub batch_size: usize,
    pub image_height: usize,
    pub image_width: usize,
    /// Upscale factor applied before random cropping.
    pub jitter_scale: f64,
    /// Samples decoded ahead on a worker thread; 0 loads inline.
    pub prefetch: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            dataset_root: PathBuf::from("dataset"),
            train_subdir: "train".to_string(),
            test_subdir: "test".to_string(),
            file_extension: "jpg".to_string(),
            buffer_size: 500,
            batch_size: 1,
            image_height: 512,
            image_width: 512,
            jitter_scale: 1.3,
            prefetch: 4,
        }
    }
}

impl DataConfig {
    pub fn train_dir(&self) -> PathBuf {
        self.dataset_root.join(&self.train_subdir)
    }

    pub fn test_dir(&self) -> PathBuf {
        self.dataset_root.join(&self.test_subdir)
    }
}

/// A stack of aligned pairs, kept on the host until handed to a backend.
#[derive(Debug, Clone)]
pub struct Batch {
    pub inputs: Vec<ImageTensor>,
    pub targets: Vec<ImageTensor>,
}

impl Batch {
    pub fn from_pairs(pairs: Vec<ImagePair>) -> Result<Self, ShapeError> {
        let expected = pairs.first().ok_or(ShapeError::EmptyBatch)?.dims();
        let mut inputs = Vec::with_capacity(pairs.len());
        let mut targets = Vec::with_capacity(pairs.len());
        for pair in pairs {
            for actual in [pair.input.dims(), pair.target.dims()] {
                if actual != expected {
                    return Err(ShapeError::BatchMismatch { expected, actual });
                }
            }
            inputs.push(pair.input);
            targets.push(pair.target);
        }
        Ok(Batch { inputs, targets })
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// `[height, width, channels]` shared by every image in the batch.
    pub fn image_dims(&self) -> [usize; 3] {
        self.inputs[0].dims()
    }

    /// Materialise as `(input, target)` tensors of shape `[B, C, H, W]`.
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> (Tensor<B, 4>, Tensor<B, 4>) {
        (
            stack_images(&self.inputs, device),
            stack_images(&self.targets, device),
        )
    }
}

/// Stack HWC images into one NCHW tensor.
pub fn stack_images<B: Backend>(images: &[ImageTensor], device: &B::Device) -> Tensor<B, 4> {
    let [h, w, c] = images[0].dims();
    let mut flat = Vec::with_capacity(images.len() * h * w * c);
    for img in images {
        flat.extend_from_slice(img.as_slice());
    }
    let data = TensorData::new(flat, [images.len(), h, w, c]).convert::<B::FloatElem>();
    Tensor::<B, 4>::from_data(data, device).permute([0, 3, 1, 2])
}

/// Bounded-reservoir shuffle: keep up to `capacity` items and emit a uniformly
/// chosen one each step, refilling from the source.
pub struct ShuffleBuffer<I: Iterator> {
    source: I,
    buffer: Vec<I::Item>,
    capacity: usize,
    rng: StdRng,
}

impl<I: Iterator> ShuffleBuffer<I> {
    pub fn new(source: I, capacity: usize, rng: StdRng) -> Self {
        ShuffleBuffer {
            source,
            buffer: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
            rng,
        }
    }
}

impl<I: Iterator> Iterator for ShuffleBuffer<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        while self.buffer.len() < self.capacity {
            match self.source.next() {
                Some(item) => self.buffer.push(item),
                None => break,
            }
        }
        if self.buffer.is_empty() {
            return None;
        }
        let idx = self.rng.random_range(0..self.buffer.len());
        Some(self.buffer.swap_remove(idx))
    }
}

/// Group samples into batches of `batch_size`; the final batch may be short.
/// The first failed sample is surfaced as the batch result.
pub struct Batches<I> {
    source: I,
    batch_size: usize,
}

impl<I> Batches<I> {
    pub fn new(source: I, batch_size: usize) -> Self {
        Batches { source, batch_size }
    }
}

impl<I> Iterator for Batches<I>
where
    I: Iterator<Item = Result<ImagePair, DataError>>,
{
    type Item = Result<Batch, DataError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut pairs = Vec::with_capacity(self.batch_size);
        while pairs.len() < self.batch_size {
            match self.source.next() {
                Some(Ok(pair)) => pairs.push(pair),
                Some(Err(e)) => return Some(Err(e)),
                None => break,
            }
        }
        if pairs.is_empty() {
            return None;
        }
        Some(Batch::from_pairs(pairs).map_err(DataError::from))
    }
}

/// Runs a sample iterator on a worker thread, buffering up to `depth` items.
pub struct Prefetch {
    rx: mpsc::Receiver<Result<ImagePair, DataError>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Prefetch {
    pub fn spawn<I>(source: I, depth: usize) -> Self
    where
        I: Iterator<Item = Result<ImagePair, DataError>> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(depth);
        let worker = thread::spawn(move || {
            for item in source {
                // Receiver dropped: the consumer stopped early.
                if tx.send(item).is_err() {
                    break;
                }
            }
        });
        Prefetch {
            rx,
            worker: Some(worker),
        }
    }
}

impl Iterator for Prefetch {
    type Item = Result<ImagePair, DataError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rx.recv() {
            Ok(item) => Some(item),
            // Sender gone: either the source is exhausted or the worker panicked.
            Err(_) => match self.worker.take()?.join() {
                Ok(()) => None,
                Err(_) => Some(Err(DataError::WorkerDisconnected)),
            },
        }
    }
}

/// Lazy stream of batches for one pass over a split.
pub type BatchStream = Box<dyn Iterator<Item = Result<Batch, DataError>>>;

/// List `*.{extension}` files in `dir`, sorted by file name.
pub fn list_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, DataError> {
    if !dir.is_dir() {
        return Err(DataError::DirNotFound(dir.to_path_buf()));
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .extension()
            .map(|e| e.to_string_lossy().eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Paired-image input pipeline for the training and evaluation splits.
pub struct DatasetPipeline {
    config: DataConfig,
    train_files: Vec<PathBuf>,
    test_files: Vec<PathBuf>,
    rng: StdRng,
}

impl DatasetPipeline {
    /// Enumerate `train/` and `test/` under the dataset root.
    ///
    /// An empty training split is an error; an empty test split only
    /// disables sample visualisation.
    pub fn new(config: DataConfig, rng: StdRng) -> Result<Self, DataError> {
        let train_files = list_files(&config.train_dir(), &config.file_extension)?;
        if train_files.is_empty() {
            return Err(DataError::Empty {
                dir: config.train_dir(),
                extension: config.file_extension.clone(),
            });
        }
        let test_files = list_files(&config.test_dir(), &config.file_extension)?;
        debug!(
            train = train_files.len(),
            test = test_files.len(),
            "dataset enumerated"
        );
        Ok(Self::from_files(config, train_files, test_files, rng))
    }

    pub fn from_files(
        config: DataConfig,
        train_files: Vec<PathBuf>,
        test_files: Vec<PathBuf>,
        rng: StdRng,
    ) -> Self {
        DatasetPipeline {
            config,
            train_files,
            test_files,
            rng,
        }
    }

    pub fn config(&self) -> &DataConfig {
        &self.config
    }

    pub fn train_len(&self) -> usize {
        self.train_files.len()
    }

    pub fn test_len(&self) -> usize {
        self.test_files.len()
    }

    /// Number of batches one training pass yields.
    pub fn train_batches(&self) -> usize {
        self.train_files.len().div_ceil(self.config.batch_size)
    }

    /// One shuffled, augmented pass over the training split:
    /// load -> jitter -> normalize -> shuffle -> batch.
    ///
    /// Each call draws fresh augmentation and shuffle seeds from the
    /// pipeline's generator, so ordering differs between passes but is
    /// reproducible for a seeded pipeline.
    pub fn training_stream(&mut self) -> BatchStream {
        let mut augmenter = Augmenter::new(
            self.config.image_height,
            self.config.image_width,
            self.config.jitter_scale,
            StdRng::seed_from_u64(self.rng.random()),
        );
        let shuffle_rng = StdRng::seed_from_u64(self.rng.random());

        let files = self.train_files.clone();
        let samples = files.into_iter().map(move |path| -> Result<ImagePair, DataError> {
            let pair = load_pair(&path)?;
            let pair = augmenter.training_transform(pair)?;
            Ok(normalize(pair))
        });

        let batch_size = self.config.batch_size;
        let buffer_size = self.config.buffer_size;
        if self.config.prefetch > 0 {
            let prefetched = Prefetch::spawn(samples, self.config.prefetch);
            Box::new(Batches::new(
                ShuffleBuffer::new(prefetched, buffer_size, shuffle_rng),
                batch_size,
            ))
        } else {
            Box::new(Batches::new(
                ShuffleBuffer::new(samples, buffer_size, shuffle_rng),
                batch_size,
            ))
        }
    }

    /// One pass over the test split in file-name order:
    /// load -> resize -> normalize -> batch.
    pub fn eval_stream(&self) -> BatchStream {
        let augmenter = Augmenter::new(
            self.config.image_height,
            self.config.image_width,
            self.config.jitter_scale,
            StdRng::seed_from_u64(0),
        );
        let files = self.test_files.clone();
        let samples = files.into_iter().map(move |path| -> Result<ImagePair, DataError> {
            let pair = load_pair(&path)?;
            Ok(normalize(augmenter.eval_transform(pair)))
        });
        Box::new(Batches::new(samples, self.config.batch_size))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::loader::tests::write_pair_png;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    /// Create `train/` and `test/` with `n_train` / `n_test` PNG pairs of
    /// `size` x `size` halves. Pair `i` has input colour `i` and target colour
    /// `255 - i`.
    pub(crate) fn synthetic_dataset(
        root: &Path,
        n_train: usize,
        n_test: usize,
        size: u32,
    ) -> DataConfig {
        for (sub, n) in [("train", n_train), ("test", n_test)] {
            let dir = root.join(sub);
            fs::create_dir_all(&dir).unwrap();
            for i in 0..n {
                let v = i as u8;
                write_pair_png(
                    &dir.join(format!("{i:05}.png")),
                    size,
                    size,
                    [255 - v, 255 - v, 255 - v],
                    [v, v, v],
                );
            }
        }
        DataConfig {
            dataset_root: root.to_path_buf(),
            file_extension: "png".to_string(),
            buffer_size: 8,
            batch_size: 1,
            image_height: size as usize,
            image_width: size as usize,
            prefetch: 0,
            ..Default::default()
        }
    }

    fn first_pixel(batch: &Batch) -> f32 {
        batch.inputs[0].as_slice()[0]
    }

    #[test]
    fn test_shuffle_buffer_is_permutation() {
        let shuffled: Vec<u32> =
            ShuffleBuffer::new(0..100u32, 10, StdRng::seed_from_u64(3)).collect();
        let mut sorted = shuffled.clone();
        sorted.sort();
        assert_eq!(sorted, (0..100).collect::<Vec<_>>());
        assert_ne!(shuffled, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_shuffle_buffer_bounded_displacement() {
        // an item can only be emitted once it has entered the reservoir
        let out: Vec<usize> =
            ShuffleBuffer::new(0..50usize, 5, StdRng::seed_from_u64(9)).collect();
        for (pos, &item) in out.iter().enumerate() {
            assert!(item < pos + 5, "item {item} emitted too early at {pos}");
        }
    }

    #[test]
    fn test_batches_keep_short_tail() {
        let pairs = (0..5).map(|i| {
            let img = ImageTensor::filled(2, 2, 3, i as f32);
            ImagePair::new(img.clone(), img)
                .map_err(DataError::from)
        });
        let sizes: Vec<usize> = Batches::new(pairs, 2).map(|b| b.unwrap().len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_batch_to_tensors_is_nchw() {
        let device = Default::default();
        let img = ImageTensor::new((0..12).map(|v| v as f32).collect(), 2, 2, 3).unwrap();
        let batch = Batch::from_pairs(vec![ImagePair::new(img.clone(), img).unwrap()]).unwrap();
        let (input, _) = batch.to_tensors::<TestBackend>(&device);
        assert_eq!(input.dims(), [1, 3, 2, 2]);
        let values: Vec<f32> = input.into_data().to_vec().unwrap();
        // channel 0 of the four pixels, then channel 1, ...
        assert_eq!(&values[..4], &[0.0, 3.0, 6.0, 9.0]);
        assert_eq!(&values[4..8], &[1.0, 4.0, 7.0, 10.0]);
    }

    #[test]
    fn test_batch_mismatch_reports_offending_pair() {
        let small = ImageTensor::filled(2, 2, 3, 0.0);
        let large = ImageTensor::filled(4, 2, 3, 0.0);
        let pairs = vec![
            ImagePair::new(small.clone(), small.clone()).unwrap(),
            ImagePair::new(small.clone(), small).unwrap(),
            ImagePair::new(large.clone(), large).unwrap(),
        ];
        let err = Batch::from_pairs(pairs).unwrap_err();
        assert!(
            matches!(
                err,
                ShapeError::BatchMismatch {
                    expected: [2, 2, 3],
                    actual: [4, 2, 3],
                }
            ),
            "got {err}"
        );
        assert!(matches!(
            Batch::from_pairs(Vec::new()),
            Err(ShapeError::EmptyBatch)
        ));
    }

    #[test]
    fn test_missing_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfig {
            dataset_root: dir.path().join("nope"),
            ..Default::default()
        };
        let err = DatasetPipeline::new(config, StdRng::seed_from_u64(0))
            .err()
            .unwrap();
        assert!(matches!(err, DataError::DirNotFound(_)));
    }

    #[test]
    fn test_empty_training_split_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = synthetic_dataset(dir.path(), 0, 1, 4);
        let err = DatasetPipeline::new(config, StdRng::seed_from_u64(0))
            .err()
            .unwrap();
        assert!(matches!(err, DataError::Empty { .. }));
    }

    #[test]
    fn test_eval_stream_is_ordered_and_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let config = synthetic_dataset(dir.path(), 1, 4, 4);
        let pipeline = DatasetPipeline::new(config, StdRng::seed_from_u64(0)).unwrap();

        let run = || -> Vec<f32> {
            pipeline
                .eval_stream()
                .map(|b| first_pixel(&b.unwrap()))
                .collect()
        };
        let first = run();
        let expected: Vec<f32> = (0..4).map(|i| i as f32 / 127.5 - 1.0).collect();
        assert_eq!(first, expected);
        assert_eq!(run(), first);
    }

    #[test]
    fn test_training_stream_covers_every_sample_each_pass() {
        let dir = tempfile::tempdir().unwrap();
        let config = synthetic_dataset(dir.path(), 6, 1, 4);
        let mut pipeline = DatasetPipeline::new(config, StdRng::seed_from_u64(5)).unwrap();
        assert_eq!(pipeline.train_batches(), 6);

        for _ in 0..2 {
            let mut seen: Vec<f32> = pipeline
                .training_stream()
                .map(|b| {
                    let b = b.unwrap();
                    assert_eq!(b.image_dims(), [4, 4, 3]);
                    first_pixel(&b)
                })
                .collect();
            seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let expected: Vec<f32> = (0..6).map(|i| i as f32 / 127.5 - 1.0).collect();
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn test_training_stream_with_prefetch() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = synthetic_dataset(dir.path(), 5, 1, 4);
        config.prefetch = 2;
        config.batch_size = 2;
        let mut pipeline = DatasetPipeline::new(config, StdRng::seed_from_u64(1)).unwrap();
        let sizes: Vec<usize> = pipeline
            .training_stream()
            .map(|b| b.unwrap().len())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_seeded_pipelines_agree() {
        let dir = tempfile::tempdir().unwrap();
        let config = synthetic_dataset(dir.path(), 6, 1, 4);
        let order = |seed| -> Vec<f32> {
            let mut p = DatasetPipeline::new(config.clone(), StdRng::seed_from_u64(seed)).unwrap();
            p.training_stream().map(|b| first_pixel(&b.unwrap())).collect()
        };
        assert_eq!(order(11), order(11));
    }

    #[test]
    fn test_corrupt_sample_fails_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let config = synthetic_dataset(dir.path(), 2, 1, 4);
        fs::write(dir.path().join("train").join("zzz.png"), b"garbage").unwrap();
        let mut pipeline = DatasetPipeline::new(config, StdRng::seed_from_u64(0)).unwrap();
        let results: Vec<_> = pipeline.training_stream().collect();
        assert!(results.iter().any(|r| matches!(r, Err(DataError::Decode { .. }))));
    }
}
