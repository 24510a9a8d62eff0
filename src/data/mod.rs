//! Paired-image input pipeline: decoding, augmentation, normalisation,
//! shuffling and batching.

pub mod augment;
pub mod loader;
pub mod normalize;
pub mod pipeline;
pub mod sample;

pub use augment::{resize_nearest, Augmenter, Jitter};
pub use loader::{decode_pair, load_pair};
pub use normalize::{denormalize_image, normalize, normalize_image, normalize_rgb};
pub use pipeline::{list_files, Batch, BatchStream, DataConfig, DatasetPipeline, ShuffleBuffer};
pub use sample::{ImagePair, ImageTensor, PairImage, SourcePair};
