use std::path::PathBuf;

use crate::training::LossRecord;

/// Dimension mismatches between tensors that must agree.
#[derive(Debug, thiserror::Error)]
pub enum ShapeError {
    #[error("input/target shape mismatch: input {input:?}, target {target:?}")]
    PairMismatch { input: [usize; 3], target: [usize; 3] },

    #[error("batch images must share one shape: expected {expected:?}, found {actual:?}")]
    BatchMismatch {
        expected: [usize; 3],
        actual: [usize; 3],
    },

    #[error("image {actual:?} is smaller than the requested crop {crop:?}")]
    CropTooLarge { actual: [usize; 2], crop: [usize; 2] },

    #[error("image buffer for {dims:?} needs {expected} values, got {actual}")]
    BufferLength {
        dims: [usize; 3],
        expected: usize,
        actual: usize,
    },

    #[error("expected {expected} channels, found {actual}")]
    Channels { expected: usize, actual: usize },

    #[error("{what}: operand shapes differ ({left:?} vs {right:?})")]
    Operand {
        what: &'static str,
        left: Vec<usize>,
        right: Vec<usize>,
    },

    #[error("batch is empty")]
    EmptyBatch,

    #[error("invalid network layout: {0}")]
    Layout(String),
}

/// Errors raised while reading or preparing training data.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("dataset directory not found: {0}")]
    DirNotFound(PathBuf),

    #[error("no '*.{extension}' files found in {dir}")]
    Empty { dir: PathBuf, extension: String },

    #[error("failed to decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("paired image {path} has width {width}, too narrow to split")]
    TooNarrow { path: PathBuf, width: u32 },

    #[error("data loading worker stopped unexpectedly")]
    WorkerDisconnected,

    #[error("shape error: {0}")]
    Shape(#[from] ShapeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint directory not found: {0}")]
    DirNotFound(PathBuf),

    #[error("LATEST points at missing checkpoint {0}")]
    DanglingLatest(PathBuf),

    #[error("failed to read metadata from {path}: {source}")]
    MetadataRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse metadata from {path}: {source}")]
    MetadataParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to save model: {0}")]
    ModelSave(String),

    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by a metrics sink.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur during training.
#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("numeric divergence at step {step}: {record}")]
    NumericDivergence { step: usize, record: LossRecord },

    #[error("failed to write sample image {path}: {source}")]
    SampleWrite {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("shape error: {0}")]
    Shape(#[from] ShapeError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_error_display() {
        let err = ShapeError::PairMismatch {
            input: [4, 2, 3],
            target: [4, 3, 3],
        };
        assert_eq!(
            err.to_string(),
            "input/target shape mismatch: input [4, 2, 3], target [4, 3, 3]"
        );
    }

    #[test]
    fn test_data_error_wraps_shape_error() {
        let err: DataError = ShapeError::EmptyBatch.into();
        assert_eq!(err.to_string(), "shape error: batch is empty");
    }

    #[test]
    fn test_training_error_display() {
        let record = LossRecord {
            step: 7,
            epoch: 1,
            gen_total_loss: f32::NAN,
            gen_gan_loss: 0.7,
            gen_l1_loss: 0.2,
            disc_loss: 1.3,
        };
        let err = TrainingError::NumericDivergence { step: 7, record };
        assert!(err.to_string().starts_with("numeric divergence at step 7"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Validation("loss.l1_lambda must be >= 0".to_string());
        assert_eq!(
            err.to_string(),
            "config validation error: loss.l1_lambda must be >= 0"
        );
    }
}
