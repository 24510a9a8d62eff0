mod manager;
mod metadata;

use std::path::Path;

use crate::error::CheckpointError;

pub use manager::{CheckpointData, CheckpointManager, CheckpointManagerConfig};
pub use metadata::{CheckpointHyperparameters, CheckpointMetadata, TrainingState};

/// State that the checkpoint manager can persist and restore.
pub trait Checkpointable {
    /// Write all parameter and optimizer blobs into `dir`.
    fn save_weights_to_dir(&self, dir: &Path) -> Result<(), CheckpointError>;

    fn load_weights_from_dir(&mut self, dir: &Path) -> Result<(), CheckpointError>;

    fn hyperparameters(&self) -> CheckpointHyperparameters;

    /// Apply the step and epoch counters of a restored checkpoint.
    fn restore_progress(&mut self, state: &TrainingState);
}
