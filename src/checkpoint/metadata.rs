use serde::{Deserialize, Serialize};

use crate::training::session::OptimizerSettings;
use crate::training::LossRecord;

/// Hyperparameters recorded in checkpoint metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointHyperparameters {
    pub optimizer: OptimizerSettings,
    pub l1_lambda: f64,
}

/// Top-level checkpoint metadata written to metadata.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub step: usize,
    pub epoch: usize,
    pub timestamp: u64,
    /// Losses of the last step before the save, if any step ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_losses: Option<LossRecord>,
    pub hyperparameters: CheckpointHyperparameters,
}

/// Loop counters written to training_state.json.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingState {
    /// Optimisation steps completed.
    pub step: usize,
    /// Epochs completed; a resumed run starts at this epoch index.
    pub epoch: usize,
    /// Index the next exported sample image will use.
    #[serde(default)]
    pub sample_index: usize,
    /// Base seed of the per-step dropout masks.
    #[serde(default)]
    pub dropout_seed: u64,
}
