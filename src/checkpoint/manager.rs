use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::checkpoint::metadata::{CheckpointMetadata, TrainingState};
use crate::checkpoint::Checkpointable;
use crate::error::CheckpointError;
use crate::training::LossRecord;

const DIR_PREFIX: &str = "ckpt-";
const LATEST_FILE: &str = "LATEST";
const METADATA_FILE: &str = "metadata.json";
const TRAINING_STATE_FILE: &str = "training_state.json";

/// Configuration for the checkpoint manager.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CheckpointManagerConfig {
    pub checkpoint_dir: PathBuf,
    /// Checkpoints to retain after each save; 0 keeps all of them.
    pub keep_last_n: usize,
}

impl Default for CheckpointManagerConfig {
    fn default() -> Self {
        CheckpointManagerConfig {
            checkpoint_dir: PathBuf::from("checkpoints"),
            keep_last_n: 0,
        }
    }
}

/// A checkpoint found on disk.
#[derive(Debug, Clone)]
pub struct CheckpointData {
    pub path: PathBuf,
    pub metadata: CheckpointMetadata,
    pub training_state: TrainingState,
}

/// Manages saving, restoring, listing, and pruning checkpoints.
pub struct CheckpointManager {
    config: CheckpointManagerConfig,
}

impl CheckpointManager {
    pub fn new(config: CheckpointManagerConfig) -> Self {
        CheckpointManager { config }
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.config.checkpoint_dir
    }

    /// Write a new checkpoint named after `state.step` and point `LATEST` at it.
    pub fn save(
        &self,
        source: &dyn Checkpointable,
        state: &TrainingState,
        last_losses: Option<LossRecord>,
    ) -> Result<PathBuf, CheckpointError> {
        let dir_name = format!("{DIR_PREFIX}{:08}", state.step);
        let final_dir = self.config.checkpoint_dir.join(&dir_name);
        if final_dir.exists() {
            // same step, same parameters
            debug!(path = %final_dir.display(), "checkpoint for this step already exists");
            return Ok(final_dir);
        }
        let tmp_dir = self.config.checkpoint_dir.join(format!("{dir_name}.tmp"));
        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)?;
        }
        fs::create_dir_all(&tmp_dir)?;

        source.save_weights_to_dir(&tmp_dir)?;

        fs::write(
            tmp_dir.join(TRAINING_STATE_FILE),
            serde_json::to_string_pretty(state)?,
        )?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let metadata = CheckpointMetadata {
            step: state.step,
            epoch: state.epoch,
            timestamp,
            last_losses,
            hyperparameters: source.hyperparameters(),
        };
        fs::write(
            tmp_dir.join(METADATA_FILE),
            serde_json::to_string_pretty(&metadata)?,
        )?;

        fs::rename(&tmp_dir, &final_dir)?;
        self.write_latest(&dir_name)?;
        info!(path = %final_dir.display(), step = state.step, epoch = state.epoch, "checkpoint saved");

        self.prune_old_checkpoints()?;
        Ok(final_dir)
    }

    /// Read metadata and counters of the checkpoint at `dir`.
    pub fn load_checkpoint(&self, dir: &Path) -> Result<CheckpointData, CheckpointError> {
        let metadata: CheckpointMetadata = read_json(&dir.join(METADATA_FILE))?;
        let training_state: TrainingState = read_json(&dir.join(TRAINING_STATE_FILE))?;
        Ok(CheckpointData {
            path: dir.to_path_buf(),
            metadata,
            training_state,
        })
    }

    /// Directory of the newest checkpoint, or `None` on a cold start.
    ///
    /// Follows the `LATEST` pointer when present, otherwise picks the
    /// highest-step checkpoint.
    pub fn latest_checkpoint_dir(&self) -> Result<Option<PathBuf>, CheckpointError> {
        if !self.config.checkpoint_dir.is_dir() {
            return Ok(None);
        }
        let pointer = self.config.checkpoint_dir.join(LATEST_FILE);
        if pointer.is_file() {
            let name = fs::read_to_string(&pointer)?;
            let target = self.config.checkpoint_dir.join(name.trim());
            if !target.is_dir() {
                return Err(CheckpointError::DanglingLatest(target));
            }
            return Ok(Some(target));
        }
        let checkpoints = self.list_checkpoints()?;
        if let Some((path, _)) = checkpoints.last() {
            warn!(path = %path.display(), "no LATEST pointer, using highest-step checkpoint");
        }
        Ok(checkpoints.into_iter().last().map(|(path, _)| path))
    }

    /// Load the newest checkpoint into `target`. Returns `None`, leaving
    /// `target` untouched, when no checkpoint exists.
    pub fn restore_latest(
        &self,
        target: &mut dyn Checkpointable,
    ) -> Result<Option<CheckpointData>, CheckpointError> {
        let Some(dir) = self.latest_checkpoint_dir()? else {
            info!(dir = %self.config.checkpoint_dir.display(), "no checkpoint found, starting fresh");
            return Ok(None);
        };
        let data = self.load_checkpoint(&dir)?;
        target.load_weights_from_dir(&dir)?;
        target.restore_progress(&data.training_state);
        info!(
            path = %dir.display(),
            step = data.training_state.step,
            epoch = data.training_state.epoch,
            "restored checkpoint"
        );
        Ok(Some(data))
    }

    /// List all checkpoints sorted by step (ascending).
    pub fn list_checkpoints(
        &self,
    ) -> Result<Vec<(PathBuf, CheckpointMetadata)>, CheckpointError> {
        if !self.config.checkpoint_dir.is_dir() {
            return Err(CheckpointError::DirNotFound(
                self.config.checkpoint_dir.clone(),
            ));
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(&self.config.checkpoint_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if !name_str.starts_with(DIR_PREFIX) || name_str.ends_with(".tmp") {
                continue;
            }
            let meta_path = path.join(METADATA_FILE);
            if meta_path.exists() {
                let metadata: CheckpointMetadata = read_json(&meta_path)?;
                results.push((path, metadata));
            }
        }
        results.sort_by_key(|(_, m)| m.step);
        Ok(results)
    }

    /// Delete all but the newest `keep_last_n` checkpoints.
    fn prune_old_checkpoints(&self) -> Result<(), CheckpointError> {
        if self.config.keep_last_n == 0 {
            return Ok(());
        }
        let checkpoints = self.list_checkpoints()?;
        let excess = checkpoints.len().saturating_sub(self.config.keep_last_n);
        for (path, _) in checkpoints.iter().take(excess) {
            debug!(path = %path.display(), "pruning checkpoint");
            fs::remove_dir_all(path)?;
        }
        Ok(())
    }

    /// Point `LATEST` at `dir_name`, replacing the old pointer in one rename.
    fn write_latest(&self, dir_name: &str) -> Result<(), CheckpointError> {
        let tmp = self.config.checkpoint_dir.join(format!("{LATEST_FILE}.tmp"));
        fs::write(&tmp, dir_name)?;
        fs::rename(&tmp, self.config.checkpoint_dir.join(LATEST_FILE))?;
        Ok(())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CheckpointError> {
    let json = fs::read_to_string(path).map_err(|e| CheckpointError::MetadataRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&json).map_err(|e| CheckpointError::MetadataParse {
        path: path.to_path_buf(),
        source: e,
    })
}
