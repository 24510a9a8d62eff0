//! Final generator export for downstream inference.
//!
//! Two bundles are written under the export directory:
//! `saved_model/` (named MessagePack weights plus a `model.json` manifest
//! describing how to rebuild the network) and a single-file `generator.bin`.

use std::fs;
use std::path::{Path, PathBuf};

use burn::prelude::*;
use burn::record::{BinFileRecorder, DefaultRecorder, FullPrecisionSettings};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CheckpointError;
use crate::model::{Generator, GeneratorConfig};

pub const SAVED_MODEL_DIR: &str = "saved_model";
const MANIFEST_FILE: &str = "model.json";
const WEIGHTS_FILE: &str = "generator";

/// Contents of `saved_model/model.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub generator: GeneratorConfig,
    pub image_height: usize,
    pub image_width: usize,
    /// Training step the weights were taken from.
    pub step: usize,
}

/// Locations written by [`export_generator`].
#[derive(Debug, Clone)]
pub struct ExportPaths {
    pub saved_model: PathBuf,
    pub single_file: PathBuf,
}

pub fn export_generator<B: Backend>(
    generator: &Generator<B>,
    manifest: &ModelManifest,
    export_dir: &Path,
) -> Result<ExportPaths, CheckpointError> {
    let saved_model = export_dir.join(SAVED_MODEL_DIR);
    fs::create_dir_all(&saved_model)?;

    generator
        .clone()
        .save_file(saved_model.join(WEIGHTS_FILE), &DefaultRecorder::default())
        .map_err(|e| CheckpointError::ModelSave(e.to_string()))?;
    fs::write(
        saved_model.join(MANIFEST_FILE),
        serde_json::to_string_pretty(manifest)?,
    )?;

    generator
        .clone()
        .save_file(
            export_dir.join(WEIGHTS_FILE),
            &BinFileRecorder::<FullPrecisionSettings>::default(),
        )
        .map_err(|e| CheckpointError::ModelSave(e.to_string()))?;

    let paths = ExportPaths {
        saved_model,
        single_file: export_dir.join(format!("{WEIGHTS_FILE}.bin")),
    };
    info!(
        saved_model = %paths.saved_model.display(),
        single_file = %paths.single_file.display(),
        "generator exported"
    );
    Ok(paths)
}

/// Rebuild a generator from a `saved_model/` directory.
pub fn load_saved_model<B: Backend>(
    dir: &Path,
    device: &B::Device,
) -> Result<(Generator<B>, ModelManifest), CheckpointError> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let json = fs::read_to_string(&manifest_path).map_err(|e| CheckpointError::MetadataRead {
        path: manifest_path.clone(),
        source: e,
    })?;
    let manifest: ModelManifest =
        serde_json::from_str(&json).map_err(|e| CheckpointError::MetadataParse {
            path: manifest_path,
            source: e,
        })?;
    let generator = manifest
        .generator
        .init::<B>(device)
        .map_err(|e| CheckpointError::ModelLoad(e.to_string()))?
        .load_file(dir.join(WEIGHTS_FILE), &DefaultRecorder::default(), device)
        .map_err(|e| CheckpointError::ModelLoad(e.to_string()))?;
    Ok((generator, manifest))
}

/// Load a single-file `generator.bin` bundle into a network built from `config`.
pub fn load_single_file<B: Backend>(
    path: &Path,
    config: &GeneratorConfig,
    device: &B::Device,
) -> Result<Generator<B>, CheckpointError> {
    config
        .init::<B>(device)
        .map_err(|e| CheckpointError::ModelLoad(e.to_string()))?
        .load_file(
            path.to_path_buf(),
            &BinFileRecorder::<FullPrecisionSettings>::default(),
            device,
        )
        .map_err(|e| CheckpointError::ModelLoad(e.to_string()))
}
