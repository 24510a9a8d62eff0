use std::path::{Path, PathBuf};

use tracing::warn;

use crate::checkpoint::CheckpointManagerConfig;
use crate::data::DataConfig;
use crate::error::ConfigError;
use crate::model::{DiscriminatorConfig, GeneratorConfig};
use crate::training::session::{AdamSettings, OptimizerSettings};
use crate::training::TrainerConfig;

/// Network layouts.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub generator: GeneratorConfig,
    pub discriminator: DiscriminatorConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LossConfig {
    /// Weight of the L1 reconstruction term in the generator objective.
    pub l1_lambda: f64,
}

impl Default for LossConfig {
    fn default() -> Self {
        LossConfig { l1_lambda: 100.0 }
    }
}

/// Where previews, metrics and the exported model go.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub sample_dir: PathBuf,
    pub log_dir: PathBuf,
    pub export_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            sample_dir: PathBuf::from("output"),
            log_dir: PathBuf::from("logs"),
            export_dir: PathBuf::from("export"),
        }
    }
}

/// Top-level application configuration, loadable from TOML.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub loss: LossConfig,
    pub optimizer: OptimizerSettings,
    pub training: TrainerConfig,
    pub checkpoint: CheckpointManagerConfig,
    pub output: OutputConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the file
    /// does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            warn!("config file '{}' not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Set both networks' learning rate.
    pub fn set_learning_rate(&mut self, lr: f64) {
        self.optimizer.generator.learning_rate = lr;
        self.optimizer.discriminator.learning_rate = lr;
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let data = &self.data;
        if data.batch_size == 0 {
            return Err(ConfigError::Validation("data.batch_size must be > 0".into()));
        }
        if data.buffer_size == 0 {
            return Err(ConfigError::Validation("data.buffer_size must be > 0".into()));
        }
        if data.image_height == 0 || data.image_width == 0 {
            return Err(ConfigError::Validation(
                "data.image_height and data.image_width must be > 0".into(),
            ));
        }
        if !(data.jitter_scale >= 1.0) {
            return Err(ConfigError::Validation(
                "data.jitter_scale must be >= 1".into(),
            ));
        }
        if data.file_extension.is_empty() {
            return Err(ConfigError::Validation(
                "data.file_extension must not be empty".into(),
            ));
        }

        self.model
            .generator
            .validate(data.image_height, data.image_width)
            .map_err(|e| ConfigError::Validation(format!("model.generator: {e}")))?;
        self.model
            .discriminator
            .validate(data.image_height, data.image_width)
            .map_err(|e| ConfigError::Validation(format!("model.discriminator: {e}")))?;
        if self.model.discriminator.image_channels != self.model.generator.output_channels {
            return Err(ConfigError::Validation(
                "model.discriminator.image_channels must equal model.generator.output_channels"
                    .into(),
            ));
        }
        if self.model.generator.input_channels != 3 || self.model.generator.output_channels != 3 {
            return Err(ConfigError::Validation(
                "the RGB data pipeline needs 3 input and 3 output channels".into(),
            ));
        }

        if !(self.loss.l1_lambda >= 0.0) {
            return Err(ConfigError::Validation("loss.l1_lambda must be >= 0".into()));
        }

        for (name, adam) in [
            ("generator", &self.optimizer.generator),
            ("discriminator", &self.optimizer.discriminator),
        ] {
            validate_adam(name, adam)?;
        }

        if self.training.epochs == 0 {
            return Err(ConfigError::Validation("training.epochs must be > 0".into()));
        }
        if self.training.checkpoint_interval == 0 {
            return Err(ConfigError::Validation(
                "training.checkpoint_interval must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a TOML string with all default values (useful for creating
    /// example config files).
    pub fn default_toml() -> Result<String, ConfigError> {
        toml::to_string_pretty(&AppConfig::default())
            .map_err(|e| ConfigError::Validation(format!("serializing defaults: {e}")))
    }
}

fn validate_adam(name: &str, adam: &AdamSettings) -> Result<(), ConfigError> {
    if !(adam.learning_rate > 0.0) {
        return Err(ConfigError::Validation(format!(
            "optimizer.{name}.learning_rate must be > 0"
        )));
    }
    if !(0.0..1.0).contains(&adam.beta_1) || !(0.0..1.0).contains(&adam.beta_2) {
        return Err(ConfigError::Validation(format!(
            "optimizer.{name} betas must be in [0, 1)"
        )));
    }
    if !(adam.epsilon > 0.0) {
        return Err(ConfigError::Validation(format!(
            "optimizer.{name}.epsilon must be > 0"
        )));
    }
    Ok(())
}
