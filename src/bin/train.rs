#![recursion_limit = "256"]

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::backend::wgpu::WgpuDevice;
use burn::backend::{Autodiff, Wgpu};
use burn::module::AutodiffModule;
use burn::prelude::*;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pix2pix_trainer::config::AppConfig;
use pix2pix_trainer::data::DatasetPipeline;
use pix2pix_trainer::export::{export_generator, ModelManifest};
use pix2pix_trainer::training::{JsonlMetricsSink, Trainer, TrainingSession};

type InferBackend = Wgpu<f32, i32>;
type TrainBackend = Autodiff<InferBackend>;

/// Train a pix2pix image-to-image translation model.
#[derive(Parser)]
#[command(name = "train", about = "Train a pix2pix image-to-image GAN")]
struct Cli {
    /// Path to TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the dataset root (expects train/ and test/ inside)
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// Override the total number of epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Override the learning rate of both networks
    #[arg(long)]
    lr: Option<f64>,

    /// Seed for initialisation, dropout and the data pipeline
    #[arg(long)]
    seed: Option<u64>,

    /// Start from fresh weights even if checkpoints exist
    #[arg(long)]
    no_resume: bool,

    /// Skip exporting the generator after training
    #[arg(long)]
    no_export: bool,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    dump_config: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.dump_config {
        print!("{}", AppConfig::default_toml()?);
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let mut config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    // Apply CLI overrides
    if let Some(dataset) = cli.dataset {
        config.data.dataset_root = dataset;
    }
    if let Some(epochs) = cli.epochs {
        config.training.epochs = epochs;
    }
    if let Some(lr) = cli.lr {
        config.set_learning_rate(lr);
    }
    if cli.seed.is_some() {
        config.training.seed = cli.seed;
    }
    config.validate().context("validating configuration")?;

    let device = WgpuDevice::default();
    let rng = match config.training.seed {
        Some(seed) => {
            TrainBackend::seed(seed);
            StdRng::seed_from_u64(seed)
        }
        None => StdRng::from_os_rng(),
    };

    let mut pipeline = DatasetPipeline::new(config.data.clone(), rng).with_context(|| {
        format!("opening dataset at {}", config.data.dataset_root.display())
    })?;
    info!(
        train = pipeline.train_len(),
        test = pipeline.test_len(),
        "dataset ready"
    );

    let mut session = TrainingSession::<TrainBackend>::new(
        &config.model.generator,
        &config.model.discriminator,
        config.optimizer,
        config.loss.l1_lambda,
        &device,
    )
    .context("building networks")?;
    if let Some(seed) = config.training.seed {
        session = session.with_dropout_seed(seed);
    }

    let mut trainer = Trainer::new(
        config.training.clone(),
        config.checkpoint.clone(),
        &config.output.sample_dir,
    )
    .context("preparing trainer")?;

    if cli.no_resume {
        info!("resume disabled, starting from fresh weights");
    } else if let Some(data) = trainer
        .resume(&mut session)
        .context("restoring latest checkpoint")?
    {
        info!(
            path = %data.path.display(),
            step = data.metadata.step,
            epoch = data.metadata.epoch,
            "resumed from checkpoint"
        );
    }

    let mut sink = JsonlMetricsSink::create(&config.output.log_dir)
        .with_context(|| format!("creating metrics log in {}", config.output.log_dir.display()))?;
    info!(path = %sink.path().display(), "writing scalar metrics");

    let summary = trainer
        .train(&mut session, &mut pipeline, &mut sink)
        .context("training")?;
    info!(
        epochs = summary.epochs_run,
        steps = summary.steps,
        non_finite = summary.non_finite_steps,
        "training finished"
    );
    if let Some(last) = &summary.last_losses {
        info!("final losses: {last}");
    }

    if !cli.no_export {
        let manifest = ModelManifest {
            generator: config.model.generator.clone(),
            image_height: config.data.image_height,
            image_width: config.data.image_width,
            step: session.step(),
        };
        export_generator(
            &session.generator().valid(),
            &manifest,
            &config.output.export_dir,
        )
        .with_context(|| format!("exporting to {}", config.output.export_dir.display()))?;
    }

    Ok(())
}
