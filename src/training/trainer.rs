use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checkpoint::{
    CheckpointData, CheckpointManager, CheckpointManagerConfig, TrainingState,
};
use crate::data::DatasetPipeline;
use crate::error::TrainingError;
use crate::model::ForwardMode;
use crate::training::metrics::{MetricsSink, TimingMetrics, TrainingMetrics};
use crate::training::session::TrainingSession;
use crate::training::visualize::{images_from_tensor, SampleWriter};
use crate::training::LossRecord;

/// Trainer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub epochs: usize,
    /// Save a checkpoint every N completed epochs (and after the last one).
    pub checkpoint_interval: usize,
    /// Log a progress line every N steps; 0 disables progress lines.
    pub progress_interval: usize,
    /// Stop with an error on the first non-finite loss instead of warning.
    pub abort_on_divergence: bool,
    /// Seed for parameter initialisation, dropout, augmentation and shuffling.
    /// Unseeded runs draw from the OS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        TrainerConfig {
            epochs: 60,
            checkpoint_interval: 5,
            progress_interval: 100,
            abort_on_divergence: false,
            seed: None,
        }
    }
}

/// Outcome of a [`Trainer::train`] call.
#[derive(Debug, Clone, Default)]
pub struct TrainingSummary {
    pub epochs_run: usize,
    pub steps: usize,
    pub last_losses: Option<LossRecord>,
    pub non_finite_steps: usize,
    pub last_checkpoint: Option<PathBuf>,
}

/// Epoch loop around a [`TrainingSession`]: sample previews, training
/// steps, metrics and periodic checkpoints.
pub struct Trainer {
    config: TrainerConfig,
    checkpoint_manager: CheckpointManager,
    samples: SampleWriter,
}

impl Trainer {
    pub fn new(
        config: TrainerConfig,
        checkpoint: CheckpointManagerConfig,
        sample_dir: &Path,
    ) -> Result<Self, TrainingError> {
        Ok(Trainer {
            config,
            checkpoint_manager: CheckpointManager::new(checkpoint),
            samples: SampleWriter::new(sample_dir)?,
        })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn checkpoint_manager(&self) -> &CheckpointManager {
        &self.checkpoint_manager
    }

    /// Load the newest checkpoint into `session`, if there is one.
    pub fn resume<B: AutodiffBackend>(
        &mut self,
        session: &mut TrainingSession<B>,
    ) -> Result<Option<CheckpointData>, TrainingError> {
        let restored = self.checkpoint_manager.restore_latest(session)?;
        if let Some(data) = &restored {
            self.samples.advance_to(data.training_state.sample_index);
        }
        Ok(restored)
    }

    /// Run the remaining epochs of the configured total.
    ///
    /// A preview is written once before the first epoch and again at the start
    /// of every epoch.
    pub fn train<B: AutodiffBackend>(
        &mut self,
        session: &mut TrainingSession<B>,
        pipeline: &mut DatasetPipeline,
        sink: &mut dyn MetricsSink,
    ) -> Result<TrainingSummary, TrainingError> {
        let start_epoch = session.epochs_completed();
        let end_epoch = self.config.epochs;
        let mut summary = TrainingSummary::default();
        if start_epoch >= end_epoch {
            info!(
                completed = start_epoch,
                epochs = end_epoch,
                "all epochs already completed"
            );
            return Ok(summary);
        }

        info!(
            "Starting training for epochs {}..{} ({} batches per epoch, step {})",
            start_epoch + 1,
            end_epoch,
            pipeline.train_batches(),
            session.step()
        );

        let mut metrics = TrainingMetrics::with_capacity(self.config.progress_interval.max(1));
        let mut timing = TimingMetrics::new();

        // baseline preview of the untrained (or just restored) generator
        self.export_sample(session, pipeline)?;

        for epoch in start_epoch..end_epoch {
            let epoch_start = Instant::now();

            let overhead = Instant::now();
            self.export_sample(session, pipeline)?;
            timing.record_overhead(overhead.elapsed());

            let mut epoch_metrics = TrainingMetrics::with_capacity(pipeline.train_batches());
            for batch in pipeline.training_stream() {
                let batch = batch?;
                let step_start = Instant::now();
                let record = session.train_batch(&batch)?;
                timing.record_step_time(step_start.elapsed());

                sink.record_losses(&record)?;
                metrics.record(record);
                epoch_metrics.record(record);

                if !record.is_finite() {
                    warn!(step = record.step, epoch, "non-finite loss: {record}");
                    if self.config.abort_on_divergence {
                        sink.flush()?;
                        return Err(TrainingError::NumericDivergence {
                            step: record.step,
                            record,
                        });
                    }
                }

                let interval = self.config.progress_interval;
                if interval > 0 && record.step % interval == 0 {
                    match metrics.average(interval) {
                        Some(avg) => info!(
                            "Epoch {}/{} | step {} | {:.2} steps/s | {}",
                            epoch + 1,
                            end_epoch,
                            record.step,
                            timing.steps_per_sec(),
                            avg
                        ),
                        None => info!(
                            "Epoch {}/{} | step {} | no finite losses in window",
                            epoch + 1,
                            end_epoch,
                            record.step
                        ),
                    }
                    timing.reset_window();
                }
            }

            session.finish_epoch();
            sink.flush()?;
            summary.epochs_run += 1;

            let completed = session.epochs_completed();
            let mean = epoch_metrics
                .average(usize::MAX)
                .map(|avg| avg.to_string())
                .unwrap_or_else(|| "no finite losses".to_string());
            info!(
                "Epoch {}/{} done in {:.1}s | {} steps | avg step {:.1}ms | {}",
                completed,
                end_epoch,
                epoch_start.elapsed().as_secs_f32(),
                epoch_metrics.total_steps(),
                timing.avg_step_ms(usize::MAX),
                mean
            );

            let interval = self.config.checkpoint_interval;
            let periodic = interval > 0 && completed % interval == 0;
            if periodic || completed == end_epoch {
                let overhead = Instant::now();
                let path = self.save_checkpoint(session, metrics.last().copied())?;
                summary.last_checkpoint = Some(path);
                timing.record_overhead(overhead.elapsed());
            }
        }

        summary.steps = metrics.total_steps();
        summary.last_losses = metrics.last().copied();
        summary.non_finite_steps = metrics.non_finite_steps();
        info!(
            "Training complete. {} epochs, {} steps this run, {} non-finite",
            summary.epochs_run, summary.steps, summary.non_finite_steps
        );
        Ok(summary)
    }

    /// Checkpoint `session` with the current loop counters.
    pub fn save_checkpoint<B: AutodiffBackend>(
        &self,
        session: &TrainingSession<B>,
        last_losses: Option<LossRecord>,
    ) -> Result<PathBuf, TrainingError> {
        let state = TrainingState {
            step: session.step(),
            epoch: session.epochs_completed(),
            sample_index: self.samples.next_index(),
            dropout_seed: session.dropout_seed(),
        };
        Ok(self.checkpoint_manager.save(session, &state, last_losses)?)
    }

    /// Render the first evaluation pair through the generator and write an
    /// input | target | prediction preview. Skipped when the test split is empty.
    pub fn export_sample<B: AutodiffBackend>(
        &mut self,
        session: &TrainingSession<B>,
        pipeline: &DatasetPipeline,
    ) -> Result<Option<PathBuf>, TrainingError> {
        let Some(batch) = pipeline.eval_stream().next().transpose()? else {
            debug!("no evaluation samples, skipping preview");
            return Ok(None);
        };
        let (input, target) = batch.to_tensors::<B::InnerBackend>(session.device());
        let prediction = session.generate(input.clone(), ForwardMode::visualization());

        let inputs = images_from_tensor(input)?;
        let targets = images_from_tensor(target)?;
        let predictions = images_from_tensor(prediction)?;
        match (inputs.first(), targets.first(), predictions.first()) {
            (Some(input), Some(target), Some(prediction)) => {
                Ok(Some(self.samples.write(input, target, prediction)?))
            }
            _ => Ok(None),
        }
    }
}
