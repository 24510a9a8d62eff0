//! Training infrastructure: losses, the joint optimisation step, the epoch
//! loop, metrics collection and sample previews.

pub mod loss;
pub mod metrics;
pub mod session;
pub mod trainer;
pub mod visualize;

pub use metrics::{JsonlMetricsSink, LossRecord, MemoryMetricsSink, MetricsSink};
pub use session::{AdamSettings, OptimizerSettings, TrainingSession};
pub use trainer::{Trainer, TrainerConfig, TrainingSummary};
