use std::path::Path;

use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{DefaultRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::checkpoint::{CheckpointHyperparameters, Checkpointable, TrainingState};
use crate::data::Batch;
use crate::error::{CheckpointError, ShapeError};
use crate::model::{Discriminator, DiscriminatorConfig, ForwardMode, Generator, GeneratorConfig};
use crate::training::loss::{check_same, discriminator_loss, generator_loss};
use crate::training::LossRecord;

const GENERATOR_FILE: &str = "generator";
const DISCRIMINATOR_FILE: &str = "discriminator";
const GEN_OPTIMIZER_FILE: &str = "gen_optimizer";
const DISC_OPTIMIZER_FILE: &str = "disc_optimizer";

pub type GenOptimizer<B> = OptimizerAdaptor<Adam, Generator<B>, B>;
pub type DiscOptimizer<B> = OptimizerAdaptor<Adam, Discriminator<B>, B>;

/// Adam hyperparameters for one network.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamSettings {
    pub learning_rate: f64,
    pub beta_1: f32,
    pub beta_2: f32,
    pub epsilon: f32,
}

impl Default for AdamSettings {
    fn default() -> Self {
        AdamSettings {
            learning_rate: 2e-4,
            beta_1: 0.5,
            beta_2: 0.999,
            epsilon: 1e-7,
        }
    }
}

impl AdamSettings {
    pub fn to_config(&self) -> AdamConfig {
        AdamConfig::new()
            .with_beta_1(self.beta_1)
            .with_beta_2(self.beta_2)
            .with_epsilon(self.epsilon)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    pub generator: AdamSettings,
    pub discriminator: AdamSettings,
}

/// Everything mutated by training: both networks, their optimizers and the
/// step/epoch counters.
pub struct TrainingSession<B: AutodiffBackend> {
    generator: Generator<B>,
    discriminator: Discriminator<B>,
    gen_optimizer: GenOptimizer<B>,
    disc_optimizer: DiscOptimizer<B>,
    settings: OptimizerSettings,
    l1_lambda: f64,
    step: usize,
    epochs_completed: usize,
    dropout_seed: u64,
    device: B::Device,
}

impl<B: AutodiffBackend> TrainingSession<B> {
    /// Build freshly initialised networks and optimizers.
    pub fn new(
        generator: &GeneratorConfig,
        discriminator: &DiscriminatorConfig,
        settings: OptimizerSettings,
        l1_lambda: f64,
        device: &B::Device,
    ) -> Result<Self, ShapeError> {
        Ok(Self::from_parts(
            generator.init(device)?,
            discriminator.init(device)?,
            settings,
            l1_lambda,
            device,
        ))
    }

    pub fn from_parts(
        generator: Generator<B>,
        discriminator: Discriminator<B>,
        settings: OptimizerSettings,
        l1_lambda: f64,
        device: &B::Device,
    ) -> Self {
        TrainingSession {
            generator,
            discriminator,
            gen_optimizer: settings.generator.to_config().init(),
            disc_optimizer: settings.discriminator.to_config().init(),
            settings,
            l1_lambda,
            step: 0,
            epochs_completed: 0,
            dropout_seed: rand::random(),
            device: device.clone(),
        }
    }

    /// Fix the base seed of the dropout masks. Step `n` always draws the same
    /// masks for a given seed, so a restored session replays an uninterrupted run.
    pub fn with_dropout_seed(mut self, seed: u64) -> Self {
        self.dropout_seed = seed;
        self
    }

    /// One joint optimisation step on an `[N, C, H, W]` input/target batch.
    ///
    /// Both networks are updated from losses of the same forward pass. The
    /// discriminator's loss on generated images is evaluated on a detached
    /// copy of the generator output, so its backward pass never reaches the
    /// generator's graph; that extra pass reads but does not update the
    /// normalisation statistics.
    pub fn train_step(
        &mut self,
        input: Tensor<B, 4>,
        target: Tensor<B, 4>,
    ) -> Result<LossRecord, ShapeError> {
        check_same("train_step input vs target", &input, &target)?;
        let mode =
            ForwardMode::training().with_dropout_seed(step_seed(self.dropout_seed, self.step));

        let gen_out = self.generator.forward(input.clone(), mode);
        let disc_real = self
            .discriminator
            .forward(input.clone(), target.clone(), mode);
        let disc_fake = self
            .discriminator
            .forward(input.clone(), gen_out.clone(), mode);
        let disc_fake_detached =
            self.discriminator
                .forward(input, gen_out.clone().detach(), mode.frozen_statistics());

        let gen_loss = generator_loss(disc_fake, gen_out, target, self.l1_lambda)?;
        let disc_loss = discriminator_loss(disc_real, disc_fake_detached)?;

        self.step += 1;
        let record = LossRecord {
            step: self.step,
            epoch: self.epochs_completed,
            gen_total_loss: scalar(&gen_loss.total),
            gen_gan_loss: scalar(&gen_loss.gan),
            gen_l1_loss: scalar(&gen_loss.l1),
            disc_loss: scalar(&disc_loss),
        };

        let gen_grads = GradientsParams::from_grads(gen_loss.total.backward(), &self.generator);
        let disc_grads = GradientsParams::from_grads(disc_loss.backward(), &self.discriminator);

        self.generator = self.gen_optimizer.step(
            self.settings.generator.learning_rate,
            self.generator.clone(),
            gen_grads,
        );
        self.discriminator = self.disc_optimizer.step(
            self.settings.discriminator.learning_rate,
            self.discriminator.clone(),
            disc_grads,
        );

        Ok(record)
    }

    pub fn train_batch(&mut self, batch: &Batch) -> Result<LossRecord, ShapeError> {
        if batch.is_empty() {
            return Err(ShapeError::EmptyBatch);
        }
        let (input, target) = batch.to_tensors::<B>(&self.device);
        self.train_step(input, target)
    }

    /// Generator output for `input` without gradient tracking.
    pub fn generate(
        &self,
        input: Tensor<B::InnerBackend, 4>,
        mode: ForwardMode,
    ) -> Tensor<B::InnerBackend, 4> {
        self.generator.valid().forward(input, mode)
    }

    pub fn generator(&self) -> &Generator<B> {
        &self.generator
    }

    pub fn discriminator(&self) -> &Discriminator<B> {
        &self.discriminator
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn epochs_completed(&self) -> usize {
        self.epochs_completed
    }

    pub fn dropout_seed(&self) -> u64 {
        self.dropout_seed
    }

    pub fn finish_epoch(&mut self) {
        self.epochs_completed += 1;
    }
}

/// Seed of the dropout masks for the step that follows `step` completed ones.
fn step_seed(base: u64, step: usize) -> u64 {
    let mut z = base ^ (step as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 30)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn scalar<B: Backend>(t: &Tensor<B, 1>) -> f32 {
    t.clone().into_scalar().elem::<f32>()
}

impl<B: AutodiffBackend> Checkpointable for TrainingSession<B> {
    fn save_weights_to_dir(&self, dir: &Path) -> Result<(), CheckpointError> {
        let recorder = DefaultRecorder::default();
        let save_err = |e: burn::record::RecorderError| CheckpointError::ModelSave(e.to_string());
        self.generator
            .clone()
            .save_file(dir.join(GENERATOR_FILE), &recorder)
            .map_err(save_err)?;
        self.discriminator
            .clone()
            .save_file(dir.join(DISCRIMINATOR_FILE), &recorder)
            .map_err(save_err)?;
        recorder
            .record(self.gen_optimizer.to_record(), dir.join(GEN_OPTIMIZER_FILE))
            .map_err(save_err)?;
        recorder
            .record(self.disc_optimizer.to_record(), dir.join(DISC_OPTIMIZER_FILE))
            .map_err(save_err)?;
        Ok(())
    }

    fn load_weights_from_dir(&mut self, dir: &Path) -> Result<(), CheckpointError> {
        let recorder = DefaultRecorder::default();
        let load_err = |e: burn::record::RecorderError| CheckpointError::ModelLoad(e.to_string());

        let record = recorder
            .load(dir.join(GENERATOR_FILE), &self.device)
            .map_err(load_err)?;
        let generator = self.generator.clone().load_record(record);
        let record = recorder
            .load(dir.join(DISCRIMINATOR_FILE), &self.device)
            .map_err(load_err)?;
        let discriminator = self.discriminator.clone().load_record(record);
        let record = recorder
            .load(dir.join(GEN_OPTIMIZER_FILE), &self.device)
            .map_err(load_err)?;
        let gen_optimizer = self.gen_optimizer.clone().load_record(record);
        let record = recorder
            .load(dir.join(DISC_OPTIMIZER_FILE), &self.device)
            .map_err(load_err)?;
        let disc_optimizer = self.disc_optimizer.clone().load_record(record);

        // all four blobs loaded; commit together
        self.generator = generator;
        self.discriminator = discriminator;
        self.gen_optimizer = gen_optimizer;
        self.disc_optimizer = disc_optimizer;
        Ok(())
    }

    fn hyperparameters(&self) -> CheckpointHyperparameters {
        CheckpointHyperparameters {
            optimizer: self.settings,
            l1_lambda: self.l1_lambda,
        }
    }

    fn restore_progress(&mut self, state: &TrainingState) {
        self.step = state.step;
        self.epochs_completed = state.epoch;
        self.dropout_seed = state.dropout_seed;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::discriminator::tests::tiny_discriminator_config;
    use crate::model::generator::tests::tiny_generator_config;
    use burn::backend::{Autodiff, NdArray};
    use burn::record::{BinBytesRecorder, FullPrecisionSettings};
    use burn::tensor::Distribution;

    pub(crate) type TestBackend = Autodiff<NdArray<f32>>;

    pub(crate) fn tiny_session(generator: GeneratorConfig) -> TrainingSession<TestBackend> {
        let device = Default::default();
        TrainingSession::new(
            &generator,
            &tiny_discriminator_config(),
            OptimizerSettings::default(),
            100.0,
            &device,
        )
        .unwrap()
    }

    /// Tiny generator without dropout, so training steps are deterministic.
    fn deterministic_generator() -> GeneratorConfig {
        let mut config = tiny_generator_config();
        for layer in &mut config.decoder {
            layer.dropout = false;
        }
        config
    }

    fn fixed_batch(seed: f32) -> (Tensor<TestBackend, 4>, Tensor<TestBackend, 4>) {
        let device = Default::default();
        let n = 3 * 16 * 16;
        let input: Vec<f32> = (0..n).map(|i| (i as f32 * 0.37 + seed).sin()).collect();
        let target: Vec<f32> = (0..n).map(|i| (i as f32 * 0.11 - seed).cos()).collect();
        (
            Tensor::from_data(TensorData::new(input, [1, 3, 16, 16]), &device),
            Tensor::from_data(TensorData::new(target, [1, 3, 16, 16]), &device),
        )
    }

    fn module_bytes<M: Module<TestBackend>>(module: &M) -> Vec<u8> {
        BinBytesRecorder::<FullPrecisionSettings>::default()
            .record(module.clone().into_record(), ())
            .unwrap()
    }

    fn inference_output(session: &TrainingSession<TestBackend>) -> Vec<f32> {
        let (input, _) = fixed_batch(9.0);
        session
            .generate(input.inner(), ForwardMode::inference())
            .into_data()
            .to_vec()
            .unwrap()
    }

    #[test]
    fn test_two_steps_change_parameters_and_stay_finite() {
        let mut session = tiny_session(tiny_generator_config());
        let gen_before = module_bytes(session.generator());
        let disc_before = module_bytes(session.discriminator());

        for seed in [0.0, 1.0] {
            let (input, target) = fixed_batch(seed);
            let record = session.train_step(input, target).unwrap();
            assert!(record.is_finite(), "non-finite losses: {record}");
            assert!(record.disc_loss >= 0.0);
            assert!(record.gen_l1_loss >= 0.0);
        }
        assert_eq!(session.step(), 2);

        assert_ne!(module_bytes(session.generator()), gen_before);
        assert_ne!(module_bytes(session.discriminator()), disc_before);
        assert!(inference_output(&session).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_loss_record_decomposes() {
        let mut session = tiny_session(tiny_generator_config());
        let (input, target) = fixed_batch(0.5);
        let r = session.train_step(input, target).unwrap();
        assert_eq!(r.step, 1);
        assert_eq!(r.epoch, 0);
        let expected = r.gen_gan_loss + 100.0 * r.gen_l1_loss;
        assert!((r.gen_total_loss - expected).abs() < 1e-3 * expected.abs().max(1.0));
    }

    #[test]
    fn test_mismatched_target_is_rejected() {
        let mut session = tiny_session(tiny_generator_config());
        let device = Default::default();
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device);
        let target = Tensor::<TestBackend, 4>::random([2, 3, 16, 16], Distribution::Default, &device);
        let err = session.train_step(input, target).unwrap_err();
        assert!(matches!(err, ShapeError::Operand { .. }), "{err}");
        assert_eq!(session.step(), 0);

        // spatial mismatch would otherwise fail inside the discriminator's concat
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device);
        let target = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 16], &device);
        assert!(matches!(
            session.train_step(input, target),
            Err(ShapeError::Operand { .. })
        ));
    }

    fn twin_sessions(
        seeds: [u64; 2],
    ) -> (TrainingSession<TestBackend>, TrainingSession<TestBackend>) {
        let device = Default::default();
        let base = tiny_session(tiny_generator_config());
        let twin = |seed| {
            TrainingSession::from_parts(
                base.generator().clone(),
                base.discriminator().clone(),
                OptimizerSettings::default(),
                100.0,
                &device,
            )
            .with_dropout_seed(seed)
        };
        (twin(seeds[0]), twin(seeds[1]))
    }

    #[test]
    fn test_dropout_seed_drives_step_masks() {
        let (input, target) = fixed_batch(0.25);

        let (mut a, mut b) = twin_sessions([5, 5]);
        let ra = a.train_step(input.clone(), target.clone()).unwrap();
        let rb = b.train_step(input.clone(), target.clone()).unwrap();
        assert!((ra.gen_total_loss - rb.gen_total_loss).abs() < 1e-6, "{ra} vs {rb}");

        let (mut a, mut b) = twin_sessions([5, 6]);
        let ra = a.train_step(input.clone(), target.clone()).unwrap();
        let rb = b.train_step(input, target).unwrap();
        assert!((ra.gen_total_loss - rb.gen_total_loss).abs() > 1e-6, "{ra} vs {rb}");
    }

    #[test]
    fn test_step_seed_differs_per_step() {
        assert_ne!(step_seed(7, 0), step_seed(7, 1));
        assert_ne!(step_seed(7, 0), step_seed(8, 0));
        assert_eq!(step_seed(7, 3), step_seed(7, 3));
    }

    #[test]
    fn test_save_restore_reproduces_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = tiny_session(deterministic_generator());
        let (input, target) = fixed_batch(0.0);
        session.train_step(input, target).unwrap();
        session.save_weights_to_dir(dir.path()).unwrap();

        let mut restored = tiny_session(deterministic_generator());
        assert_ne!(module_bytes(restored.generator()), module_bytes(session.generator()));
        restored.load_weights_from_dir(dir.path()).unwrap();

        assert_eq!(module_bytes(restored.generator()), module_bytes(session.generator()));
        assert_eq!(
            module_bytes(restored.discriminator()),
            module_bytes(session.discriminator())
        );
        assert_eq!(inference_output(&restored), inference_output(&session));
    }

    #[test]
    fn test_resumed_training_matches_uninterrupted_run() {
        let dir = tempfile::tempdir().unwrap();
        // dropout stays active in the decoder
        let mut original = tiny_session(tiny_generator_config()).with_dropout_seed(11);
        for seed in [0.0, 1.0] {
            let (input, target) = fixed_batch(seed);
            original.train_step(input, target).unwrap();
        }
        original.save_weights_to_dir(dir.path()).unwrap();
        let progress = TrainingState {
            step: original.step(),
            epoch: original.epochs_completed(),
            sample_index: 0,
            dropout_seed: original.dropout_seed(),
        };

        let mut resumed = tiny_session(tiny_generator_config());
        resumed.load_weights_from_dir(dir.path()).unwrap();
        resumed.restore_progress(&progress);
        assert_eq!(resumed.dropout_seed(), 11);

        for seed in [2.0, 3.0, 4.0] {
            let (input, target) = fixed_batch(seed);
            let a = original.train_step(input.clone(), target.clone()).unwrap();
            let b = resumed.train_step(input, target).unwrap();
            assert_eq!(a.step, b.step);
            assert!((a.gen_total_loss - b.gen_total_loss).abs() < 1e-5, "{a} vs {b}");
            assert!((a.gen_l1_loss - b.gen_l1_loss).abs() < 1e-6, "{a} vs {b}");
            assert!((a.disc_loss - b.disc_loss).abs() < 1e-5, "{a} vs {b}");
        }

        let (a, b) = (inference_output(&original), inference_output(&resumed));
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_load_from_empty_dir_fails_without_partial_update() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = tiny_session(tiny_generator_config());
        let before = module_bytes(session.generator());
        let err = session.load_weights_from_dir(dir.path()).unwrap_err();
        assert!(matches!(err, CheckpointError::ModelLoad(_)));
        assert_eq!(module_bytes(session.generator()), before);
    }
}
