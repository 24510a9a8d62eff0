use std::collections::VecDeque;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::MetricsError;

/// Host-side loss values of one training step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossRecord {
    /// Global step, counted from the start of the first run.
    pub step: usize,
    pub epoch: usize,
    pub gen_total_loss: f32,
    pub gen_gan_loss: f32,
    pub gen_l1_loss: f32,
    pub disc_loss: f32,
}

impl LossRecord {
    pub fn scalars(&self) -> [(&'static str, f32); 4] {
        [
            ("gen_total_loss", self.gen_total_loss),
            ("gen_gan_loss", self.gen_gan_loss),
            ("gen_l1_loss", self.gen_l1_loss),
            ("disc_loss", self.disc_loss),
        ]
    }

    pub fn is_finite(&self) -> bool {
        self.scalars().iter().all(|(_, v)| v.is_finite())
    }
}

impl fmt::Display for LossRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gen_total {:.4} | gen_gan {:.4} | gen_l1 {:.4} | disc {:.4}",
            self.gen_total_loss, self.gen_gan_loss, self.gen_l1_loss, self.disc_loss
        )
    }
}

/// Receiver of scalar time series.
pub trait MetricsSink {
    fn record_scalar(&mut self, name: &str, value: f32, step: usize) -> Result<(), MetricsError>;

    /// Record every loss of `record` at `record.step`.
    fn record_losses(&mut self, record: &LossRecord) -> Result<(), MetricsError> {
        for (name, value) in record.scalars() {
            self.record_scalar(name, value, record.step)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MetricsError> {
        Ok(())
    }
}

#[derive(Serialize)]
struct ScalarEvent<'a> {
    name: &'a str,
    value: f32,
    step: usize,
    wall_time: f64,
}

/// Appends one JSON object per scalar to a `.jsonl` file.
pub struct JsonlMetricsSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlMetricsSink {
    /// Open a new run under `{log_dir}/fit/{unix_seconds}/scalars.jsonl`.
    pub fn create(log_dir: &Path) -> Result<Self, MetricsError> {
        let run = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self::open(
            log_dir
                .join("fit")
                .join(run.to_string())
                .join("scalars.jsonl"),
        )
    }

    pub fn open(path: PathBuf) -> Result<Self, MetricsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(JsonlMetricsSink {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for JsonlMetricsSink {
    fn record_scalar(&mut self, name: &str, value: f32, step: usize) -> Result<(), MetricsError> {
        let wall_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let event = ScalarEvent {
            name,
            value,
            step,
            wall_time,
        };
        serde_json::to_writer(&mut self.writer, &event)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MetricsError> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for JsonlMetricsSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Keeps every scalar in memory.
#[derive(Debug, Default)]
pub struct MemoryMetricsSink {
    pub events: Vec<(String, f32, usize)>,
}

impl MemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(step, value)` pairs recorded under `name`, in arrival order.
    pub fn series(&self, name: &str) -> Vec<(usize, f32)> {
        self.events
            .iter()
            .filter(|(n, _, _)| n == name)
            .map(|&(_, v, s)| (s, v))
            .collect()
    }
}

impl MetricsSink for MemoryMetricsSink {
    fn record_scalar(&mut self, name: &str, value: f32, step: usize) -> Result<(), MetricsError> {
        self.events.push((name.to_string(), value, step));
        Ok(())
    }
}

/// Averages over a window of loss records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossSummary {
    pub gen_total_loss: f32,
    pub gen_gan_loss: f32,
    pub gen_l1_loss: f32,
    pub disc_loss: f32,
}

impl fmt::Display for LossSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gen_total {:.4} | gen_gan {:.4} | gen_l1 {:.4} | disc {:.4}",
            self.gen_total_loss, self.gen_gan_loss, self.gen_l1_loss, self.disc_loss
        )
    }
}

/// Training metrics tracker with rolling window computations.
pub struct TrainingMetrics {
    records: VecDeque<LossRecord>,
    capacity: usize,
    total_steps: usize,     // lifetime count, never capped
    non_finite_steps: usize,
}

impl TrainingMetrics {
    pub fn with_capacity(capacity: usize) -> Self {
        TrainingMetrics {
            records: VecDeque::with_capacity(capacity),
            capacity,
            total_steps: 0,
            non_finite_steps: 0,
        }
    }

    pub fn new() -> Self {
        Self::with_capacity(100)
    }

    pub fn record(&mut self, record: LossRecord) {
        self.total_steps += 1;
        if !record.is_finite() {
            self.non_finite_steps += 1;
        }
        self.records.push_back(record);
        if self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    /// Mean of each loss over the last N finite records.
    pub fn average(&self, last_n: usize) -> Option<LossSummary> {
        let window: Vec<&LossRecord> = self
            .records
            .iter()
            .rev()
            .take(last_n)
            .filter(|r| r.is_finite())
            .collect();
        if window.is_empty() {
            return None;
        }
        let n = window.len() as f32;
        let mean = |get: fn(&LossRecord) -> f32| window.iter().map(|r| get(r)).sum::<f32>() / n;
        Some(LossSummary {
            gen_total_loss: mean(|r| r.gen_total_loss),
            gen_gan_loss: mean(|r| r.gen_gan_loss),
            gen_l1_loss: mean(|r| r.gen_l1_loss),
            disc_loss: mean(|r| r.disc_loss),
        })
    }

    pub fn last(&self) -> Option<&LossRecord> {
        self.records.back()
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn non_finite_steps(&self) -> usize {
        self.non_finite_steps
    }
}

impl Default for TrainingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-step timing tracker for the training loop.
pub struct TimingMetrics {
    step_micros: VecDeque<u64>,
    capacity: usize,
    window_start: Instant,
    window_count: usize,
    window_overhead_micros: u128, // sample export / checkpoint time excluded from throughput
}

impl TimingMetrics {
    pub fn with_capacity(capacity: usize) -> Self {
        TimingMetrics {
            step_micros: VecDeque::with_capacity(capacity),
            capacity,
            window_start: Instant::now(),
            window_count: 0,
            window_overhead_micros: 0,
        }
    }

    pub fn new() -> Self {
        Self::with_capacity(100)
    }

    pub fn record_step_time(&mut self, d: Duration) {
        self.step_micros.push_back(d.as_micros() as u64);
        if self.step_micros.len() > self.capacity {
            self.step_micros.pop_front();
        }
        self.window_count += 1;
    }

    /// Record time spent outside training steps so it is excluded from the
    /// throughput window.
    pub fn record_overhead(&mut self, d: Duration) {
        self.window_overhead_micros += d.as_micros();
    }

    /// Mean of the last `last_n` step times in milliseconds.
    pub fn avg_step_ms(&self, last_n: usize) -> f32 {
        let n = self.step_micros.len().min(last_n);
        if n == 0 {
            return 0.0;
        }
        let mean = self
            .step_micros
            .iter()
            .rev()
            .take(n)
            .map(|&v| v as f64)
            .sum::<f64>()
            / n as f64;
        (mean / 1000.0) as f32
    }

    /// Steps per second since the last `reset_window` call.
    pub fn steps_per_sec(&self) -> f32 {
        let total_micros = self.window_start.elapsed().as_micros();
        let net_micros = total_micros.saturating_sub(self.window_overhead_micros);
        if net_micros == 0 {
            return 0.0;
        }
        self.window_count as f32 / (net_micros as f32 / 1_000_000.0)
    }

    pub fn reset_window(&mut self) {
        self.window_start = Instant::now();
        self.window_count = 0;
        self.window_overhead_micros = 0;
    }
}

impl Default for TimingMetrics {
    fn default() -> Self {
        Self::new()
    }
}
