//! Configuration of [`Trainer`](super::Trainer).
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`Trainer`](super::Trainer).
///
/// Training proceeds in epochs. Each epoch alternates a collection phase and
/// a learning phase, never overlapping them.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct TrainerConfig {
    /// The number of epochs.
    pub epochs: usize,

    /// Epoch from which gradient updates are performed.
    pub start_learning_at_epoch: usize,

    /// Epoch from which new training data is collected.
    pub start_collecting_at_epoch: usize,

    /// Environment steps per epoch.
    pub train_timesteps_per_epoch: usize,

    /// Gradient updates per epoch.
    pub train_grad_updates_per_epoch: usize,

    /// Interval of evaluation in epochs.
    pub val_interval: usize,

    /// Number of loss evaluations on validation trajectories in an epoch
    /// with evaluation.
    #[serde(default = "default_val_checks_per_epoch")]
    pub val_checks_per_epoch: usize,

    /// Interval of recording update statistics in gradient updates.
    pub log_interval: usize,

    /// Interval of saving checkpoints in epochs.
    pub ckpt_interval: usize,

    /// If `true`, the checkpoint `LATEST` is overwritten every epoch.
    pub save_latest: bool,

    /// If `true`, `LATEST` is loaded at the beginning of every epoch if it exists.
    pub always_load_latest: bool,

    /// Replay buffer size above which old trajectories are discarded.
    pub dset_max_size: usize,

    /// Fraction of trajectories discarded when the buffer is too large.
    pub dset_filter_pct: Option<f32>,

    /// Where to save checkpoints.
    pub model_dir: Option<String>,
}

fn default_val_checks_per_epoch() -> usize {
    50
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 1000,
            start_learning_at_epoch: 0,
            start_collecting_at_epoch: 0,
            train_timesteps_per_epoch: 1000,
            train_grad_updates_per_epoch: 1000,
            val_interval: 10,
            val_checks_per_epoch: default_val_checks_per_epoch(),
            log_interval: 250,
            ckpt_interval: 20,
            save_latest: false,
            always_load_latest: false,
            dset_max_size: 15_000,
            dset_filter_pct: Some(0.1),
            model_dir: None,
        }
    }
}

impl TrainerConfig {
    /// Sets the number of epochs.
    pub fn epochs(mut self, v: usize) -> Self {
        self.epochs = v;
        self
    }

    /// Sets the epoch from which gradient updates are performed.
    pub fn start_learning_at_epoch(mut self, v: usize) -> Self {
        self.start_learning_at_epoch = v;
        self
    }

    /// Sets the epoch from which training data is collected.
    pub fn start_collecting_at_epoch(mut self, v: usize) -> Self {
        self.start_collecting_at_epoch = v;
        self
    }

    /// Sets the number of environment steps per epoch.
    pub fn train_timesteps_per_epoch(mut self, v: usize) -> Self {
        self.train_timesteps_per_epoch = v;
        self
    }

    /// Sets the number of gradient updates per epoch.
    pub fn train_grad_updates_per_epoch(mut self, v: usize) -> Self {
        self.train_grad_updates_per_epoch = v;
        self
    }

    /// Sets the interval of evaluation in epochs.
    pub fn val_interval(mut self, v: usize) -> Self {
        self.val_interval = v;
        self
    }

    /// Sets the number of loss evaluations on validation trajectories.
    pub fn val_checks_per_epoch(mut self, v: usize) -> Self {
        self.val_checks_per_epoch = v;
        self
    }

    /// Sets the interval of recording update statistics.
    pub fn log_interval(mut self, v: usize) -> Self {
        self.log_interval = v;
        self
    }

    /// Sets the interval of checkpoints in epochs.
    pub fn ckpt_interval(mut self, v: usize) -> Self {
        self.ckpt_interval = v;
        self
    }

    /// Sets if `LATEST` is saved every epoch.
    pub fn save_latest(mut self, v: bool) -> Self {
        self.save_latest = v;
        self
    }

    /// Sets if `LATEST` is loaded every epoch.
    pub fn always_load_latest(mut self, v: bool) -> Self {
        self.always_load_latest = v;
        self
    }

    /// Sets the maximum size of the replay buffer.
    pub fn dset_max_size(mut self, v: usize) -> Self {
        self.dset_max_size = v;
        self
    }

    /// Sets the fraction of trajectories discarded when the buffer is full.
    pub fn dset_filter_pct(mut self, v: Option<f32>) -> Self {
        self.dset_filter_pct = v;
        self
    }

    /// Sets the directory of checkpoints.
    pub fn model_dir(mut self, v: impl Into<String>) -> Self {
        self.model_dir = Some(v.into());
        self
    }

    /// Constructs [`TrainerConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`TrainerConfig`] as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
