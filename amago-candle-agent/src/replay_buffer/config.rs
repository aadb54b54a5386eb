//! Configuration of [`TrajectoryReplayBuffer`](super::TrajectoryReplayBuffer).
use crate::Device;
use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`TrajectoryReplayBuffer`](super::TrajectoryReplayBuffer).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct TrajectoryReplayBufferConfig {
    /// Maximum number of trajectories; the oldest ones are dropped first.
    pub capacity: usize,

    /// Maximum number of timesteps of the windows in a batch.
    pub max_seq_len: usize,

    /// Random seed.
    pub seed: u64,

    /// Device of batches.
    pub device: Option<Device>,
}

impl Default for TrajectoryReplayBufferConfig {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            max_seq_len: 128,
            seed: 42,
            device: None,
        }
    }
}

impl TrajectoryReplayBufferConfig {
    /// Sets the capacity.
    pub fn capacity(mut self, v: usize) -> Self {
        self.capacity = v;
        self
    }

    /// Sets the maximum window length.
    pub fn max_seq_len(mut self, v: usize) -> Self {
        self.max_seq_len = v;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = v;
        self
    }

    /// Sets the device.
    pub fn device(mut self, v: Device) -> Self {
        self.device = Some(v);
        self
    }

    /// Constructs [`TrajectoryReplayBufferConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(&path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        info!("Load config of replay buffer from {:?}", path.as_ref());
        Ok(b)
    }

    /// Saves [`TrajectoryReplayBufferConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(&path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        info!("Save config of replay buffer into {:?}", path.as_ref());
        Ok(())
    }
}
