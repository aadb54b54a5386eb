//! AMAGO agent implemented with [candle](https://crates.io/crates/candle-core).
//!
//! [`Amago`] trains a sequence model, an ensemble of critics and an actor on
//! windows of trajectories sampled from a [`TrajectoryReplayBuffer`]. Every
//! critic and the actor are conditioned on several discount factors at once.
pub mod actor;
pub mod amago;
pub mod batch;
pub mod critic;
pub mod encoder;
pub mod mlp;
pub mod model;
pub mod opt;
pub mod popart;
pub mod replay_buffer;
pub mod sequence_buffer;
pub mod timestep;
pub mod util;
pub use crate::amago::{Amago, AmagoConfig};
pub use actor::ActionSpace;
pub use batch::{TrajectoryBatch, MAGIC_PAD_VAL};
pub use replay_buffer::{
    Trajectory, TrajectoryProcessor, TrajectoryProcessorConfig, TrajectoryReplayBuffer,
    TrajectoryReplayBufferConfig,
};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
pub use timestep::Timestep;

#[derive(Clone, Debug, Copy, Deserialize, Serialize, PartialEq)]
/// Device for using candle.
///
/// This enum is added because [`candle_core::Device`] does not support serialization.
pub enum Device {
    /// The main CPU device.
    Cpu,

    /// The GPU device with the given ordinal.
    Cuda(usize),
}

impl Default for Device {
    fn default() -> Self {
        Self::Cpu
    }
}

impl TryFrom<Device> for candle_core::Device {
    type Error = candle_core::Error;

    fn try_from(device: Device) -> Result<Self, Self::Error> {
        match device {
            Device::Cpu => Ok(candle_core::Device::Cpu),
            Device::Cuda(n) => candle_core::Device::new_cuda(n),
        }
    }
}
