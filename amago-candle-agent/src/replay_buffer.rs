//! In-memory replay of whole trajectories.
mod base;
mod config;
mod step_proc;
mod trajectory;
pub use base::TrajectoryReplayBuffer;
pub use config::TrajectoryReplayBufferConfig;
pub use step_proc::{TrajectoryProcessor, TrajectoryProcessorConfig};
pub use trajectory::Trajectory;
