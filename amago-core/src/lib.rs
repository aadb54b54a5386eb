#![warn(missing_docs)]
//! Core components of AMAGO agents.
//!
//! This crate provides the traits connecting environments, agents and replay
//! buffers, the key-value [`record`]s of training statistics, and the
//! epoch-based [`Trainer`]. Neural network implementations of agents live in
//! separate crates.
pub mod error;
pub mod evaluator;
pub mod record;

mod base;
pub use base::{
    Act, Agent, Configurable, Env, ExperienceBufferBase, Info, Obs, Policy, ReplayBufferBase,
    Step, StepProcessor,
};
pub use evaluator::{DefaultEvaluator, Evaluator};

mod trainer;
pub use trainer::{Sampler, Trainer, TrainerConfig};
