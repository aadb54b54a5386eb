//! Multi-gamma actor-critic agent on a sequence model.
//!
//! The agent embeds every timestep of a trajectory window, runs a sequence
//! model over the embeddings and trains an ensemble of critics together with
//! an actor, both conditioned on a set of discount factors. The critic loss,
//! the filtered behavior cloning term and the policy gradient term share one
//! backward pass.
mod base;
mod config;
mod filter;
mod loss;
mod rollout;
mod stats;
pub use base::Amago;
pub use config::AmagoConfig;
pub use filter::{AdvantageFilter, LEGACY_BINARY_THRESHOLD};
pub use loss::{aggregate_td_targets, LossOutput};
