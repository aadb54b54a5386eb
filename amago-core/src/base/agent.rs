//! Agent.
use super::{Env, Policy, ReplayBufferBase};
use crate::record::Record;
use anyhow::Result;
use std::path::Path;

/// A trainable policy.
pub trait Agent<E: Env, R: ReplayBufferBase>: Policy<E> {
    /// Sets the agent to training mode.
    fn train(&mut self);

    /// Sets the agent to evaluation mode.
    fn eval(&mut self);

    /// Returns `true` in training mode.
    fn is_train(&self) -> bool;

    /// Performs an optimization step with a batch taken from `buffer`.
    fn opt(&mut self, buffer: &mut R) -> Result<()> {
        self.opt_with_record(buffer).map(|_| ())
    }

    /// Performs an optimization step and returns its statistics.
    fn opt_with_record(&mut self, buffer: &mut R) -> Result<Record>;

    /// Computes the losses and their statistics on a batch taken from
    /// `buffer` without changing the agent.
    ///
    /// The default implementation returns an empty record.
    fn val_step(&mut self, _buffer: &mut R) -> Result<Record> {
        Ok(Record::empty())
    }

    /// Saves the parameters of the agent in the given directory.
    ///
    /// Agents commonly write several files into the directory, for example
    /// the online networks and their target copies.
    fn save_params(&self, path: &Path) -> Result<()>;

    /// Loads the parameters of the agent from the given directory.
    fn load_params(&mut self, path: &Path) -> Result<()>;
}
