//! Replay buffer interfaces.
use anyhow::Result;

/// A buffer storing experiences from environments.
pub trait ExperienceBufferBase {
    /// The type of items stored in the buffer.
    type Item;

    /// Pushes an item into the buffer.
    fn push(&mut self, tr: Self::Item) -> Result<()>;

    /// Returns the number of stored experiences.
    fn len(&self) -> usize;

    /// Discards a fraction `pct` of the stored experiences, oldest first.
    ///
    /// Returns the number of discarded experiences.
    fn filter(&mut self, pct: f32) -> Result<usize>;
}

/// A buffer generating batches for training.
pub trait ReplayBufferBase {
    /// Configuration of the buffer.
    type Config: Clone;

    /// The type of batches used to train agents.
    type Batch;

    /// Builds a buffer from the given configuration.
    fn build(config: &Self::Config) -> Result<Self>
    where
        Self: Sized;

    /// Samples a batch of `size` experiences.
    fn batch(&mut self, size: usize) -> Result<Self::Batch>;
}
