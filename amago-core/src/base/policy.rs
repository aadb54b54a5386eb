//! Policy.
use super::Env;
use anyhow::Result;
use serde::de::DeserializeOwned;
use std::path::Path;

/// A policy on an environment.
///
/// Policies built on sequence models keep a rollout context internally.
/// [`Policy::reset`] tells the policy that episodes ended so that the
/// context can be cleared.
pub trait Policy<E: Env> {
    /// Samples an action given an observation.
    fn sample(&mut self, obs: &E::Obs) -> Result<E::Act>;

    /// Notifies the end of episodes.
    ///
    /// `None` discards the whole rollout context, e.g., before an evaluation
    /// run. `Some(is_done)` resets the context of the actors with
    /// `is_done[i] == 1`.
    fn reset(&mut self, _is_done: Option<&[i8]>) {}
}

/// An object built from a serializable configuration.
pub trait Configurable<E: Env> {
    /// Configuration.
    type Config: Clone + DeserializeOwned;

    /// Builds the object.
    fn build(config: Self::Config) -> Result<Self>
    where
        Self: Sized;

    /// Builds the object with the configuration in the YAML file of the given path.
    fn build_from_path(path: impl AsRef<Path>) -> Result<Self>
    where
        Self: Sized,
    {
        let file = std::fs::File::open(path)?;
        let rdr = std::io::BufReader::new(file);
        let config = serde_yaml::from_reader(rdr)?;
        Self::build(config)
    }
}
