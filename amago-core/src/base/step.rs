//! Environment step.
use super::Env;

/// Additional information attached to [`Step`].
pub trait Info {}

impl Info for () {}

/// A tuple `(a_t, o_t+1, r_t)` with termination flags, emitted by an
/// environment at every interaction step.
pub struct Step<E: Env> {
    /// Action.
    pub act: E::Act,

    /// Observation.
    pub obs: E::Obs,

    /// Reward.
    pub reward: Vec<f32>,

    /// Flag denoting if the episode is terminated.
    pub is_terminated: Vec<i8>,

    /// Flag denoting if the episode is truncated.
    pub is_truncated: Vec<i8>,

    /// Information defined by the environment.
    pub info: E::Info,

    /// First observation of the next episode, set when the episode ended in
    /// [`Env::step_with_reset`].
    pub init_obs: Option<E::Obs>,
}

impl<E: Env> Step<E> {
    /// Constructs a [`Step`] object.
    pub fn new(
        obs: E::Obs,
        act: E::Act,
        reward: Vec<f32>,
        is_terminated: Vec<i8>,
        is_truncated: Vec<i8>,
        info: E::Info,
        init_obs: Option<E::Obs>,
    ) -> Self {
        Step {
            act,
            obs,
            reward,
            is_terminated,
            is_truncated,
            info,
            init_obs,
        }
    }

    /// Terminated or truncated.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.is_terminated[0] == 1 || self.is_truncated[0] == 1
    }
}

/// Processes [`Step`] objects into items of a replay buffer.
///
/// The output type should be the same as
/// [`ExperienceBufferBase::Item`](crate::ExperienceBufferBase::Item) of the
/// buffer the [`Sampler`](crate::Sampler) pushes into.
pub trait StepProcessor<E: Env> {
    /// Configuration.
    type Config: Clone;

    /// The type of items produced by this trait.
    type Output;

    /// Builds a processor.
    fn build(config: &Self::Config) -> Self;

    /// Resets the processor with the first observation of an episode.
    fn reset(&mut self, init_obs: E::Obs);

    /// Processes a [`Step`] object.
    fn process(&mut self, step: Step<E>) -> Self::Output;
}
