//! Collection of experiences from an environment.
use crate::{
    record::Record, Env, ExperienceBufferBase, Policy, StepProcessor,
};
use anyhow::{Context, Result};

/// Runs a policy in an environment and pushes processed steps into a buffer.
///
/// The sampler keeps the environment and the last observation alive across
/// calls, so collection in one epoch continues the episodes of the previous
/// epoch.
pub struct Sampler<E, P>
where
    E: Env,
    P: StepProcessor<E>,
{
    env: E,
    prev_obs: Option<E::Obs>,
    step_processor: P,
    episode_return: f32,
    env_steps: usize,
}

impl<E, P> Sampler<E, P>
where
    E: Env,
    P: StepProcessor<E>,
{
    /// Creates a sampler with the given environment and step processor.
    pub fn new(env: E, step_processor: P) -> Self {
        Self {
            env,
            prev_obs: None,
            step_processor,
            episode_return: 0.0,
            env_steps: 0,
        }
    }

    /// Returns the number of environment steps taken so far.
    pub fn env_steps(&self) -> usize {
        self.env_steps
    }

    /// Takes an environment step with the policy and pushes the processed
    /// step into `buffer`.
    ///
    /// The returned record contains the record of the environment and, when
    /// an episode ended, its return as `"Episode return"`.
    pub fn sample_and_push<A, R>(&mut self, policy: &mut A, buffer: &mut R) -> Result<Record>
    where
        A: Policy<E>,
        R: ExperienceBufferBase<Item = P::Output>,
    {
        let prev_obs = match self.prev_obs.take() {
            Some(obs) => obs,
            None => {
                let obs = self.env.reset(None)?;
                self.step_processor.reset(obs.clone());
                policy.reset(None);
                obs
            }
        };

        let act = policy.sample(&prev_obs)?;
        let (step, mut record) = self.env.step_with_reset(&act);
        let is_done = step.is_done();
        self.episode_return += step.reward[0];
        self.env_steps += 1;

        let next_obs = match is_done {
            true => step
                .init_obs
                .clone()
                .context("init_obs is not set at the end of an episode")?,
            false => step.obs.clone(),
        };

        let item = self.step_processor.process(step);
        buffer.push(item)?;

        if is_done {
            self.step_processor.reset(next_obs.clone());
            policy.reset(Some(&[1]));
            record.insert_scalar("Episode return", self.episode_return);
            self.episode_return = 0.0;
        }
        self.prev_obs = Some(next_obs);

        Ok(record)
    }
}
