//! Default implementation of the [`Evaluator`] trait.
use super::Evaluator;
use crate::{record::Record, Env, ExperienceBufferBase, Policy, Step, StepProcessor};
use anyhow::Result;
use log::info;

/// Runs a fixed number of episodes and reports the average return.
///
/// Episode `ix` is started with [`Env::reset_with_index`], so a meta-RL
/// environment may use the index to pick the evaluation task.
pub struct DefaultEvaluator<E: Env> {
    n_episodes: usize,
    env: E,
}

/// What happens in an evaluation episode.
enum Event<E: Env> {
    /// An episode starts with the observation.
    Reset(E::Obs),

    /// A step of the episode.
    Step(Step<E>),
}

impl<E: Env> DefaultEvaluator<E> {
    fn run<P, F>(&mut self, policy: &mut P, mut on_event: F) -> Result<Record>
    where
        P: Policy<E>,
        F: FnMut(Event<E>) -> Result<()>,
    {
        let mut returns = Vec::with_capacity(self.n_episodes);

        for ix in 0..self.n_episodes {
            policy.reset(None);
            let mut prev_obs = self.env.reset_with_index(ix)?;
            on_event(Event::Reset(prev_obs.clone()))?;
            let mut r_total = 0f32;

            loop {
                let act = policy.sample(&prev_obs)?;
                let (step, _) = self.env.step(&act);
                r_total += step.reward[0];
                let is_done = step.is_done();
                let next_obs = step.obs.clone();
                on_event(Event::Step(step))?;
                if is_done {
                    break;
                }
                prev_obs = next_obs;
            }
            returns.push(r_total);
        }

        let n = returns.len().max(1) as f32;
        let mean = returns.iter().sum::<f32>() / n;
        let min = returns.iter().copied().fold(f32::INFINITY, f32::min);
        let max = returns.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        info!("Average return over {} episodes: {}", self.n_episodes, mean);

        let mut record = Record::from_scalar("Episode return", mean);
        if !returns.is_empty() {
            record.insert_scalar("Episode return min", min);
            record.insert_scalar("Episode return max", max);
        }
        Ok(record)
    }
}

impl<E: Env> Evaluator<E> for DefaultEvaluator<E> {
    /// Returns a record with `"Episode return"`, the mean over episodes, and
    /// `"Episode return min"` and `"Episode return max"`.
    fn evaluate<P>(&mut self, policy: &mut P) -> Result<Record>
    where
        P: Policy<E>,
    {
        self.run(policy, |_| Ok(()))
    }

    /// Same as [`DefaultEvaluator::evaluate`], and every episode is fed to
    /// `step_proc` step by step with its outputs pushed into `buffer`.
    fn evaluate_and_push<P, S, R>(
        &mut self,
        policy: &mut P,
        step_proc: &mut S,
        buffer: &mut R,
    ) -> Result<Record>
    where
        P: Policy<E>,
        S: StepProcessor<E>,
        R: ExperienceBufferBase<Item = S::Output>,
    {
        self.run(policy, |event| match event {
            Event::Reset(obs) => {
                step_proc.reset(obs);
                Ok(())
            }
            Event::Step(step) => buffer.push(step_proc.process(step)),
        })
    }
}

impl<E: Env> DefaultEvaluator<E> {
    /// Constructs a new [`DefaultEvaluator`].
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration of the evaluation environment
    /// * `seed` - Random seed of the environment
    /// * `n_episodes` - Number of episodes per evaluation
    pub fn new(config: &E::Config, seed: i64, n_episodes: usize) -> Result<Self> {
        Ok(Self {
            n_episodes,
            env: E::build(config, seed)?,
        })
    }
}
