//! Evaluation of [`Agent`](crate::Agent)s.
use crate::{record::Record, Env, ExperienceBufferBase, Policy, StepProcessor};
use anyhow::Result;
mod default_evaluator;
pub use default_evaluator::DefaultEvaluator;

/// Evaluates a policy.
pub trait Evaluator<E: Env> {
    /// Evaluates the given policy.
    ///
    /// The caller is responsible for the mode of the agent, i.e., it should be
    /// set to evaluation mode before calling this method.
    fn evaluate<P>(&mut self, policy: &mut P) -> Result<Record>
    where
        P: Policy<E>;

    /// Evaluates the given policy and pushes the processed steps of the
    /// evaluation episodes into `buffer`.
    ///
    /// The default implementation calls [`Evaluator::evaluate`] and collects
    /// nothing.
    fn evaluate_and_push<P, S, R>(
        &mut self,
        policy: &mut P,
        _step_proc: &mut S,
        _buffer: &mut R,
    ) -> Result<Record>
    where
        P: Policy<E>,
        S: StepProcessor<E>,
        R: ExperienceBufferBase<Item = S::Output>,
    {
        self.evaluate(policy)
    }
}
