//! Assembles environment steps into trajectories.
use super::Trajectory;
use crate::{actor::ActionSpace, timestep::Timestep};
use amago_core::{Env, Step, StepProcessor};
use log::warn;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Configuration of [`TrajectoryProcessor`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct TrajectoryProcessorConfig {
    /// Action space of the environment.
    pub action_space: ActionSpace,
}

impl TrajectoryProcessorConfig {
    /// Creates a configuration.
    pub fn new(action_space: ActionSpace) -> Self {
        Self { action_space }
    }
}

/// Collects the steps of an episode and emits the whole trajectory when the
/// episode ends.
///
/// Discrete actions given as a single index are stored as one-hot vectors.
/// Truncated episodes are emitted with all termination flags unset.
pub struct TrajectoryProcessor<E> {
    action_space: ActionSpace,
    current: Option<Trajectory>,
    phantom: PhantomData<E>,
}

impl<E> TrajectoryProcessor<E> {
    fn action_vec(&self, act: Vec<f32>) -> Vec<f32> {
        match self.action_space {
            ActionSpace::Discrete(n) if act.len() == 1 && n != 1 => {
                let mut one_hot = vec![0f32; n];
                if let Some(v) = one_hot.get_mut(act[0] as usize) {
                    *v = 1.0;
                }
                one_hot
            }
            _ => act,
        }
    }
}

impl<E> StepProcessor<E> for TrajectoryProcessor<E>
where
    E: Env,
    E::Obs: Into<Timestep>,
    E::Act: Into<Vec<f32>>,
{
    type Config = TrajectoryProcessorConfig;
    type Output = Option<Trajectory>;

    fn build(config: &Self::Config) -> Self {
        Self {
            action_space: config.action_space,
            current: None,
            phantom: PhantomData,
        }
    }

    fn reset(&mut self, init_obs: E::Obs) {
        let mut traj = Trajectory::default();
        traj.push_timestep(&init_obs.into(), self.action_space.action_dim());
        self.current = Some(traj);
    }

    fn process(&mut self, step: Step<E>) -> Self::Output {
        let is_done = step.is_done();
        let terminated = step.is_terminated.first().map_or(false, |t| *t == 1);
        let reward = step.reward.first().copied().unwrap_or(0.0);
        let action = self.action_vec(step.act.into());
        let action_dim = self.action_space.action_dim();

        let traj = match self.current.as_mut() {
            Some(traj) => traj,
            None => {
                warn!("A step was given before the first observation, skipped");
                return None;
            }
        };
        traj.push_transition(action, reward, terminated);
        traj.push_timestep(&step.obs.into(), action_dim);

        match is_done {
            true => self.current.take(),
            false => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use amago_core::{record::Record, Act, Obs};
    use anyhow::Result;

    #[derive(Clone, Debug)]
    struct TestObs(f32, u32);

    impl Obs for TestObs {
        fn len(&self) -> usize {
            1
        }
    }

    impl From<TestObs> for Timestep {
        fn from(obs: TestObs) -> Self {
            match obs.1 {
                0 => Timestep::first(vec![obs.0], vec![]),
                t => Timestep::next(vec![obs.0], vec![], 1.0, vec![0.0, 1.0, 0.0], t),
            }
        }
    }

    #[derive(Clone, Debug)]
    struct TestAct(usize);

    impl Act for TestAct {
        fn len(&self) -> usize {
            1
        }
    }

    impl From<TestAct> for Vec<f32> {
        fn from(act: TestAct) -> Self {
            vec![act.0 as f32]
        }
    }

    struct TestEnv;

    impl Env for TestEnv {
        type Config = ();
        type Obs = TestObs;
        type Act = TestAct;
        type Info = ();

        fn build(_config: &Self::Config, _seed: i64) -> Result<Self> {
            Ok(Self)
        }

        fn step(&mut self, _a: &Self::Act) -> (Step<Self>, Record) {
            unimplemented!()
        }

        fn reset(&mut self, _is_done: Option<&Vec<i8>>) -> Result<Self::Obs> {
            Ok(TestObs(0.0, 0))
        }

        fn step_with_reset(&mut self, _a: &Self::Act) -> (Step<Self>, Record) {
            unimplemented!()
        }

        fn reset_with_index(&mut self, _ix: usize) -> Result<Self::Obs> {
            unimplemented!()
        }
    }

    fn step(t: u32, terminated: i8, truncated: i8) -> Step<TestEnv> {
        let obs = TestObs(t as f32, t);
        Step::new(obs, TestAct(1), vec![1.0], vec![terminated], vec![truncated], (), None)
    }

    #[test]
    fn test_emit_on_termination() -> Result<()> {
        let config = TrajectoryProcessorConfig::new(ActionSpace::Discrete(3));
        let mut proc = TrajectoryProcessor::<TestEnv>::build(&config);
        assert!(proc.process(step(1, 0, 0)).is_none());

        proc.reset(TestObs(0.0, 0));
        assert!(proc.process(step(1, 0, 0)).is_none());
        let traj = proc.process(step(2, 1, 0)).unwrap();
        traj.check()?;
        assert_eq!(traj.len(), 3);
        assert_eq!(traj.actions[0], vec![0.0, 1.0, 0.0]);
        assert_eq!(traj.rewards, vec![1.0, 1.0]);
        assert_eq!(traj.dones, vec![false, true]);
        assert_eq!(traj.time_idxs, vec![0, 1, 2]);
        assert_eq!(traj.rl2s[0], vec![1.0, 0.0, 0.0, -2.0, -2.0, -2.0]);

        // Nothing is emitted until the next reset
        assert!(proc.process(step(3, 1, 0)).is_none());
        Ok(())
    }

    #[test]
    fn test_truncation_is_not_terminal() -> Result<()> {
        let config = TrajectoryProcessorConfig::new(ActionSpace::Discrete(3));
        let mut proc = TrajectoryProcessor::<TestEnv>::build(&config);
        proc.reset(TestObs(0.0, 0));
        let traj = proc.process(step(1, 0, 1)).unwrap();
        assert_eq!(traj.dones, vec![false]);
        Ok(())
    }
}
