//! Observations of a meta-RL environment at a single timestep.
use serde::{Deserialize, Serialize};

/// Value of the previous action in the rl2 vector of the first timestep.
pub const FIRST_STEP_ACTION: f32 = -2.0;

/// What the agent sees at one timestep.
///
/// Environments expose their observations to the agent by converting them
/// into this struct. Besides the observation and the goal, it carries the
/// reward of the previous step and the previous action, which form the
/// rl2 input of the sequence model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timestep {
    /// Flat observation vector.
    pub observation: Vec<f32>,

    /// Flat goal vector.
    pub goal: Vec<f32>,

    /// Reward received by the previous action.
    pub reward: f32,

    /// Previous action, `None` at the first timestep of an episode.
    pub prev_action: Option<Vec<f32>>,

    /// Timestep in the episode.
    pub time_idx: u32,
}

impl Timestep {
    /// The first timestep of an episode.
    pub fn first(observation: Vec<f32>, goal: Vec<f32>) -> Self {
        Self {
            observation,
            goal,
            reward: 0.0,
            prev_action: None,
            time_idx: 0,
        }
    }

    /// A timestep following `prev_action`.
    pub fn next(
        observation: Vec<f32>,
        goal: Vec<f32>,
        reward: f32,
        prev_action: Vec<f32>,
        time_idx: u32,
    ) -> Self {
        Self {
            observation,
            goal,
            reward,
            prev_action: Some(prev_action),
            time_idx,
        }
    }

    /// `[reset, reward, time_idx, prev_action...]`.
    ///
    /// The first timestep of an episode has `reset = 1`, zero reward and
    /// [`FIRST_STEP_ACTION`] in place of the action.
    pub fn rl2(&self, action_dim: usize) -> Vec<f32> {
        let mut v = Vec::with_capacity(3 + action_dim);
        match &self.prev_action {
            None => {
                v.extend([1.0, 0.0, self.time_idx as f32]);
                v.extend(std::iter::repeat(FIRST_STEP_ACTION).take(action_dim));
            }
            Some(a) => {
                v.extend([0.0, self.reward, self.time_idx as f32]);
                v.extend(a.iter().copied());
            }
        }
        v
    }
}
