use crate::timestep::Timestep;
use amago_core::error::AmagoError;
use anyhow::Result;

/// A trajectory of `n + 1` timesteps connected by `n` transitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trajectory {
    /// Observation rows.
    pub observations: Vec<Vec<f32>>,

    /// Goal rows.
    pub goals: Vec<Vec<f32>>,

    /// rl2 rows, see [`Timestep::rl2`].
    pub rl2s: Vec<Vec<f32>>,

    /// Time indices.
    pub time_idxs: Vec<u32>,

    /// Actions, one-hot for discrete action spaces.
    pub actions: Vec<Vec<f32>>,

    /// Rewards.
    pub rewards: Vec<f32>,

    /// Termination flags. Truncation does not terminate a trajectory.
    pub dones: Vec<bool>,
}

impl Trajectory {
    /// Appends a timestep.
    pub fn push_timestep(&mut self, timestep: &Timestep, action_dim: usize) {
        self.observations.push(timestep.observation.clone());
        self.goals.push(timestep.goal.clone());
        self.rl2s.push(timestep.rl2(action_dim));
        self.time_idxs.push(timestep.time_idx);
    }

    /// Appends a transition from the last timestep.
    pub fn push_transition(&mut self, action: Vec<f32>, reward: f32, done: bool) {
        self.actions.push(action);
        self.rewards.push(reward);
        self.dones.push(done);
    }

    /// Number of timesteps.
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Returns `true` if the trajectory has no timestep.
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Checks that the trajectory has at least one transition and that
    /// every row has the same length as the first one.
    pub fn check(&self) -> Result<()> {
        let n = self.len();
        let n_tr = self.actions.len();
        if n < 2 || n_tr + 1 != n {
            return Err(AmagoError::shape("trajectory", &[n_tr + 1], &[n]).into());
        }
        let lens = [
            self.goals.len(),
            self.rl2s.len(),
            self.time_idxs.len(),
            self.rewards.len() + 1,
            self.dones.len() + 1,
        ];
        if lens.iter().any(|len| *len != n) {
            return Err(AmagoError::shape("trajectory", &[n; 5], &lens).into());
        }
        let rows = |name: &str, rows: &[Vec<f32>]| -> Result<()> {
            let dim = rows[0].len();
            match rows.iter().find(|row| row.len() != dim) {
                Some(row) => Err(AmagoError::shape(name, &[dim], &[row.len()]).into()),
                None => Ok(()),
            }
        };
        rows("observations", &self.observations)?;
        rows("goals", &self.goals)?;
        rows("rl2s", &self.rl2s)?;
        rows("actions", &self.actions)
    }
}
