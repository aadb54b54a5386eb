//! Action selection during rollouts.
use super::{Amago, AmagoConfig};
use crate::{
    actor::ActionDistribution, model::SubModel1, sequence_buffer::SequenceBuffer,
    timestep::Timestep,
};
use amago_core::error::AmagoError;
use anyhow::Result;
use candle_core::{DType, Tensor, D};

/// Context of the single actor driven through [`Policy`](amago_core::Policy).
pub(super) struct Rollout {
    buffer: SequenceBuffer,
    hidden: Option<Tensor>,
    new_episode: bool,
    obs_dim: usize,
    goal_dim: usize,
    action_dim: usize,
}

impl Rollout {
    pub(super) fn new(config: &AmagoConfig) -> Self {
        let action_dim = config.action_space.action_dim();
        let dim = config.obs_dim + config.goal_dim + 3 + action_dim;
        Self {
            buffer: SequenceBuffer::new(1, dim, config.max_seq_len),
            hidden: None,
            new_episode: true,
            obs_dim: config.obs_dim,
            goal_dim: config.goal_dim,
            action_dim,
        }
    }

    /// Discards the whole context.
    pub(super) fn clear(&mut self) {
        self.buffer.clear();
        self.hidden = None;
        self.new_episode = true;
    }

    /// The next timestep starts a new episode.
    pub(super) fn end_episode(&mut self) {
        self.new_episode = true;
    }
}

/// Gathers timestep `seq_lengths[i] - 1` of every sequence in `x [N, L, ...]`.
fn current_timestep(x: &Tensor, seq_lengths: &[usize]) -> Result<Tensor> {
    let (n, l) = (x.dim(0)?, x.dim(1)?);
    if seq_lengths.len() != n {
        return Err(AmagoError::shape("seq_lengths", &[n], &[seq_lengths.len()]).into());
    }
    let rows = seq_lengths
        .iter()
        .enumerate()
        .map(|(i, len)| {
            if *len == 0 || *len > l {
                return Err(AmagoError::shape("sequence length", &[l], &[*len]).into());
            }
            Ok(x.narrow(0, i, 1)?.narrow(1, len - 1, 1)?)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Tensor::cat(&rows, 0)?)
}

impl<E, R> Amago<E, R> {
    /// Context of the training rollout in training mode, of the evaluation
    /// rollout otherwise.
    pub(super) fn active_rollout(&mut self) -> &mut Rollout {
        match self.train {
            true => &mut self.rollout,
            false => &mut self.val_rollout,
        }
    }

    /// Selects actions of `N` parallel actors.
    ///
    /// `obs`, `goals` and `rl2s` are `[N, L, ...]` contexts right-padded
    /// after `seq_lengths[i]` timesteps, and `time_idxs` is `[N, L, 1]`.
    /// With a hidden state, only the current timestep of each sequence is
    /// encoded and the trajectory encoder is stepped once. Without, the whole
    /// context is encoded and the representation of the current timestep is
    /// gathered.
    ///
    /// Returns the actions of the primary gamma, `u8` indices `[N, 1]` for
    /// discrete action spaces and `f32 [N, A]` otherwise, together with the
    /// updated hidden state. `sample = false` takes the most likely action.
    #[allow(clippy::too_many_arguments)]
    pub fn get_actions(
        &mut self,
        obs: &Tensor,
        goals: &Tensor,
        rl2s: &Tensor,
        seq_lengths: &[usize],
        time_idxs: &Tensor,
        hidden_state: Option<Tensor>,
        sample: bool,
    ) -> Result<(Tensor, Option<Tensor>)> {
        let using_hidden = hidden_state.is_some();
        let (obs, goals, rl2s, time_idxs) = match using_hidden {
            true => (
                current_timestep(obs, seq_lengths)?,
                current_timestep(goals, seq_lengths)?,
                current_timestep(rl2s, seq_lengths)?,
                current_timestep(time_idxs, seq_lengths)?,
            ),
            false => (obs.clone(), goals.clone(), rl2s.clone(), time_idxs.clone()),
        };

        let emb = self.tstep_encoder.encode(&obs, &goals, &rl2s)?;
        let (s_rep, hidden_state) = self.traj_encoder.encode(&emb, &time_idxs, hidden_state)?;
        let s_rep = match using_hidden {
            true => s_rep,
            false => current_timestep(&s_rep, seq_lengths)?,
        };

        // [N, G, A]
        let a_dist = self.actor.forward(&s_rep.squeeze(1)?)?;
        let actions = match (&a_dist, sample) {
            (ActionDistribution::Discrete { .. }, true) => a_dist
                .sample(&mut self.rng)?
                .argmax_keepdim(D::Minus1)?,
            (_, true) => a_dist.sample(&mut self.rng)?,
            (_, false) => a_dist.mode()?,
        };

        let g = self.gammas.len();
        let actions = actions.narrow(1, g - 1, 1)?.squeeze(1)?;
        let actions = match self.config.action_space.is_discrete() {
            true => actions.to_dtype(DType::U8)?,
            false => actions.to_dtype(DType::F32)?,
        };
        Ok((actions, hidden_state))
    }

    /// Appends `timestep` to the rollout context and selects an action.
    pub(super) fn act(&mut self, timestep: &Timestep, sample: bool) -> Result<Tensor> {
        let rollout = match self.train {
            true => &mut self.rollout,
            false => &mut self.val_rollout,
        };
        let actual = [timestep.observation.len(), timestep.goal.len()];
        let expected = [rollout.obs_dim, rollout.goal_dim];
        if actual != expected {
            return Err(AmagoError::shape("timestep", &expected, &actual).into());
        }

        let new_episode = rollout.new_episode || timestep.prev_action.is_none();
        let mut row = timestep.observation.clone();
        row.extend(timestep.goal.iter().copied());
        row.extend(timestep.rl2(rollout.action_dim));
        rollout
            .buffer
            .add_timestep(&[row], &[timestep.time_idx], &[new_episode])?;
        rollout.new_episode = false;

        let hidden = match rollout.hidden.take() {
            Some(h) => self.traj_encoder.reset_hidden_state(Some(h), &[new_episode])?,
            None => self.traj_encoder.init_hidden_state(1, &self.device)?,
        };

        let (obs_dim, goal_dim) = (rollout.obs_dim, rollout.goal_dim);
        let seqs = rollout.buffer.sequences(&self.device)?;
        let time_idxs = rollout.buffer.time_idxs(&self.device)?;
        let seq_lengths = rollout.buffer.sequence_lengths();
        let rl2_dim = seqs.dim(2)? - obs_dim - goal_dim;
        let obs = seqs.narrow(2, 0, obs_dim)?;
        let goals = seqs.narrow(2, obs_dim, goal_dim)?;
        let rl2s = seqs.narrow(2, obs_dim + goal_dim, rl2_dim)?;

        let (actions, hidden) =
            self.get_actions(&obs, &goals, &rl2s, &seq_lengths, &time_idxs, hidden, sample)?;
        self.active_rollout().hidden = hidden;
        Ok(actions)
    }
}
