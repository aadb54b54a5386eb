use super::{Trajectory, TrajectoryReplayBufferConfig};
use crate::batch::{TrajectoryBatch, MAGIC_PAD_VAL, OBSERVATION_KEY};
use amago_core::{error::AmagoError, ExperienceBufferBase, ReplayBufferBase};
use anyhow::{bail, Result};
use candle_core::{Device, Tensor};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::{
    collections::{HashMap, VecDeque},
    convert::TryInto,
};

/// Replay buffer sampling random windows of stored trajectories.
///
/// Windows are at most `max_seq_len` timesteps long. Shorter windows are
/// right-padded with [`MAGIC_PAD_VAL`] up to the longest window of the
/// batch.
pub struct TrajectoryReplayBuffer {
    capacity: usize,
    max_seq_len: usize,
    trajs: VecDeque<Trajectory>,
    rng: SmallRng,
    device: Device,
}

/// Rows `[start, start + len)` of each trajectory padded to `l` rows.
fn collate_rows<'a>(
    rows: impl Iterator<Item = (&'a [Vec<f32>], usize)>,
    b: usize,
    l: usize,
    dim: usize,
) -> Vec<f32> {
    let mut data = Vec::with_capacity(b * l * dim);
    for (rows, start) in rows {
        let rows = &rows[start..(start + l).min(rows.len())];
        for row in rows.iter() {
            data.extend(row.iter().copied());
        }
        data.extend(std::iter::repeat(MAGIC_PAD_VAL).take((l - rows.len()) * dim));
    }
    data
}

impl TrajectoryReplayBuffer {
    /// Start and length of a random window of `traj`.
    fn window(&mut self, traj: &Trajectory) -> (usize, usize) {
        let n = traj.len();
        if n <= self.max_seq_len {
            (0, n)
        } else {
            (self.rng.gen_range(0..=n - self.max_seq_len), self.max_seq_len)
        }
    }

    fn collate(
        &self,
        trajs: &[&Trajectory],
        windows: &[(usize, usize)],
    ) -> Result<TrajectoryBatch> {
        let b = trajs.len();
        let l = windows.iter().map(|(_, n)| *n).max().unwrap_or(0);
        if b == 0 || l < 2 {
            bail!("a batch needs at least one window of 2 timesteps");
        }
        let row_dims = |t: &Trajectory| {
            [
                t.observations[0].len(),
                t.goals[0].len(),
                t.rl2s[0].len(),
                t.actions[0].len(),
            ]
        };
        let expected = row_dims(trajs[0]);
        let [obs_dim, goal_dim, rl2_dim, a_dim] = expected;
        for traj in trajs.iter() {
            let dims = row_dims(*traj);
            if dims != expected {
                return Err(AmagoError::shape("trajectory", &expected, &dims).into());
            }
        }

        let starts = || windows.iter().map(|(s, _)| *s);
        let rows = |f: &dyn Fn(&Trajectory) -> &[Vec<f32>], len: usize, dim: usize| {
            collate_rows(trajs.iter().map(|t| f(*t)).zip(starts()), b, len, dim)
        };
        let obs = rows(&|t| &t.observations[..], l, obs_dim);
        let goals = rows(&|t| &t.goals[..], l, goal_dim);
        let rl2s = rows(&|t| &t.rl2s[..], l, rl2_dim);
        let actions = rows(&|t| &t.actions[..], l - 1, a_dim);

        let scalars = |f: &dyn Fn(&Trajectory) -> Vec<Vec<f32>>, len: usize| {
            let rows = trajs.iter().map(|t| f(*t)).collect::<Vec<_>>();
            collate_rows(rows.iter().map(|r| &r[..]).zip(starts()), b, len, 1)
        };
        let time_idxs = scalars(&|t| t.time_idxs.iter().map(|x| vec![*x as f32]).collect(), l);
        let rews = scalars(&|t| t.rewards.iter().map(|x| vec![*x]).collect(), l - 1);
        let dones = scalars(
            &|t| t.dones.iter().map(|x| vec![*x as u8 as f32]).collect(),
            l - 1,
        );

        let device = &self.device;
        Ok(TrajectoryBatch {
            obs: HashMap::from([(
                OBSERVATION_KEY.to_string(),
                Tensor::from_vec(obs, (b, l, obs_dim), device)?,
            )]),
            goals: Tensor::from_vec(goals, (b, l, 1, goal_dim), device)?,
            rl2s: Tensor::from_vec(rl2s, (b, l, rl2_dim), device)?,
            actions: Tensor::from_vec(actions, (b, l - 1, a_dim), device)?,
            rews: Tensor::from_vec(rews, (b, l - 1, 1), device)?,
            dones: Tensor::from_vec(dones, (b, l - 1, 1), device)?,
            time_idxs: Tensor::from_vec(time_idxs, (b, l, 1), device)?,
        })
    }
}

impl ExperienceBufferBase for TrajectoryReplayBuffer {
    type Item = Option<Trajectory>;

    /// Stores a finished trajectory, `None` is ignored.
    fn push(&mut self, tr: Self::Item) -> Result<()> {
        let traj = match tr {
            Some(traj) => traj,
            None => return Ok(()),
        };
        traj.check()?;
        self.trajs.push_back(traj);
        while self.trajs.len() > self.capacity {
            self.trajs.pop_front();
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.trajs.len()
    }

    fn filter(&mut self, pct: f32) -> Result<usize> {
        let len = self.trajs.len();
        let n = ((len as f32 * pct.clamp(0.0, 1.0)).ceil() as usize).min(len);
        self.trajs.drain(..n);
        Ok(n)
    }
}

impl ReplayBufferBase for TrajectoryReplayBuffer {
    type Config = TrajectoryReplayBufferConfig;
    type Batch = TrajectoryBatch;

    fn build(config: &Self::Config) -> Result<Self> {
        if config.max_seq_len < 2 {
            return Err(AmagoError::Config("max_seq_len must be 2 or more".into()).into());
        }
        Ok(Self {
            capacity: config.capacity,
            max_seq_len: config.max_seq_len,
            trajs: VecDeque::new(),
            rng: SmallRng::seed_from_u64(config.seed),
            device: config.device.unwrap_or(crate::Device::Cpu).try_into()?,
        })
    }

    fn batch(&mut self, size: usize) -> Result<Self::Batch> {
        if self.trajs.is_empty() {
            bail!("cannot sample a batch from an empty replay buffer");
        }
        let ixs = (0..size)
            .map(|_| self.rng.gen_range(0..self.trajs.len()))
            .collect::<Vec<_>>();
        let trajs = ixs.iter().map(|ix| self.trajs[*ix].clone()).collect::<Vec<_>>();
        let windows = trajs.iter().map(|t| self.window(t)).collect::<Vec<_>>();
        let refs = trajs.iter().collect::<Vec<_>>();
        self.collate(&refs, &windows)
    }
}
