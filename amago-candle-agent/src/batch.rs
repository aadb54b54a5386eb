//! Batches of padded trajectory windows.
use amago_core::error::AmagoError;
use anyhow::{Context, Result};
use candle_core::{DType, Tensor, D};
use std::collections::HashMap;

/// Sentinel filling padded timesteps of every batch tensor.
///
/// A timestep is valid unless its whole rl2 vector equals this value.
pub const MAGIC_PAD_VAL: f32 = -4.0;

/// Key of the primary observation tensor in [`TrajectoryBatch::obs`].
pub const OBSERVATION_KEY: &str = "observation";

/// A batch of `B` trajectory windows with `L` timesteps each.
///
/// Observations, goals, rl2 vectors and time indices have an entry for every
/// timestep. Actions, rewards and dones are transitions between consecutive
/// timesteps, so they have `L - 1` entries.
#[derive(Debug, Clone)]
pub struct TrajectoryBatch {
    /// Named observation tensors, `[B, L, ...]`.
    pub obs: HashMap<String, Tensor>,

    /// Goals, `[B, L, goal_len, goal_dim]`.
    pub goals: Tensor,

    /// Reset flag, previous reward, time index and previous action, `[B, L, D_rl2]`.
    pub rl2s: Tensor,

    /// Actions, `[B, L - 1, A]`. One-hot for discrete action spaces.
    pub actions: Tensor,

    /// Rewards, `[B, L - 1, 1]`.
    pub rews: Tensor,

    /// Termination flags, `[B, L - 1, 1]`.
    pub dones: Tensor,

    /// Time indices, `[B, L, 1]`.
    pub time_idxs: Tensor,
}

impl TrajectoryBatch {
    /// Returns the primary observation tensor.
    pub fn observation(&self) -> Result<&Tensor> {
        self.obs
            .get(OBSERVATION_KEY)
            .with_context(|| format!("{} is not found in the batch", OBSERVATION_KEY))
    }

    /// Returns `(B, L)`.
    pub fn dims(&self) -> Result<(usize, usize)> {
        Ok(self.rl2s.dims3().map(|(b, l, _)| (b, l))?)
    }

    /// Returns the validity mask `[B, L, 1]`, 1.0 for real timesteps.
    pub fn state_mask(&self) -> Result<Tensor> {
        let is_pad = self
            .rl2s
            .eq(MAGIC_PAD_VAL as f64)?
            .to_dtype(DType::F32)?
            .min_keepdim(D::Minus1)?;
        Ok(is_pad.affine(-1.0, 1.0)?)
    }

    /// Checks that the tensors have consistent shapes.
    pub fn check_shapes(&self) -> Result<()> {
        let (b, l) = self.dims()?;
        if l < 2 {
            return Err(AmagoError::shape("rl2s", &[b, 2, 0], self.rl2s.dims()).into());
        }
        let check = |name: &str, t: &Tensor, expected: &[usize]| -> Result<()> {
            let actual = t.dims();
            if actual.len() < expected.len() || &actual[..expected.len()] != expected {
                return Err(AmagoError::shape(name, expected, actual).into());
            }
            Ok(())
        };
        for (k, v) in self.obs.iter() {
            check(k, v, &[b, l])?;
        }
        self.observation()?;
        check("goals", &self.goals, &[b, l])?;
        check("actions", &self.actions, &[b, l - 1])?;
        check("rews", &self.rews, &[b, l - 1, 1])?;
        check("dones", &self.dones, &[b, l - 1, 1])?;
        check("time_idxs", &self.time_idxs, &[b, l, 1])?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_state_mask() -> Result<()> {
        let p = MAGIC_PAD_VAL;
        // One real timestep, one timestep with a single padded-looking entry,
        // one padded timestep
        let rl2s = Tensor::from_slice(
            &[1f32, 0.0, 0.0, 0.0, p, 1.0, p, p, p],
            (1, 3, 3),
            &Device::Cpu,
        )?;
        let batch = TrajectoryBatch {
            obs: HashMap::from([(
                OBSERVATION_KEY.to_string(),
                Tensor::zeros((1, 3, 2), DType::F32, &Device::Cpu)?,
            )]),
            goals: Tensor::zeros((1, 3, 1, 1), DType::F32, &Device::Cpu)?,
            rl2s,
            actions: Tensor::zeros((1, 2, 1), DType::F32, &Device::Cpu)?,
            rews: Tensor::zeros((1, 2, 1), DType::F32, &Device::Cpu)?,
            dones: Tensor::zeros((1, 2, 1), DType::F32, &Device::Cpu)?,
            time_idxs: Tensor::zeros((1, 3, 1), DType::F32, &Device::Cpu)?,
        };
        batch.check_shapes()?;

        let mask = batch.state_mask()?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(mask, vec![1.0, 1.0, 0.0]);
        Ok(())
    }
}
