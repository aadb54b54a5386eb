//! Rolling per-actor context used during rollouts.
use crate::batch::MAGIC_PAD_VAL;
use amago_core::error::AmagoError;
use anyhow::Result;
use candle_core::{Device, Tensor};
use std::collections::VecDeque;

/// Keeps the most recent `max_seq_len` timesteps of each parallel actor.
///
/// Each timestep is a flat vector of `dim` values together with its time
/// index in the episode.
#[derive(Debug, Clone)]
pub struct SequenceBuffer {
    dim: usize,
    max_seq_len: usize,
    rows: Vec<VecDeque<(Vec<f32>, u32)>>,
}

impl SequenceBuffer {
    /// Creates an empty buffer for `n_actors` actors.
    pub fn new(n_actors: usize, dim: usize, max_seq_len: usize) -> Self {
        Self {
            dim,
            max_seq_len: max_seq_len.max(1),
            rows: vec![VecDeque::new(); n_actors],
        }
    }

    /// Number of actors.
    pub fn n_actors(&self) -> usize {
        self.rows.len()
    }

    /// Appends a timestep for every actor.
    ///
    /// The context of actors with `dones[i] == true` is cleared before
    /// appending, i.e., `values[i]` is the first timestep of a new episode.
    pub fn add_timestep(
        &mut self,
        values: &[Vec<f32>],
        time_idxs: &[u32],
        dones: &[bool],
    ) -> Result<()> {
        let n = self.n_actors();
        if values.len() != n || time_idxs.len() != n || dones.len() != n {
            let actual = [values.len(), time_idxs.len(), dones.len()];
            return Err(AmagoError::shape("timestep", &[n, n, n], &actual).into());
        }
        for (i, row) in self.rows.iter_mut().enumerate() {
            if values[i].len() != self.dim {
                return Err(AmagoError::shape("timestep", &[self.dim], &[values[i].len()]).into());
            }
            if dones[i] {
                row.clear();
            }
            row.push_back((values[i].clone(), time_idxs[i]));
            if row.len() > self.max_seq_len {
                row.pop_front();
            }
        }
        Ok(())
    }

    /// Clears the context of every actor.
    pub fn clear(&mut self) {
        self.rows.iter_mut().for_each(|row| row.clear());
    }

    /// Number of stored timesteps of each actor.
    pub fn sequence_lengths(&self) -> Vec<usize> {
        self.rows.iter().map(|row| row.len()).collect()
    }

    fn padded_len(&self) -> usize {
        self.rows.iter().map(|row| row.len()).max().unwrap_or(0).max(1)
    }

    /// Returns `[N, L, dim]` where `L` is the longest context, right-padded
    /// with [`MAGIC_PAD_VAL`].
    pub fn sequences(&self, device: &Device) -> Result<Tensor> {
        let l = self.padded_len();
        let mut data = Vec::with_capacity(self.n_actors() * l * self.dim);
        for row in self.rows.iter() {
            for (v, _) in row.iter() {
                data.extend(v.iter().copied());
            }
            data.extend(std::iter::repeat(MAGIC_PAD_VAL).take((l - row.len()) * self.dim));
        }
        Ok(Tensor::from_vec(data, (self.n_actors(), l, self.dim), device)?)
    }

    /// Returns the time indices `[N, L, 1]` aligned with
    /// [`SequenceBuffer::sequences`]. Padded entries are 0.
    pub fn time_idxs(&self, device: &Device) -> Result<Tensor> {
        let l = self.padded_len();
        let mut data = Vec::with_capacity(self.n_actors() * l);
        for row in self.rows.iter() {
            data.extend(row.iter().map(|(_, t)| *t as f32));
            data.extend(std::iter::repeat(0f32).take(l - row.len()));
        }
        Ok(Tensor::from_vec(data, (self.n_actors(), l, 1), device)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reset_on_done() -> Result<()> {
        let mut buf = SequenceBuffer::new(2, 1, 3);
        buf.add_timestep(&[vec![0.0], vec![10.0]], &[0, 0], &[true, true])?;
        buf.add_timestep(&[vec![1.0], vec![11.0]], &[1, 1], &[false, false])?;
        buf.add_timestep(&[vec![2.0], vec![0.0]], &[2, 0], &[false, true])?;
        assert_eq!(buf.sequence_lengths(), vec![3, 1]);

        // The oldest timestep is dropped beyond max_seq_len
        buf.add_timestep(&[vec![3.0], vec![1.0]], &[3, 1], &[false, false])?;
        assert_eq!(buf.sequence_lengths(), vec![3, 2]);

        let seqs = buf.sequences(&Device::Cpu)?;
        assert_eq!(seqs.dims(), [2, 3, 1]);
        assert_eq!(
            seqs.flatten_all()?.to_vec1::<f32>()?,
            vec![1.0, 2.0, 3.0, 0.0, 1.0, MAGIC_PAD_VAL]
        );
        let time_idxs = buf.time_idxs(&Device::Cpu)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(time_idxs, vec![1.0, 2.0, 3.0, 0.0, 1.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_wrong_number_of_actors() {
        let mut buf = SequenceBuffer::new(2, 1, 3);
        assert!(buf.add_timestep(&[vec![0.0]], &[0], &[true]).is_err());
    }
}
