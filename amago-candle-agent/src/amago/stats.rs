//! Diagnostics recorded on logging steps.
use crate::{
    actor::ActionDistribution,
    util::{masked_avg, masked_avg_at},
};
use amago_core::record::{Record, RecordValue};
use anyhow::Result;
use candle_core::{DType, Tensor, D};
use rand::rngs::SmallRng;

fn valid_values(x: &Tensor, mask: &Tensor) -> Result<Vec<f32>> {
    let mask = mask
        .broadcast_as(x.shape())?
        .to_dtype(DType::F32)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    let x = x.detach().to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
    Ok(x.into_iter()
        .zip(mask)
        .filter(|(_, m)| *m > 0.0)
        .map(|(v, _)| v)
        .collect())
}

/// Statistics of critic outputs and TD targets.
///
/// `q_raw` and `q_norm` are `[B, L-1, C, G, 1]` with `critic_mask` of the
/// same shape, `td_target` is `[B, L-1, 1, G, 1]` with `td_mask`, and the
/// scaled rewards `r` are `[B, L-1, 1, 1, 1]`.
#[allow(clippy::too_many_arguments)]
pub(super) fn td_stats(
    record: &mut Record,
    gammas: &[f32],
    q_raw: &Tensor,
    q_norm: &Tensor,
    critic_mask: &Tensor,
    r: &Tensor,
    td_target: &Tensor,
    td_mask: &Tensor,
) -> Result<()> {
    let q_raw = q_raw.detach();
    let q_norm = q_norm.detach();
    for (i, gamma) in gammas.iter().enumerate() {
        record.insert_scalar(
            format!("Q(s, a) (global mean, rescaled) gamma={:.3}", gamma),
            masked_avg_at(&q_raw, critic_mask, 3, i)?,
        );
        record.insert_scalar(
            format!("Q(s, a) (global mean, normalized) gamma={:.3}", gamma),
            masked_avg_at(&q_norm, critic_mask, 3, i)?,
        );
    }

    if q_raw.dim(2)? > 1 {
        let stdev = q_raw.var_keepdim(2)?.sqrt()?;
        record.insert_scalar(
            "Q(s, a) Ensemble Stdev. (raw scale, ignoring padding)",
            masked_avg(&stdev, td_mask)?.to_scalar::<f32>()?,
        );
    }

    let td = td_target.detach();
    let valid = valid_values(&td, td_mask)?;
    if !valid.is_empty() {
        let min = valid.iter().copied().fold(f32::INFINITY, f32::min);
        let max = valid.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        record.insert_scalar("Min TD Target", min);
        record.insert_scalar("Max TD Target", max);
    }
    record.insert_scalar(
        "TD Target (test-time gamma)",
        masked_avg_at(&td, td_mask, 3, gammas.len() - 1)?,
    );
    let r = r.broadcast_as(td_mask.shape())?;
    record.insert_scalar(
        "Mean Reward (in training sequences)",
        masked_avg(&r, td_mask)?.to_scalar::<f32>()?,
    );
    Ok(())
}

/// Statistics of the action distribution `[B, L, G, A]` under `mask`
/// `[B, L, G, 1]`, reported for the primary gamma.
pub(super) fn policy_stats(
    record: &mut Record,
    a_dist: &ActionDistribution,
    mask: &Tensor,
    rng: &mut SmallRng,
) -> Result<()> {
    let a_dist = a_dist.detach();
    let g = mask.dim(2)?;
    match &a_dist {
        ActionDistribution::Discrete { .. } => {
            let probs = a_dist.probs()?;
            let entropy = a_dist.entropy()?;
            let low = probs.min_keepdim(D::Minus1)?;
            let high = probs.max_keepdim(D::Minus1)?;
            record.insert_scalar(
                "Policy Per-timestep Entropy (test-time gamma)",
                masked_avg_at(&entropy, mask, 2, g - 1)?,
            );
            record.insert_scalar(
                "Policy Per-timestep Low Prob. (test-time gamma)",
                masked_avg_at(&low, mask, 2, g - 1)?,
            );
            record.insert_scalar(
                "Policy Per-timestep High Prob. (test-time gamma)",
                masked_avg_at(&high, mask, 2, g - 1)?,
            );
            let highest = valid_values(&high, mask)?
                .into_iter()
                .fold(0f32, f32::max);
            record.insert_scalar("Policy Overall Highest Prob.", highest);
        }
        ActionDistribution::MultiBinary { .. } => {
            record.insert_scalar(
                "Policy Per-timestep Entropy (test-time gamma)",
                masked_avg_at(&a_dist.entropy()?, mask, 2, g - 1)?,
            );
        }
        ActionDistribution::TanhGaussian { std, .. } => {
            // Monte Carlo estimate from a single sample
            let a = a_dist.sample(rng)?.clamp(-0.999f32, 0.999f32)?;
            let entropy = a_dist.log_prob(&a)?.sum_keepdim(D::Minus1)?.neg()?;
            record.insert_scalar(
                "Policy Per-timestep Entropy (test-time gamma)",
                masked_avg_at(&entropy, mask, 2, g - 1)?,
            );
            record.insert_scalar(
                "Policy Std. (test-time gamma)",
                masked_avg_at(&std.mean_keepdim(D::Minus1)?, mask, 2, g - 1)?,
            );
        }
    }
    Ok(())
}

/// Statistics of the behavior cloning term. All tensors are `[B, L-1, G, 1]`.
pub(super) fn filter_stats(
    record: &mut Record,
    gammas: &[f32],
    logp_a: &Tensor,
    approved: &Tensor,
    mask: &Tensor,
) -> Result<()> {
    let logp = logp_a.detach().flatten_all()?;
    record.insert_scalar("Minimum Action Logprob", logp.min(0)?.to_scalar::<f32>()?);
    record.insert_scalar("Maximum Action Logprob", logp.max(0)?.to_scalar::<f32>()?);

    let approved = approved.detach().to_dtype(DType::F32)?;
    record.insert_scalar(
        "Pct. of Actions Approved by Binary FBC Filter (All Gammas)",
        masked_avg(&approved, mask)?.to_scalar::<f32>()? * 100.0,
    );
    for (i, gamma) in gammas.iter().enumerate() {
        record.insert_scalar(
            format!("Pct. of Actions Approved by Binary FBC (gamma = {:.3})", gamma),
            masked_avg_at(&approved, mask, 2, i)? * 100.0,
        );
    }
    Ok(())
}

fn histogram(bins: &[f32], num_bins: usize) -> Vec<f32> {
    let mut counts = vec![0f32; num_bins];
    for b in bins.iter() {
        if let Some(c) = counts.get_mut(*b as usize) {
            *c += 1.0;
        }
    }
    counts
}

/// Histograms of the most likely bin of two-hot critics.
///
/// `logits` are `[B, L-1, C, G, num_bins]` with `mask` `[B, L-1, C, G, 1]`.
pub(super) fn max_bin_stats(record: &mut Record, logits: &Tensor, mask: &Tensor) -> Result<()> {
    let num_bins = logits.dim(D::Minus1)?;
    let g = logits.dim(3)?;
    let max_bin = logits
        .detach()
        .argmax_keepdim(D::Minus1)?
        .to_dtype(DType::F32)?;
    let mask = mask.broadcast_as(max_bin.shape())?.contiguous()?;

    let all = valid_values(&max_bin, &mask)?;
    let primary = valid_values(&max_bin.narrow(3, g - 1, 1)?, &mask.narrow(3, g - 1, 1)?)?;
    if !all.is_empty() {
        let mean = all.iter().sum::<f32>() / all.len() as f32;
        record.insert_scalar("Mean Maximum Bin (All Gammas)", mean);
    }
    record.insert(
        "Maximum Bin (All Gammas)",
        RecordValue::Array1(histogram(&all, num_bins)),
    );
    record.insert(
        "Maximum Bin (test-time gamma)",
        RecordValue::Array1(histogram(&primary, num_bins)),
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_max_bin_histogram_ignores_padding() -> Result<()> {
        // [B=1, L-1=2, C=1, G=1, bins=3]
        let logits = Tensor::from_slice(
            &[0f32, 5.0, 0.0, 9.0, 0.0, 0.0],
            (1, 2, 1, 1, 3),
            &Device::Cpu,
        )?;
        let mask = Tensor::from_slice(&[1f32, 0.0], (1, 2, 1, 1, 1), &Device::Cpu)?;
        let mut record = Record::empty();
        max_bin_stats(&mut record, &logits, &mask)?;
        assert_eq!(
            record.get_array1("Maximum Bin (All Gammas)")?,
            vec![0.0, 1.0, 0.0]
        );
        assert_eq!(record.get_scalar("Mean Maximum Bin (All Gammas)")?, 1.0);
        Ok(())
    }
}
