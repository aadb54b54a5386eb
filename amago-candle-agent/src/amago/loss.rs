//! The fused critic and actor objectives.
use super::{stats, Amago};
use crate::{
    actor::{ActionDistribution, ActionSpace},
    batch::TrajectoryBatch,
    critic::{CriticKind, NCritics},
    model::{SubModel1, SubModel2},
    util::masked_avg,
};
use amago_core::{error::AmagoError, record::Record};
use anyhow::Result;
use candle_core::{DType, Tensor, D};
use rand::{rngs::SmallRng, Rng};

/// Losses of one batch.
///
/// `critic_loss` and `actor_loss` are masked means. The elementwise terms
/// and their masks are kept for inspection.
#[derive(Debug, Clone)]
pub struct LossOutput {
    /// Masked mean of the critic loss, `None` when no critic is trained.
    pub critic_loss: Option<Tensor>,

    /// Masked mean of the actor loss.
    pub actor_loss: Tensor,

    /// Validity mask of the timesteps, `[B, L, 1]`.
    pub mask: Tensor,

    /// Critic loss per critic and gamma, `[B, L-1, C, G, 1]`.
    pub critic_loss_elementwise: Option<Tensor>,

    /// Mask of the critic loss, `[B, L-1, C, G, 1]`.
    pub critic_mask: Tensor,

    /// Actor loss per gamma, `[B, L-1, G, 1]`.
    pub actor_loss_elementwise: Tensor,

    /// Mask of the actor loss, `[B, L-1, G, 1]`.
    pub actor_mask: Tensor,
}

/// Aggregates TD targets over a subset of the ensemble.
///
/// `ensemble` is `[B, L, C, G, 1]` and `idxs` is a `u32` tensor
/// `[B, L, K, G, 1]` of critic indices. The selected targets are reduced
/// over the critic axis with the minimum (`use_min`) or the mean, giving
/// `[B, L, 1, G, 1]`.
pub fn aggregate_td_targets(ensemble: &Tensor, idxs: &Tensor, use_min: bool) -> Result<Tensor> {
    let subset = ensemble.contiguous()?.gather(&idxs.contiguous()?, 2)?;
    match use_min {
        true => Ok(subset.min_keepdim(2)?),
        false => Ok(subset.mean_keepdim(2)?),
    }
}

/// Critic indices drawn uniformly with replacement, independently for every
/// `(b, t, g)`, as a `u32` tensor `[B, L, K, G, 1]`.
fn redq_indices(
    rng: &mut SmallRng,
    shape: (usize, usize, usize, usize),
    num_critics: usize,
    device: &candle_core::Device,
) -> Result<Tensor> {
    let (b, l, k, g) = shape;
    let idxs = (0..b * l * k * g)
        .map(|_| rng.gen_range(0..num_critics) as u32)
        .collect::<Vec<_>>();
    Ok(Tensor::from_vec(idxs, (b, l, k, g, 1), device)?)
}

/// `r + gamma (1 - d) q` for `q [B, L, C, G, 1]`.
fn td_ensemble(r: &Tensor, d: &Tensor, gammas: &Tensor, q: &Tensor) -> Result<Tensor> {
    let not_done = d.affine(-1.0, 1.0)?;
    let discounted = q.broadcast_mul(&not_done)?.broadcast_mul(gammas)?;
    Ok(discounted.broadcast_add(r)?)
}

/// Log-likelihood `[B, L, G, 1]` of the replayed actions.
fn action_logp(a_dist: &ActionDistribution, a_buffer: &Tensor) -> Result<Tensor> {
    let logp = match a_dist {
        ActionDistribution::Discrete { .. } => a_dist.log_prob(a_buffer)?,
        ActionDistribution::MultiBinary { .. } => {
            a_dist.log_prob(a_buffer)?.mean_keepdim(D::Minus1)?
        }
        ActionDistribution::TanhGaussian { .. } => {
            let a = a_buffer.clamp(-0.995f32, 0.995f32)?;
            a_dist.log_prob(&a)?.sum_keepdim(D::Minus1)?
        }
    };
    Ok(logp)
}

/// Tensors shared by both critic heads.
struct Prepared {
    b: usize,
    l: usize,
    s_rep: Tensor,
    a_buffer: Tensor,
    r: Tensor,
    d: Tensor,
    gammas: Tensor,
    state_mask: Tensor,
    actor_mask: Tensor,
    critic_mask: Tensor,
    td_mask: Tensor,
    a_dist: ActionDistribution,
}

/// What the critic branch hands to the actor branch.
struct CriticTerms {
    loss: Tensor,
    q_s_a: Tensor,
    q_s_a_agent: Option<Tensor>,
}

impl<E, R> Amago<E, R> {
    /// TD targets of scalar critics take the minimum over the critic subset
    /// when the policy gradient term is on. Otherwise, and always for
    /// two-hot critics, they take the mean.
    fn td_uses_min(&self) -> bool {
        matches!(self.config.critic_kind, CriticKind::Scalar) && self.config.online_coeff > 0.0
    }

    fn prepare(&self, batch: &TrajectoryBatch) -> Result<Prepared> {
        batch.check_shapes()?;
        let (b, l) = batch.dims()?;
        let g = self.gammas.len();
        let c = self.config.num_critics;

        let o = self
            .tstep_encoder
            .encode(batch.observation()?, &batch.goals, &batch.rl2s)?;
        let (s_rep, _) = self.traj_encoder.encode(&o, &batch.time_idxs, None)?;

        let a = batch.actions.to_dtype(DType::F32)?;
        let a = match self.config.action_space {
            ActionSpace::Discrete(_) => a.clamp(0f32, 1f32)?,
            _ => a.clamp(-1f32, 1f32)?,
        };
        let a_dim = a.dim(2)?;
        if a_dim != self.config.action_space.action_dim() {
            let expected = [b, l - 1, self.config.action_space.action_dim()];
            return Err(AmagoError::shape("actions", &expected, a.dims()).into());
        }
        let a_last = a.narrow(1, l - 2, 1)?;
        let a_buffer = Tensor::cat(&[&a, &a_last], 1)?
            .unsqueeze(2)?
            .broadcast_as((b, l, g, a_dim))?
            .contiguous()?;

        let r = (batch.rews.to_dtype(DType::F32)? * self.config.reward_multiplier as f64)?
            .reshape((b, l - 1, 1, 1, 1))?;
        let d = batch.dones.to_dtype(DType::F32)?.reshape((b, l - 1, 1, 1, 1))?;
        let gammas = Tensor::from_vec(self.gammas.clone(), (g, 1), &self.device)?;

        let state_mask = batch.state_mask()?;
        let actor_mask = state_mask
            .narrow(1, 0, l - 1)?
            .reshape((b, l - 1, 1, 1))?
            .broadcast_as((b, l - 1, g, 1))?
            .contiguous()?;
        let next_mask = state_mask.narrow(1, 1, l - 1)?.reshape((b, l - 1, 1, 1, 1))?;
        let critic_mask = next_mask.broadcast_as((b, l - 1, c, g, 1))?.contiguous()?;
        // valid for every critic
        let td_mask = critic_mask.min_keepdim(2)?;

        let a_dist = self.actor.forward(&s_rep)?;

        Ok(Prepared {
            b,
            l,
            s_rep,
            a_buffer,
            r,
            d,
            gammas,
            state_mask,
            actor_mask,
            critic_mask,
            td_mask,
            a_dist,
        })
    }

    /// Next actions `[B, L, G, A]` for TD targets, without gradient.
    fn next_actions(&mut self, p: &Prepared, probs_if_discrete: bool) -> Result<Tensor> {
        let ap_dist = match self.config.use_target_actor {
            true => self.target_actor.forward(&p.s_rep.detach())?,
            false => p.a_dist.detach(),
        };
        let ap = match (&ap_dist, probs_if_discrete) {
            (ActionDistribution::Discrete { .. }, true) => ap_dist.probs()?,
            _ => ap_dist.sample(&mut self.rng)?,
        };
        Ok(ap.detach())
    }

    fn scalar_critic(
        &mut self,
        p: &Prepared,
        stats: &mut Option<&mut Record>,
    ) -> Result<CriticTerms> {
        let (b, l) = (p.b, p.l);
        let g = self.gammas.len();
        let c = self.config.num_critics;
        let s_rep = &p.s_rep;

        let a_agent = match &p.a_dist {
            ActionDistribution::Discrete { .. } => p.a_dist.probs()?,
            _ if p.a_dist.supports_pathwise_gradient() => p.a_dist.rsample(&mut self.rng)?,
            _ => p.a_dist.sample(&mut self.rng)?,
        };
        let (q_s_a_agent, _) = self.maximized_critics.forward(&s_rep.detach(), &a_agent)?;
        let (q_s_a, _) = self.critics.forward(
            &s_rep.narrow(1, 0, l - 1)?,
            &p.a_buffer.narrow(1, 0, l - 1)?,
        )?;

        let td_target = {
            let ap = self.next_actions(p, true)?.narrow(1, 1, l - 1)?;
            let sp = s_rep.narrow(1, 1, l - 1)?.detach();
            let (q_targ, _) = self.target_critics.forward(&sp, &ap)?;
            let q_targ = self.popart.forward(&q_targ.detach(), false)?;
            let ensemble = td_ensemble(&p.r, &p.d, &p.gammas, &q_targ)?;
            let k = self.config.num_critics_td;
            let idxs = redq_indices(&mut self.rng, (b, l - 1, k, g), c, &self.device)?;
            aggregate_td_targets(&ensemble, &idxs, self.td_uses_min())?
        }
        .detach();

        self.popart.update_stats(&td_target, &p.td_mask)?;
        let td_target_norm = self.popart.normalize_values(&td_target)?.detach();
        let q_norm = self.popart.forward(&q_s_a, true)?;
        let loss = q_norm.broadcast_sub(&td_target_norm)?.sqr()?;

        if let Some(record) = stats.as_deref_mut() {
            let q_raw = self.popart.forward(&q_s_a.detach(), false)?;
            stats::td_stats(
                record,
                &self.gammas,
                &q_raw,
                &q_norm,
                &p.critic_mask,
                &p.r,
                &td_target,
                &p.td_mask,
            )?;
        }

        Ok(CriticTerms {
            loss,
            q_s_a,
            q_s_a_agent: Some(q_s_a_agent),
        })
    }

    fn two_hot_critic(
        &mut self,
        p: &Prepared,
        stats: &mut Option<&mut Record>,
    ) -> Result<CriticTerms> {
        let (b, l) = (p.b, p.l);
        let g = self.gammas.len();
        let c = self.config.num_critics;
        let s_rep = &p.s_rep;

        let td_target = {
            let ap = self.next_actions(p, false)?.narrow(1, 1, l - 1)?;
            let sp = s_rep.narrow(1, 1, l - 1)?.detach();
            let (logits, _) = self.target_critics.forward(&sp, &ap)?;
            let q_targ = self.target_critics.bin_dist_to_raw_vals(&logits.detach())?;
            let ensemble = td_ensemble(&p.r, &p.d, &p.gammas, &q_targ)?;
            let k = self.config.num_critics_td;
            let idxs = redq_indices(&mut self.rng, (b, l - 1, k, g), c, &self.device)?;
            aggregate_td_targets(&ensemble, &idxs, self.td_uses_min())?
        }
        .detach();

        // Statistics only, two-hot critics learn unnormalized values
        self.popart.update_stats(&td_target, &p.td_mask)?;
        let labels = self.target_critics.raw_vals_to_labels(&td_target)?;
        let n_bins = labels.dim(D::Minus1)?;
        let labels = labels.broadcast_as((b, l - 1, c, g, n_bins))?.detach();

        let (q_logits, _) = self.critics.forward(s_rep, &p.a_buffer)?;
        let q_logits = q_logits.narrow(1, 0, l - 1)?;
        let loss = NCritics::cross_entropy(&q_logits, &labels)?;
        let q_s_a = self.critics.bin_dist_to_raw_vals(&q_logits)?;

        if let Some(record) = stats.as_deref_mut() {
            let q_norm = self.popart.normalize_values(&q_s_a.detach())?;
            stats::td_stats(
                record,
                &self.gammas,
                &q_s_a,
                &q_norm,
                &p.critic_mask,
                &p.r,
                &td_target,
                &p.td_mask,
            )?;
            stats::max_bin_stats(record, &q_logits, &p.critic_mask)?;
        }

        Ok(CriticTerms {
            loss,
            q_s_a,
            q_s_a_agent: None,
        })
    }

    /// Mean critic value `[B, L-1, G, 1]` of `fbc_filter_k` actions of the
    /// policy.
    ///
    /// `first` holds the values `[B, L-1, C, G, 1]` of the policy actions
    /// scored for the policy gradient term and counts as the first of the
    /// `fbc_filter_k` estimates. The remaining estimates score sampled
    /// actions. For discrete actions `first` scores the action
    /// probabilities, which makes it the expected value under the policy,
    /// while the sampled one-hot actions are single-action estimates of the
    /// same expectation.
    fn sampled_value(&mut self, p: &Prepared, first: Option<&Tensor>) -> Result<Tensor> {
        let k = self.config.fbc_filter_k;
        let l = p.l;
        let mut vals = vec![];
        if let Some(q) = first {
            vals.push(q.mean(2)?);
        }
        while vals.len() < k {
            let a = p.a_dist.sample(&mut self.rng)?;
            let val = match self.config.critic_kind {
                CriticKind::Scalar => self.maximized_critics.forward(&p.s_rep.detach(), &a)?.0,
                CriticKind::TwoHot { .. } => {
                    let (logits, _) = self.critics.forward(&p.s_rep.detach(), &a)?;
                    self.critics.bin_dist_to_raw_vals(&logits)?
                }
            };
            vals.push(val.narrow(1, 0, l - 1)?.mean(2)?);
        }
        Ok(Tensor::stack(&vals, 0)?.mean(0)?.detach())
    }

    /// Computes the critic and actor losses of `batch` in one forward pass.
    ///
    /// Statistics are written into `stats` when it is given. The value
    /// normalizer is updated with the TD targets of the batch.
    ///
    /// # Errors
    ///
    /// Returns [`AmagoError::Shape`] for malformed batches and
    /// [`AmagoError::Capability`] when the policy gradient term is enabled
    /// for an actor without reparameterized samples.
    pub fn compute_loss(
        &mut self,
        batch: &TrajectoryBatch,
        mut stats: Option<&mut Record>,
    ) -> Result<LossOutput> {
        let p = self.prepare(batch)?;
        let (b, l) = (p.b, p.l);
        let g = self.gammas.len();
        let online = self.config.online_coeff;
        let offline = self.config.offline_coeff;
        let fake_filter = self.config.fake_filter;

        if online > 0.0 && !p.a_dist.supports_pathwise_gradient() {
            let msg = "the policy gradient term requires reparameterized actions";
            return Err(AmagoError::Capability(msg.into()).into());
        }

        if let Some(record) = stats.as_deref_mut() {
            let mask = p
                .state_mask
                .reshape((b, l, 1, 1))?
                .broadcast_as((b, l, g, 1))?;
            stats::policy_stats(record, &p.a_dist, &mask, &mut self.rng)?;
        }

        let scalar = matches!(self.config.critic_kind, CriticKind::Scalar);
        let critic = match (!fake_filter || online > 0.0, scalar) {
            (false, _) => None,
            (true, true) => Some(self.scalar_critic(&p, &mut stats)?),
            (true, false) => Some(self.two_hot_critic(&p, &mut stats)?),
        };

        let mut actor_loss = Tensor::zeros((b, l - 1, g, 1), DType::F32, &self.device)?;

        if online > 0.0 {
            let q = match (&critic, scalar) {
                (Some(CriticTerms { q_s_a_agent: Some(q), .. }), true) => {
                    self.popart.forward(&q.narrow(1, 0, l - 1)?.min(2)?, true)?
                }
                _ => {
                    let a_agent = p.a_dist.rsample(&mut self.rng)?;
                    let (logits, _) = self.maximized_critics.forward(&p.s_rep.detach(), &a_agent)?;
                    let q = self.maximized_critics.bin_dist_to_raw_vals(&logits)?.min(2)?;
                    self.popart.normalize_values(&q.narrow(1, 0, l - 1)?)?
                }
            };
            actor_loss = (actor_loss - (q * online as f64)?)?;
        }

        if offline > 0.0 {
            let (filter, approved) = match &critic {
                Some(terms) if !fake_filter => {
                    let first = match scalar {
                        true => terms
                            .q_s_a_agent
                            .as_ref()
                            .map(|q| q.narrow(1, 0, l - 1))
                            .transpose()?,
                        false => None,
                    };
                    let val = self.sampled_value(&p, first.as_ref())?;
                    let adv = (terms.q_s_a.detach().mean(2)? - val)?;
                    let filter = self.config.advantage_filter.apply(&adv)?;
                    (filter, Some(adv.gt(0f64)?))
                }
                _ => (actor_loss.ones_like()?, None),
            };
            let logp_a = action_logp(&p.a_dist, &p.a_buffer)?
                .narrow(1, 0, l - 1)?
                .clamp(-1e3f32, 1e3f32)?;
            if let (Some(record), Some(approved)) = (stats.as_deref_mut(), approved.as_ref()) {
                stats::filter_stats(record, &self.gammas, &logp_a, approved, &p.actor_mask)?;
            }
            let bc = (filter.detach() * logp_a)?;
            actor_loss = (actor_loss - (bc * offline as f64)?)?;
        }

        let critic_loss_elementwise = critic.map(|terms| terms.loss);
        let critic_loss = critic_loss_elementwise
            .as_ref()
            .map(|loss| masked_avg(loss, &p.critic_mask))
            .transpose()?;
        let actor_loss_masked = masked_avg(&actor_loss, &p.actor_mask)?;

        Ok(LossOutput {
            critic_loss,
            actor_loss: actor_loss_masked,
            mask: p.state_mask,
            critic_loss_elementwise,
            critic_mask: p.critic_mask,
            actor_loss_elementwise: actor_loss,
            actor_mask: p.actor_mask,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{amago::AmagoConfig, critic::CriticKind};
    use candle_core::Device;

    fn td_uses_min(config: AmagoConfig) -> Result<bool> {
        Ok(Amago::<(), ()>::new(config)?.td_uses_min())
    }

    #[test]
    fn test_td_aggregation_choice() -> Result<()> {
        let config = AmagoConfig::new(2, 1, ActionSpace::Continuous(1));
        assert!(td_uses_min(config.clone())?);
        assert!(!td_uses_min(config.clone().online_coeff(0.0))?);
        assert!(!td_uses_min(config.clone().critic_kind(CriticKind::two_hot()))?);
        assert!(!td_uses_min(config.multi_task())?);
        Ok(())
    }

    fn ensemble() -> Result<Tensor> {
        // [B=1, L=2, C=3, G=2, 1]
        let q = [
            1f32, 10.0, // critic 0, gammas 0 and 1
            2.0, 30.0, // critic 1
            3.0, 20.0, // critic 2
            -1.0, 0.0, // next timestep
            -3.0, 6.0, //
            -2.0, 3.0, //
        ];
        Ok(Tensor::from_slice(&q, (1, 2, 3, 2, 1), &Device::Cpu)?)
    }

    fn all_critics() -> Result<Tensor> {
        let idxs = Tensor::arange(0u32, 3, &Device::Cpu)?.reshape((1, 1, 3, 1, 1))?;
        Ok(idxs.broadcast_as((1, 2, 3, 2, 1))?.contiguous()?)
    }

    #[test]
    fn test_aggregate_min_with_full_ensemble() -> Result<()> {
        let td = aggregate_td_targets(&ensemble()?, &all_critics()?, true)?;
        assert_eq!(td.dims(), [1, 2, 1, 2, 1]);
        assert_eq!(td.flatten_all()?.to_vec1::<f32>()?, vec![1.0, 10.0, -3.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_aggregate_mean_with_full_ensemble() -> Result<()> {
        let td = aggregate_td_targets(&ensemble()?, &all_critics()?, false)?;
        assert_eq!(td.flatten_all()?.to_vec1::<f32>()?, vec![2.0, 20.0, -2.0, 3.0]);
        Ok(())
    }

    #[test]
    fn test_aggregate_subset() -> Result<()> {
        // Critic 1 twice at the first timestep, critics 0 and 2 at the second
        let idxs = Tensor::from_slice(
            &[1u32, 1, 1, 1, 0, 2, 2, 0],
            (1, 2, 2, 2, 1),
            &Device::Cpu,
        )?;
        let td = aggregate_td_targets(&ensemble()?, &idxs, true)?;
        assert_eq!(td.flatten_all()?.to_vec1::<f32>()?, vec![2.0, 30.0, -2.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_td_ensemble() -> Result<()> {
        let r = Tensor::from_slice(&[1f32, 2.0], (1, 2, 1, 1, 1), &Device::Cpu)?;
        let d = Tensor::from_slice(&[0f32, 1.0], (1, 2, 1, 1, 1), &Device::Cpu)?;
        let gammas = Tensor::from_slice(&[0.5f32, 1.0], (2, 1), &Device::Cpu)?;
        let q = Tensor::ones((1, 2, 1, 2, 1), DType::F32, &Device::Cpu)?;
        let td = td_ensemble(&r, &d, &gammas, &q)?;
        assert_eq!(td.flatten_all()?.to_vec1::<f32>()?, vec![1.5, 2.0, 2.0, 2.0]);
        Ok(())
    }
}
