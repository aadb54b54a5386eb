//! Actor producing one action distribution per discount factor.
use crate::{
    mlp::{Activation, Mlp, MlpConfig},
    model::SubModel1,
    util::{atanh, log_jacobian_tanh, normal_logp},
};
use amago_core::error::AmagoError;
use anyhow::Result;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{ops::log_softmax, ops::sigmoid, ops::softmax, VarBuilder};
use rand::{rngs::SmallRng, Rng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Action space of the environment.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
pub enum ActionSpace {
    /// `n` discrete actions, represented as one-hot vectors.
    Discrete(usize),

    /// `n` independent binary actions.
    MultiBinary(usize),

    /// Continuous actions in `[-1, 1]^n`.
    Continuous(usize),
}

impl ActionSpace {
    /// Dimension of action vectors.
    pub fn action_dim(&self) -> usize {
        match self {
            Self::Discrete(n) | Self::MultiBinary(n) | Self::Continuous(n) => *n,
        }
    }

    /// Returns `true` for [`ActionSpace::Discrete`].
    pub fn is_discrete(&self) -> bool {
        matches!(self, Self::Discrete(_))
    }

    /// Number of outputs of the actor per gamma.
    fn n_params(&self) -> usize {
        match self {
            Self::Continuous(n) => 2 * n,
            _ => self.action_dim(),
        }
    }
}

/// Configuration of [`Actor`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ActorConfig {
    /// Dimension of state representations.
    pub state_dim: usize,

    /// Action space.
    pub action_space: ActionSpace,

    /// Number of discount factors.
    pub n_gammas: usize,

    /// Hidden units.
    pub units: Vec<usize>,

    /// Activation of hidden layers.
    pub activation: Activation,

    /// Lower bound of the log standard deviation of continuous actions.
    pub log_std_min: f64,

    /// Upper bound of the log standard deviation of continuous actions.
    pub log_std_max: f64,
}

/// A distribution over actions of shape `[..., G, A]`.
#[derive(Debug, Clone)]
pub enum ActionDistribution {
    /// Categorical distribution over one-hot actions.
    Discrete {
        /// Unnormalized log probabilities.
        logits: Tensor,
    },

    /// Independent Bernoulli distributions.
    MultiBinary {
        /// Logits of each dimension.
        logits: Tensor,
    },

    /// Gaussian squashed by `tanh`.
    TanhGaussian {
        /// Mean before squashing.
        mean: Tensor,

        /// Standard deviation before squashing.
        std: Tensor,
    },
}

fn softplus(x: &Tensor) -> Result<Tensor> {
    // relu(x) + ln(1 + exp(-|x|))
    let tail = (x.abs()?.neg()?.exp()? + 1.0)?.log()?;
    Ok((x.relu()? + tail)?)
}

fn uniform_like(t: &Tensor, rng: &mut SmallRng) -> Result<Vec<f32>> {
    Ok((0..t.elem_count()).map(|_| rng.gen::<f32>()).collect())
}

impl ActionDistribution {
    fn device(&self) -> &Device {
        match self {
            Self::Discrete { logits } | Self::MultiBinary { logits } => logits.device(),
            Self::TanhGaussian { mean, .. } => mean.device(),
        }
    }

    /// Returns `true` if [`ActionDistribution::rsample`] is supported.
    pub fn supports_pathwise_gradient(&self) -> bool {
        matches!(self, Self::TanhGaussian { .. })
    }

    /// Probabilities of discrete or binary actions.
    pub fn probs(&self) -> Result<Tensor> {
        match self {
            Self::Discrete { logits } => Ok(softmax(logits, D::Minus1)?),
            Self::MultiBinary { logits } => Ok(sigmoid(logits)?),
            Self::TanhGaussian { .. } => {
                Err(AmagoError::Capability("continuous actions have no probs".into()).into())
            }
        }
    }

    /// Draws actions without gradient.
    ///
    /// Discrete actions are one-hot vectors.
    pub fn sample(&self, rng: &mut SmallRng) -> Result<Tensor> {
        match self {
            Self::Discrete { logits } => {
                let probs = softmax(logits, D::Minus1)?.detach();
                let n = probs.dim(D::Minus1)?;
                let rows = probs.flatten_to(probs.rank() - 2)?.to_vec2::<f32>()?;
                let mut one_hot = vec![0f32; rows.len() * n];
                for (i, row) in rows.iter().enumerate() {
                    let u = rng.gen::<f32>();
                    let mut acc = 0f32;
                    let mut k = n - 1;
                    for (j, p) in row.iter().enumerate() {
                        acc += p;
                        if u < acc {
                            k = j;
                            break;
                        }
                    }
                    one_hot[i * n + k] = 1.0;
                }
                Ok(Tensor::from_vec(one_hot, probs.shape(), probs.device())?)
            }
            Self::MultiBinary { logits } => {
                let probs = sigmoid(logits)?.detach();
                let u = uniform_like(&probs, rng)?;
                let u = Tensor::from_vec(u, probs.shape(), probs.device())?;
                Ok(u.lt(&probs)?.to_dtype(DType::F32)?)
            }
            Self::TanhGaussian { .. } => Ok(self.rsample(rng)?.detach()),
        }
    }

    /// Draws reparameterized actions through which gradients flow.
    pub fn rsample(&self, rng: &mut SmallRng) -> Result<Tensor> {
        match self {
            Self::TanhGaussian { mean, std } => {
                let normal = Normal::new(0f32, 1f32)?;
                let z = (0..mean.elem_count())
                    .map(|_| normal.sample(rng))
                    .collect::<Vec<_>>();
                let z = Tensor::from_vec(z, mean.shape(), mean.device())?;
                Ok((mean + (std * z)?)?.tanh()?)
            }
            _ => Err(AmagoError::Capability(
                "reparameterized samples require continuous actions".into(),
            )
            .into()),
        }
    }

    /// The most likely action: index `[..., 1]` for discrete actions,
    /// action vectors otherwise.
    pub fn mode(&self) -> Result<Tensor> {
        match self {
            Self::Discrete { logits } => Ok(logits.argmax_keepdim(D::Minus1)?),
            Self::MultiBinary { logits } => Ok(logits.ge(0f64)?.to_dtype(DType::F32)?),
            Self::TanhGaussian { mean, .. } => Ok(mean.tanh()?),
        }
    }

    /// Log probabilities of actions.
    ///
    /// Discrete actions are one-hot and give `[..., 1]`. Binary and
    /// continuous actions give per-dimension values `[..., A]`.
    pub fn log_prob(&self, actions: &Tensor) -> Result<Tensor> {
        let actions = actions.to_device(self.device())?;
        match self {
            Self::Discrete { logits } => {
                let logp = log_softmax(logits, D::Minus1)?;
                Ok((actions * logp)?.sum_keepdim(D::Minus1)?)
            }
            Self::MultiBinary { logits } => {
                // a * logits - softplus(logits)
                Ok(((actions * logits)? - softplus(logits)?)?)
            }
            Self::TanhGaussian { mean, std } => {
                let u = atanh(&actions)?;
                let z = ((u - mean)? / std)?;
                Ok(((normal_logp(&z)? - std.log()?)? - log_jacobian_tanh(&actions, 1e-6)?)?)
            }
        }
    }

    /// Entropy `[..., 1]` of discrete or binary actions.
    pub fn entropy(&self) -> Result<Tensor> {
        match self {
            Self::Discrete { logits } => {
                let p = softmax(logits, D::Minus1)?;
                let logp = log_softmax(logits, D::Minus1)?;
                Ok((p * logp)?.sum_keepdim(D::Minus1)?.neg()?)
            }
            Self::MultiBinary { logits } => {
                let p = sigmoid(logits)?;
                // softplus(l) - p * l, per dimension
                let h = (softplus(logits)? - (&p * logits)?)?;
                Ok(h.sum_keepdim(D::Minus1)?)
            }
            Self::TanhGaussian { .. } => Err(AmagoError::Capability(
                "no closed-form entropy for tanh-squashed actions".into(),
            )
            .into()),
        }
    }

    /// Returns a copy cut from the computation graph.
    pub fn detach(&self) -> Self {
        match self {
            Self::Discrete { logits } => Self::Discrete {
                logits: logits.detach(),
            },
            Self::MultiBinary { logits } => Self::MultiBinary {
                logits: logits.detach(),
            },
            Self::TanhGaussian { mean, std } => Self::TanhGaussian {
                mean: mean.detach(),
                std: std.detach(),
            },
        }
    }
}

/// Policy network mapping state representations to [`ActionDistribution`]s.
pub struct Actor {
    config: ActorConfig,
    mlp: Mlp,
}

impl Actor {
    /// Action space.
    pub fn action_space(&self) -> ActionSpace {
        self.config.action_space
    }
}

impl SubModel1 for Actor {
    type Config = ActorConfig;
    type Input = Tensor;
    type Output = ActionDistribution;

    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self> {
        let out_dim = config.n_gammas * config.action_space.n_params();
        let mlp_config = MlpConfig::new(config.state_dim, config.units.clone(), out_dim, false)
            .activation(config.activation);
        let mlp = Mlp::build(vb, mlp_config)?;
        Ok(Self { config, mlp })
    }

    /// `[..., D]` to a distribution over `[..., G, A]`.
    fn forward(&self, state: &Tensor) -> Result<ActionDistribution> {
        let out = self.mlp.forward(state)?;
        let mut shape = out.dims()[..out.rank() - 1].to_vec();
        shape.extend([self.config.n_gammas, self.config.action_space.n_params()]);
        let out = out.reshape(shape)?;

        Ok(match self.config.action_space {
            ActionSpace::Discrete(_) => ActionDistribution::Discrete { logits: out },
            ActionSpace::MultiBinary(_) => ActionDistribution::MultiBinary { logits: out },
            ActionSpace::Continuous(n) => {
                let mean = out.narrow(D::Minus1, 0, n)?;
                let log_std = out
                    .narrow(D::Minus1, n, n)?
                    .clamp(self.config.log_std_min, self.config.log_std_max)?;
                ActionDistribution::TanhGaussian {
                    mean,
                    std: log_std.exp()?,
                }
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_nn::VarMap;
    use rand::SeedableRng;

    fn actor(action_space: ActionSpace) -> Result<Actor> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = ActorConfig {
            state_dim: 4,
            action_space,
            n_gammas: 2,
            units: vec![8],
            activation: Activation::LeakyReLU,
            log_std_min: -5.0,
            log_std_max: 2.0,
        };
        Actor::build(vb.pp("actor"), config)
    }

    #[test]
    fn test_discrete() -> Result<()> {
        let mut rng = SmallRng::seed_from_u64(42);
        let state = Tensor::ones((2, 5, 4), DType::F32, &Device::Cpu)?;
        let dist = actor(ActionSpace::Discrete(3))?.forward(&state)?;
        assert!(!dist.supports_pathwise_gradient());
        assert!(dist.rsample(&mut rng).is_err());

        let a = dist.sample(&mut rng)?;
        assert_eq!(a.dims(), [2, 5, 2, 3]);
        let row_sums = a.sum(D::Minus1)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(row_sums.iter().all(|s| *s == 1.0));

        // Probabilities of all actions sum to one
        let lp = (0..3)
            .map(|k| {
                let mut v = vec![0f32; 3];
                v[k] = 1.0;
                let onehot = Tensor::from_vec(v, (1, 1, 1, 3), &Device::Cpu)?
                    .broadcast_as((2, 5, 2, 3))?
                    .contiguous()?;
                Ok(dist.log_prob(&onehot)?.exp()?)
            })
            .collect::<Result<Vec<_>>>()?;
        let total = ((&lp[0] + &lp[1])? + &lp[2])?.flatten_all()?.to_vec1::<f32>()?;
        assert!(total.iter().all(|s| (s - 1.0).abs() < 1e-5));
        assert_eq!(dist.entropy()?.dims(), [2, 5, 2, 1]);
        Ok(())
    }

    #[test]
    fn test_tanh_gaussian() -> Result<()> {
        let mut rng = SmallRng::seed_from_u64(0);
        let state = Tensor::ones((2, 5, 4), DType::F32, &Device::Cpu)?;
        let dist = actor(ActionSpace::Continuous(3))?.forward(&state)?;
        assert!(dist.supports_pathwise_gradient());

        let a = dist.rsample(&mut rng)?;
        assert_eq!(a.dims(), [2, 5, 2, 3]);
        let max = a.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?;
        assert!(max <= 1.0);

        let lp = dist.log_prob(&a.clamp(-0.995, 0.995)?)?;
        assert_eq!(lp.dims(), [2, 5, 2, 3]);
        assert!(lp.flatten_all()?.to_vec1::<f32>()?.iter().all(|x| x.is_finite()));
        assert!(dist.entropy().is_err());
        Ok(())
    }

    #[test]
    fn test_multi_binary() -> Result<()> {
        let mut rng = SmallRng::seed_from_u64(1);
        let state = Tensor::ones((3, 4), DType::F32, &Device::Cpu)?;
        let dist = actor(ActionSpace::MultiBinary(2))?.forward(&state)?;
        let a = dist.sample(&mut rng)?;
        assert_eq!(a.dims(), [3, 2, 2]);

        // log p(1) and log p(0) of each dimension sum to one in probability space
        let p1 = dist.log_prob(&a.ones_like()?)?.exp()?;
        let p0 = dist.log_prob(&a.zeros_like()?)?.exp()?;
        let total = (p1 + p0)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(total.iter().all(|s| (s - 1.0).abs() < 1e-5));
        Ok(())
    }
}
