//! Ensemble of critics evaluating every discount factor at once.
use crate::{
    mlp::{Activation, Mlp, MlpConfig},
    model::{SubModel1, SubModel2},
    util::{symexp, symlog},
};
use amago_core::error::AmagoError;
use anyhow::Result;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{ops::log_softmax, ops::softmax, VarBuilder};
use serde::{Deserialize, Serialize};

/// Output head of the critics.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum CriticKind {
    /// A single value per (critic, gamma).
    Scalar,

    /// Logits over bins evenly spaced in symlog space.
    TwoHot {
        /// Number of bins.
        num_bins: usize,

        /// Lowest bin center in symlog units.
        low: f32,

        /// Highest bin center in symlog units.
        high: f32,
    },
}

impl CriticKind {
    /// Two-hot critics with 64 bins in `[-10, 10]`.
    pub fn two_hot() -> Self {
        Self::TwoHot {
            num_bins: 64,
            low: -10.0,
            high: 10.0,
        }
    }

    fn out_dim(&self) -> usize {
        match self {
            Self::Scalar => 1,
            Self::TwoHot { num_bins, .. } => *num_bins,
        }
    }
}

impl Default for CriticKind {
    fn default() -> Self {
        Self::Scalar
    }
}

/// Configuration of [`NCritics`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct NCriticsConfig {
    /// Dimension of state representations.
    pub state_dim: usize,

    /// Dimension of actions.
    pub action_dim: usize,

    /// Discount factors. The last one is the primary gamma.
    pub gammas: Vec<f32>,

    /// Number of critics.
    pub num_critics: usize,

    /// Hidden units of each critic.
    pub units: Vec<usize>,

    /// Activation of hidden layers.
    pub activation: Activation,

    /// Output head.
    pub kind: CriticKind,
}

/// `C` independently parameterized critics.
///
/// For a state `[B, L, D]` and per-gamma actions `[B, L, G, A]`, every critic
/// sees the state concatenated with the action of gamma `g` and the feature
/// `ln(1 / (1 - gamma_g))`. Outputs are stacked along the critic axis, giving
/// `[B, L, C, G, 1]` for scalar critics and `[B, L, C, G, num_bins]` logits
/// for two-hot critics.
pub struct NCritics {
    critics: Vec<Mlp>,
    gamma_features: Tensor,
    kind: CriticKind,
    bin_centers: Option<Tensor>,
    device: Device,
}

impl NCritics {
    /// Number of critics.
    pub fn len(&self) -> usize {
        self.critics.len()
    }

    /// Returns `true` if the ensemble has no critic.
    pub fn is_empty(&self) -> bool {
        self.critics.is_empty()
    }

    /// Output head.
    pub fn kind(&self) -> &CriticKind {
        &self.kind
    }

    fn n_gammas(&self) -> usize {
        self.gamma_features.dims()[0]
    }

    fn input(&self, state: &Tensor, action: &Tensor) -> Result<Tensor> {
        let g = self.n_gammas();
        let (b, l, _d) = state.dims3()?;
        let (b_, l_, g_, _a) = action.dims4()?;
        if (b, l, g) != (b_, l_, g_) {
            return Err(AmagoError::shape("critic action", &[b, l, g], &[b_, l_, g_]).into());
        }
        let state = state
            .to_device(&self.device)?
            .unsqueeze(2)?
            .broadcast_as((b, l, g, state.dim(2)?))?;
        let gammas = self.gamma_features.broadcast_as((b, l, g, 1))?;
        let action = action.to_device(&self.device)?.to_dtype(DType::F32)?;
        Ok(Tensor::cat(&[&state, &action, &gammas], D::Minus1)?)
    }

    /// Evaluates the critics with the given indices.
    ///
    /// Returns the outputs and the last hidden activations, both stacked
    /// along the critic axis in the order of `idxs`.
    pub fn forward_subset(
        &self,
        state: &Tensor,
        action: &Tensor,
        idxs: &[usize],
    ) -> Result<(Tensor, Tensor)> {
        let input = self.input(state, action)?;
        let mut outs = Vec::with_capacity(idxs.len());
        let mut features = Vec::with_capacity(idxs.len());
        for &ix in idxs.iter() {
            let critic = self.critics.get(ix).ok_or_else(|| {
                AmagoError::Config(format!("critic index {} out of {}", ix, self.len()))
            })?;
            let (out, feature) = critic.forward_with_features(&input)?;
            outs.push(out);
            features.push(feature);
        }
        Ok((Tensor::stack(&outs, 2)?, Tensor::stack(&features, 2)?))
    }

    /// Converts logits `[..., num_bins]` into values `[..., 1]`.
    pub fn bin_dist_to_raw_vals(&self, logits: &Tensor) -> Result<Tensor> {
        self.bin_probs_to_raw_vals(&softmax(logits, D::Minus1)?)
    }

    /// Converts bin probabilities `[..., num_bins]` into values `[..., 1]`.
    ///
    /// The expectation over bin centers is taken in symlog space.
    pub fn bin_probs_to_raw_vals(&self, probs: &Tensor) -> Result<Tensor> {
        let centers = self.bin_centers()?;
        let expected = probs.broadcast_mul(centers)?.sum_keepdim(D::Minus1)?;
        symexp(&expected)
    }

    /// Two-hot labels `[..., num_bins]` of values `[..., 1]`.
    ///
    /// `symlog(value)` is clamped to the support and split between the two
    /// nearest bins so that the expectation over bin centers is preserved.
    pub fn raw_vals_to_labels(&self, values: &Tensor) -> Result<Tensor> {
        let (low, high, num_bins) = match self.kind {
            CriticKind::TwoHot {
                num_bins,
                low,
                high,
            } => (low, high, num_bins),
            CriticKind::Scalar => {
                return Err(AmagoError::Capability("scalar critics have no bins".into()).into())
            }
        };
        let width = (high - low) as f64 / (num_bins - 1) as f64;
        let centers = self.bin_centers()?;
        let y = symlog(values)?.clamp(low, high)?;
        let dist = y.broadcast_sub(centers)?.abs()?;
        Ok(dist.affine(-1.0 / width, 1.0)?.relu()?)
    }

    /// Soft-label cross entropy `[..., 1]` between logits and labels.
    pub fn cross_entropy(logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
        let logp = log_softmax(logits, D::Minus1)?;
        Ok((labels * logp)?.sum_keepdim(D::Minus1)?.neg()?)
    }

    fn bin_centers(&self) -> Result<&Tensor> {
        self.bin_centers
            .as_ref()
            .ok_or_else(|| AmagoError::Capability("scalar critics have no bins".into()).into())
    }
}

impl SubModel2 for NCritics {
    type Config = NCriticsConfig;
    type Input1 = Tensor;
    type Input2 = Tensor;
    type Output = (Tensor, Tensor);

    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self> {
        if config.gammas.is_empty() {
            return Err(AmagoError::Config("the set of discount factors is empty".into()).into());
        }
        let device = vb.device().clone();
        let in_dim = config.state_dim + config.action_dim + 1;
        let mlp_config = MlpConfig::new(in_dim, config.units.clone(), config.kind.out_dim(), false)
            .activation(config.activation);
        let critics = (0..config.num_critics)
            .map(|i| Mlp::build(vb.pp(format!("critic{}", i)), mlp_config.clone()))
            .collect::<Result<Vec<_>>>()?;

        let gamma_features = config
            .gammas
            .iter()
            .map(|g| (1.0 / (1.0 - g)).ln())
            .collect::<Vec<f32>>();
        let gamma_features = Tensor::from_vec(gamma_features, (config.gammas.len(), 1), &device)?;

        let bin_centers = match config.kind {
            CriticKind::Scalar => None,
            CriticKind::TwoHot {
                num_bins,
                low,
                high,
            } => {
                if num_bins < 2 {
                    let msg = "two-hot critics need 2 bins or more";
                    return Err(AmagoError::Config(msg.into()).into());
                }
                let step = (high - low) / (num_bins - 1) as f32;
                let centers = (0..num_bins).map(|i| low + step * i as f32).collect::<Vec<_>>();
                Some(Tensor::from_vec(centers, (num_bins,), &device)?)
            }
        };

        Ok(Self {
            critics,
            gamma_features,
            kind: config.kind,
            bin_centers,
            device,
        })
    }

    /// Evaluates all critics.
    fn forward(&self, state: &Tensor, action: &Tensor) -> Result<(Tensor, Tensor)> {
        let idxs = (0..self.len()).collect::<Vec<_>>();
        self.forward_subset(state, action, &idxs)
    }
}
