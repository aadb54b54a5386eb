//! Timestep and trajectory encoders.
//!
//! The timestep encoder embeds each timestep independently. The trajectory
//! encoder turns the sequence of embeddings into state representations,
//! carrying a hidden state across calls during rollouts.
use crate::{
    mlp::{Activation, Mlp, MlpConfig},
    model::SubModel1,
};
use amago_core::error::AmagoError;
use anyhow::Result;
use candle_core::{DType, Module, Tensor, D};
use candle_nn::{
    layer_norm, linear,
    rnn::{gru, GRUConfig, GRUState, GRU, RNN},
    LayerNorm, Linear, VarBuilder,
};
use serde::{Deserialize, Serialize};

/// Configuration of [`TstepEncoder`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct TstepEncoderConfig {
    /// Dimension of flattened observations.
    pub obs_dim: usize,

    /// Dimension of flattened goals.
    pub goal_dim: usize,

    /// Dimension of rl2 vectors.
    pub rl2_dim: usize,

    /// Number of linear layers.
    pub n_layers: usize,

    /// Hidden units.
    pub d_hidden: usize,

    /// Output dimension.
    pub d_output: usize,

    /// Activation of hidden layers.
    pub activation: Activation,

    /// If `true`, rl2 vectors are replaced with zeros.
    pub hide_rl2s: bool,
}

impl TstepEncoderConfig {
    /// Configuration with 2 layers, 512 hidden units and 256 outputs.
    pub fn new(obs_dim: usize, goal_dim: usize, rl2_dim: usize) -> Self {
        Self {
            obs_dim,
            goal_dim,
            rl2_dim,
            n_layers: 2,
            d_hidden: 512,
            d_output: 256,
            activation: Activation::LeakyReLU,
            hide_rl2s: false,
        }
    }
}

/// Feed-forward timestep encoder followed by layer normalization.
///
/// Inputs are flattened observations, rl2 vectors and flattened goals,
/// concatenated in this order.
pub struct TstepEncoder {
    config: TstepEncoderConfig,
    mlp: Mlp,
    out_norm: LayerNorm,
}

impl TstepEncoder {
    /// Dimension of embeddings.
    pub fn emb_dim(&self) -> usize {
        self.config.d_output
    }

    /// Embeds `obs [B, L, ...]`, `goals [B, L, ...]` and `rl2s [B, L, D]`.
    pub fn encode(&self, obs: &Tensor, goals: &Tensor, rl2s: &Tensor) -> Result<Tensor> {
        let obs = obs.flatten_from(2)?.to_dtype(DType::F32)?;
        let goals = goals.flatten_from(2)?.to_dtype(DType::F32)?;
        let rl2s = match self.config.hide_rl2s {
            true => rl2s.zeros_like()?,
            false => rl2s.clone(),
        };
        let expected = self.config.obs_dim + self.config.goal_dim + self.config.rl2_dim;
        let input = Tensor::cat(&[&obs, &rl2s, &goals], D::Minus1)?;
        if input.dim(D::Minus1)? != expected {
            let actual = input.dim(D::Minus1)?;
            return Err(AmagoError::shape("timestep input", &[expected], &[actual]).into());
        }
        Ok(self.out_norm.forward(&self.mlp.forward(&input)?)?)
    }
}

impl SubModel1 for TstepEncoder {
    type Config = TstepEncoderConfig;
    type Input = (Tensor, Tensor, Tensor);
    type Output = Tensor;

    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self> {
        let in_dim = config.obs_dim + config.goal_dim + config.rl2_dim;
        let units = vec![config.d_hidden; config.n_layers.saturating_sub(1)];
        let mlp_config =
            MlpConfig::new(in_dim, units, config.d_output, false).activation(config.activation);
        let mlp = Mlp::build(vb.clone(), mlp_config)?;
        let out_norm = layer_norm(config.d_output, 1e-5, vb.pp("out_norm"))?;
        Ok(Self {
            config,
            mlp,
            out_norm,
        })
    }

    fn forward(&self, (obs, goals, rl2s): &Self::Input) -> Result<Tensor> {
        self.encode(obs, goals, rl2s)
    }
}

/// Architecture of [`TrajEncoder`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum TrajEncoderKind {
    /// Single-layer GRU.
    Gru {
        /// Size of the hidden state.
        d_hidden: usize,
    },

    /// Feed-forward network without memory.
    Ff {
        /// Hidden units.
        d_hidden: usize,
    },
}

/// Configuration of [`TrajEncoder`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct TrajEncoderConfig {
    /// Dimension of timestep embeddings.
    pub tstep_dim: usize,

    /// Dimension of state representations.
    pub d_output: usize,

    /// Architecture.
    pub kind: TrajEncoderKind,
}

impl TrajEncoderConfig {
    /// A GRU encoder.
    pub fn gru(tstep_dim: usize, d_hidden: usize, d_output: usize) -> Self {
        Self {
            tstep_dim,
            d_output,
            kind: TrajEncoderKind::Gru { d_hidden },
        }
    }
}

enum Backbone {
    Gru(GRU, usize),
    Ff(Mlp),
}

/// Sequence model producing state representations `[B, L, d_output]`.
pub struct TrajEncoder {
    backbone: Backbone,
    out: Linear,
    out_norm: LayerNorm,
    d_output: usize,
}

impl TrajEncoder {
    /// Dimension of state representations.
    pub fn emb_dim(&self) -> usize {
        self.d_output
    }

    /// A fresh hidden state for `n` parallel actors, `None` for encoders
    /// without memory.
    pub fn init_hidden_state(
        &self,
        n: usize,
        device: &candle_core::Device,
    ) -> Result<Option<Tensor>> {
        match &self.backbone {
            Backbone::Gru(_, d_hidden) => {
                Ok(Some(Tensor::zeros((n, *d_hidden), DType::F32, device)?))
            }
            Backbone::Ff(_) => Ok(None),
        }
    }

    /// Zeroes the hidden state of the actors with `dones[i] == true`.
    pub fn reset_hidden_state(
        &self,
        hidden: Option<Tensor>,
        dones: &[bool],
    ) -> Result<Option<Tensor>> {
        let hidden = match hidden {
            Some(h) => h,
            None => return Ok(None),
        };
        let n = hidden.dim(0)?;
        if n != dones.len() {
            return Err(AmagoError::shape("dones", &[n], &[dones.len()]).into());
        }
        let keep = dones.iter().map(|d| (!d) as u8 as f32).collect::<Vec<_>>();
        let keep = Tensor::from_vec(keep, (n, 1), hidden.device())?;
        Ok(Some(hidden.broadcast_mul(&keep)?))
    }

    /// Encodes `seq [B, L, D]`.
    ///
    /// `hidden` is the state after the previous call, `None` to start from
    /// scratch. Returns the representations and the state after the last
    /// timestep. `time_idxs [B, L, 1]` are accepted for encoders that use
    /// positions and ignored by the GRU and feed-forward encoders.
    pub fn encode(
        &self,
        seq: &Tensor,
        _time_idxs: &Tensor,
        hidden: Option<Tensor>,
    ) -> Result<(Tensor, Option<Tensor>)> {
        let (b, l, _) = seq.dims3()?;
        let (xs, hidden) = match &self.backbone {
            Backbone::Gru(gru, d_hidden) => {
                if l == 0 {
                    return Err(AmagoError::shape("sequence", &[b, 1], &[b, l]).into());
                }
                let h = match hidden {
                    Some(h) => h,
                    None => Tensor::zeros((b, *d_hidden), DType::F32, seq.device())?,
                };
                let states = gru.seq_init(seq, &GRUState { h })?;
                let xs = gru.states_to_tensor(&states)?;
                let last = states.last().map(|s| s.h.clone());
                (xs, last)
            }
            Backbone::Ff(mlp) => (mlp.forward(seq)?.relu()?, hidden),
        };
        let ys = self.out_norm.forward(&self.out.forward(&xs)?)?;
        Ok((ys, hidden))
    }
}

impl SubModel1 for TrajEncoder {
    type Config = TrajEncoderConfig;
    type Input = (Tensor, Tensor, Option<Tensor>);
    type Output = (Tensor, Option<Tensor>);

    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self> {
        let (backbone, d_backbone) = match config.kind {
            TrajEncoderKind::Gru { d_hidden } => {
                let gru = gru(config.tstep_dim, d_hidden, GRUConfig::default(), vb.pp("gru"))?;
                (Backbone::Gru(gru, d_hidden), d_hidden)
            }
            TrajEncoderKind::Ff { d_hidden } => {
                let mlp_config = MlpConfig::new(config.tstep_dim, vec![d_hidden], d_hidden, false);
                (Backbone::Ff(Mlp::build(vb.clone(), mlp_config)?), d_hidden)
            }
        };
        let out = linear(d_backbone, config.d_output, vb.pp("out"))?;
        let out_norm = layer_norm(config.d_output, 1e-5, vb.pp("out_norm"))?;
        Ok(Self {
            backbone,
            out,
            out_norm,
            d_output: config.d_output,
        })
    }

    fn forward(&self, (seq, time_idxs, hidden): &Self::Input) -> Result<Self::Output> {
        self.encode(seq, time_idxs, hidden.clone())
    }
}
