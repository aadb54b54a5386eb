//! Multilayer perceptron.
mod base;
mod config;
use anyhow::Result;
pub use base::Mlp;
use candle_core::Tensor;
pub use config::MlpConfig;
use serde::{Deserialize, Serialize};

/// Activation functions of hidden layers.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
pub enum Activation {
    /// No activation.
    None,

    /// Rectified linear unit.
    ReLU,

    /// Leaky ReLU with negative slope 0.01.
    LeakyReLU,

    /// Hyperbolic tangent.
    Tanh,
}

impl Activation {
    /// Applies the activation function.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        Ok(match self {
            Self::None => xs.clone(),
            Self::ReLU => xs.relu()?,
            Self::LeakyReLU => candle_nn::ops::leaky_relu(xs, 0.01)?,
            Self::Tanh => xs.tanh()?,
        })
    }
}
