//! Advantage filters of the behavior cloning term.
use anyhow::Result;
use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};

/// Threshold of the binary filter used by older experiment configurations.
pub const LEGACY_BINARY_THRESHOLD: f32 = -1e-4;

/// Maps advantages to non-negative weights of the log-likelihood of
/// replayed actions.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
pub enum AdvantageFilter {
    /// `1` where the advantage exceeds `threshold`, `0` elsewhere.
    Binary {
        /// Threshold.
        threshold: f32,
    },

    /// `min(exp(beta * adv), clip)`.
    Exp {
        /// Temperature.
        beta: f32,

        /// Upper bound of the weights.
        clip: f32,
    },
}

impl Default for AdvantageFilter {
    fn default() -> Self {
        Self::Binary { threshold: 0.0 }
    }
}

impl AdvantageFilter {
    /// Returns weights with the same shape as `adv`.
    pub fn apply(&self, adv: &Tensor) -> Result<Tensor> {
        let adv = adv.detach();
        match self {
            Self::Binary { threshold } => Ok(adv.gt(*threshold as f64)?.to_dtype(DType::F32)?),
            Self::Exp { beta, clip } => {
                let w = adv.affine(*beta as f64, 0.0)?.exp()?;
                Ok(w.minimum(*clip as f64)?)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_binary() -> Result<()> {
        let adv = Tensor::from_slice(&[-1.0f32, -5e-5, 0.0, 2.0], (4,), &Device::Cpu)?;
        let w = AdvantageFilter::default().apply(&adv)?.to_vec1::<f32>()?;
        assert_eq!(w, vec![0.0, 0.0, 0.0, 1.0]);

        let legacy = AdvantageFilter::Binary {
            threshold: LEGACY_BINARY_THRESHOLD,
        };
        let w = legacy.apply(&adv)?.to_vec1::<f32>()?;
        assert_eq!(w, vec![0.0, 1.0, 1.0, 1.0]);
        Ok(())
    }

    #[test]
    fn test_exp_is_clipped() -> Result<()> {
        let adv = Tensor::from_slice(&[0.0f32, 10.0], (2,), &Device::Cpu)?;
        let filter = AdvantageFilter::Exp {
            beta: 1.0,
            clip: 100.0,
        };
        let w = filter.apply(&adv)?.to_vec1::<f32>()?;
        assert!((w[0] - 1.0).abs() < 1e-6);
        assert_eq!(w[1], 100.0);
        Ok(())
    }
}
