use super::{Activation, MlpConfig};
use crate::model::SubModel1;
use anyhow::Result;
use candle_core::{Device, Module, Tensor, D};
use candle_nn::{linear, Linear, VarBuilder};

/// Returns vector of linear modules from [`MlpConfig`].
fn create_linear_layers(prefix: &str, vs: VarBuilder, config: &MlpConfig) -> Result<Vec<Linear>> {
    let mut dims = vec![config.in_dim];
    dims.extend(config.units.iter().copied());
    dims.push(config.out_dim);
    let vs = vs.pp(prefix);

    dims.windows(2)
        .enumerate()
        .map(|(i, w)| Ok(linear(w[0], w[1], vs.pp(format!("ln{}", i)))?))
        .collect()
}

/// Multilayer perceptron.
///
/// Inputs of any rank are accepted. Leading dimensions are flattened before
/// the linear layers and restored afterwards, so `[B, L, G, in_dim]` maps to
/// `[B, L, G, out_dim]`.
pub struct Mlp {
    config: MlpConfig,
    device: Device,
    layers: Vec<Linear>,
}

impl Mlp {
    /// Returns the output and the activations of the last hidden layer.
    pub fn forward_with_features(&self, xs: &Tensor) -> Result<(Tensor, Tensor)> {
        let xs = xs.to_device(&self.device)?;
        let dims = xs.dims().to_vec();
        let rank = dims.len();
        let mut xs = match rank {
            0 => anyhow::bail!("Mlp does not accept a scalar input"),
            1 => xs.unsqueeze(0)?,
            2 => xs,
            _ => xs.flatten_to(rank - 2)?,
        };

        let n_layers = self.layers.len();
        for layer in self.layers[..n_layers - 1].iter() {
            xs = self.config.activation.forward(&layer.forward(&xs)?)?;
        }
        let features = xs.clone();
        let mut ys = self.layers[n_layers - 1].forward(&xs)?;
        if self.config.activation_out {
            ys = self.config.activation.forward(&ys)?;
        }

        let restore = |t: Tensor| -> Result<Tensor> {
            let mut shape = dims[..rank - 1].to_vec();
            shape.push(t.dim(D::Minus1)?);
            Ok(t.reshape(shape)?)
        };
        Ok((restore(ys)?, restore(features)?))
    }

    /// Returns the configuration.
    pub fn config(&self) -> &MlpConfig {
        &self.config
    }
}

impl SubModel1 for Mlp {
    type Config = MlpConfig;
    type Input = Tensor;
    type Output = Tensor;

    fn forward(&self, xs: &Self::Input) -> Result<Tensor> {
        Ok(self.forward_with_features(xs)?.0)
    }

    fn build(vs: VarBuilder, config: Self::Config) -> Result<Self> {
        let device = vs.device().clone();
        let layers = create_linear_layers("mlp", vs, &config)?;

        Ok(Mlp {
            config,
            device,
            layers,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;

    #[test]
    fn test_mlp_keeps_leading_dims() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = MlpConfig::new(3, vec![8, 5], 2, false).activation(Activation::ReLU);
        let mlp = Mlp::build(vb, config)?;

        let xs = Tensor::ones((4, 3, 2, 3), DType::F32, &Device::Cpu)?;
        let (ys, features) = mlp.forward_with_features(&xs)?;
        assert_eq!(ys.dims(), [4, 3, 2, 2]);
        assert_eq!(features.dims(), [4, 3, 2, 5]);

        // ln0, ln1, ln2, each with weight and bias
        assert_eq!(varmap.all_vars().len(), 6);
        assert!(varmap.data().lock().unwrap().contains_key("mlp.ln2.weight"));
        Ok(())
    }
}
