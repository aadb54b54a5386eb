//! PopArt normalization of value targets.
use amago_core::{
    error::AmagoError,
    record::{Record, RecordValue},
};
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`PopArt`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PopArtConfig {
    /// If `false`, all methods of [`PopArt`] are the identity.
    pub enabled: bool,

    /// Step size of the running statistics.
    pub beta: f64,

    /// Initial second moment.
    pub init_nu: f64,
}

impl Default for PopArtConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            beta: 5e-4,
            init_nu: 100.0,
        }
    }
}

/// Statistics of [`PopArt`], one entry per discount factor.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PopArtState {
    mu: Vec<f64>,
    nu: Vec<f64>,
    w: Vec<f64>,
    b: Vec<f64>,
    t: u64,
}

/// Per-gamma adaptive rescaling of values.
///
/// Values are kept in a normalized space, `denormalized = (w x + b) sigma + mu`.
/// When the running statistics `mu` and `sigma` move, `w` and `b` are
/// rescaled so that denormalized outputs stay the same.
///
/// Tensors passed to the methods have the gamma axis second to last,
/// `[..., G, 1]`.
pub struct PopArt {
    config: PopArtConfig,
    state: PopArtState,
    device: Device,
}

fn sigma(mu: f64, nu: f64) -> f64 {
    (nu - mu * mu).max(0.0).sqrt().clamp(1e-4, 1e6)
}

impl PopArt {
    /// Creates the normalizer for `n_gammas` discount factors.
    pub fn new(config: PopArtConfig, n_gammas: usize, device: &Device) -> Self {
        let nu = match config.enabled {
            true => config.init_nu,
            false => 1.0,
        };
        let state = PopArtState {
            mu: vec![0.0; n_gammas],
            nu: vec![nu; n_gammas],
            w: vec![1.0; n_gammas],
            b: vec![0.0; n_gammas],
            t: 0,
        };
        Self {
            config,
            state,
            device: device.clone(),
        }
    }

    fn n_gammas(&self) -> usize {
        self.state.mu.len()
    }

    fn sigmas(&self) -> Vec<f64> {
        self.state
            .mu
            .iter()
            .zip(self.state.nu.iter())
            .map(|(mu, nu)| sigma(*mu, *nu))
            .collect()
    }

    /// Returns a `[G, 1]` tensor of the given values.
    fn param(&self, v: &[f64]) -> Result<Tensor> {
        let v = v.iter().map(|x| *x as f32).collect::<Vec<_>>();
        Ok(Tensor::from_vec(v, (self.n_gammas(), 1), &self.device)?)
    }

    fn check_gamma_axis(&self, name: &str, x: &Tensor) -> Result<()> {
        let dims = x.dims();
        let g = self.n_gammas();
        if dims.len() < 2 || dims[dims.len() - 2..] != [g, 1] {
            return Err(AmagoError::shape(name, &[g, 1], dims).into());
        }
        Ok(())
    }

    /// `w x + b`, or its denormalized view when `normalized` is `false`.
    pub fn forward(&self, x: &Tensor, normalized: bool) -> Result<Tensor> {
        self.check_gamma_axis("popart input", x)?;
        let w = self.param(&self.state.w)?;
        let b = self.param(&self.state.b)?;
        let out = x.broadcast_mul(&w)?.broadcast_add(&b)?;
        match normalized {
            true => Ok(out),
            false => self.denormalize_values(&out),
        }
    }

    /// `(x - mu) / sigma`.
    pub fn normalize_values(&self, x: &Tensor) -> Result<Tensor> {
        self.check_gamma_axis("popart input", x)?;
        let mu = self.param(&self.state.mu)?;
        let sigma = self.param(&self.sigmas())?;
        Ok(x.broadcast_sub(&mu)?.broadcast_div(&sigma)?)
    }

    /// `x sigma + mu`.
    pub fn denormalize_values(&self, x: &Tensor) -> Result<Tensor> {
        self.check_gamma_axis("popart input", x)?;
        let mu = self.param(&self.state.mu)?;
        let sigma = self.param(&self.sigmas())?;
        Ok(x.broadcast_mul(&sigma)?.broadcast_add(&mu)?)
    }

    /// Updates the running statistics with masked values `[..., G, 1]`.
    ///
    /// Gamma slots without a valid entry are left untouched. The parameters
    /// `w` and `b` are rescaled so that [`PopArt::forward`] with
    /// `normalized = false` returns the same values as before the update.
    pub fn update_stats(&mut self, values: &Tensor, mask: &Tensor) -> Result<()> {
        if values.dims() != mask.dims() {
            return Err(AmagoError::shape("popart mask", values.dims(), mask.dims()).into());
        }
        self.check_gamma_axis("popart values", values)?;
        if !self.config.enabled {
            return Ok(());
        }

        let g = self.n_gammas();
        let n = values.elem_count() / g;
        let values = values.detach().to_dtype(DType::F32)?.reshape((n, g))?;
        let mask = mask.detach().to_dtype(DType::F32)?.reshape((n, g))?;
        let masked = (&values * &mask)?;
        let count = mask.sum(0)?.to_vec1::<f32>()?;
        let s1 = masked.sum(0)?.to_vec1::<f32>()?;
        let s2 = (&masked * &values)?.sum(0)?.to_vec1::<f32>()?;

        if count.iter().all(|c| *c <= 0.0) {
            return Ok(());
        }

        self.state.t += 1;
        let beta = self.config.beta;
        let beta_t = beta / (1.0 - (1.0 - beta).powf(self.state.t as f64));

        for i in 0..g {
            if count[i] <= 0.0 {
                continue;
            }
            let (old_mu, old_nu) = (self.state.mu[i], self.state.nu[i]);
            let old_sigma = sigma(old_mu, old_nu);
            let mean = s1[i] as f64 / count[i] as f64;
            let square_mean = s2[i] as f64 / count[i] as f64;

            let mu = (1.0 - beta_t) * old_mu + beta_t * mean;
            let nu = (1.0 - beta_t) * old_nu + beta_t * square_mean;
            let new_sigma = sigma(mu, nu);

            self.state.w[i] *= old_sigma / new_sigma;
            self.state.b[i] = (old_sigma * self.state.b[i] + old_mu - mu) / new_sigma;
            self.state.mu[i] = mu;
            self.state.nu[i] = nu;
        }

        Ok(())
    }

    /// Returns the statistics for logging.
    pub fn stats(&self) -> Record {
        let mean = |v: &[f64]| (v.iter().sum::<f64>() / v.len().max(1) as f64) as f32;
        let sigmas = self.sigmas();
        let mut record = Record::empty();
        record.insert_scalar("PopArt mu (mean over gamma)", mean(&self.state.mu));
        record.insert_scalar("PopArt nu (mean over gamma)", mean(&self.state.nu));
        record.insert_scalar("PopArt w (mean over gamma)", mean(&self.state.w));
        record.insert_scalar("PopArt b (mean over gamma)", mean(&self.state.b));
        record.insert_scalar("PopArt sigma (mean over gamma)", mean(&sigmas));
        record.insert(
            "PopArt mu",
            RecordValue::Array1(self.state.mu.iter().map(|x| *x as f32).collect()),
        );
        record
    }

    /// Returns the internal state.
    pub fn state(&self) -> &PopArtState {
        &self.state
    }

    /// Running means, one per discount factor.
    pub fn mu(&self) -> &[f64] {
        &self.state.mu
    }

    /// Running second moments, one per discount factor.
    pub fn nu(&self) -> &[f64] {
        &self.state.nu
    }

    /// Replaces the internal state with one taken by [`PopArt::state`].
    pub fn restore(&mut self, state: PopArtState) {
        self.state = state;
    }

    /// Saves the statistics as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(&path)?;
        file.write_all(serde_yaml::to_string(&self.state)?.as_bytes())?;
        info!("Save popart statistics to {:?}", path.as_ref());
        Ok(())
    }

    /// Loads the statistics from YAML file.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::open(&path)?;
        let rdr = BufReader::new(file);
        let state: PopArtState = serde_yaml::from_reader(rdr)?;
        if state.mu.len() != self.n_gammas() {
            let err = AmagoError::shape("popart state", &[self.n_gammas()], &[state.mu.len()]);
            return Err(err.into());
        }
        self.state = state;
        info!("Load popart statistics from {:?}", path.as_ref());
        Ok(())
    }
}
