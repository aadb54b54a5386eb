//! Utilities.
use anyhow::{anyhow, Context, Result};
use candle_core::{Tensor, Var};
use candle_nn::VarMap;
use std::{collections::HashMap, sync::MutexGuard};

fn lock(varmap: &VarMap) -> Result<MutexGuard<HashMap<String, Var>>> {
    varmap
        .data()
        .lock()
        .map_err(|e| anyhow!("Failed to lock varmap: {}", e))
}

/// Apply soft update on variables.
///
/// Variables are identified by their names. Every variable of `dest` must
/// exist in `src`.
///
/// dest = tau * src + (1.0 - tau) * dest
pub fn track(dest: &VarMap, src: &VarMap, tau: f64) -> Result<()> {
    let dest = lock(dest)?;
    let src = lock(src)?;

    for (k, v_dest) in dest.iter() {
        let v_src = src
            .get(k)
            .with_context(|| format!("{} is not found in the source varmap", k))?;
        let t_dest = ((tau * v_src.as_tensor())? + ((1.0 - tau) * v_dest.as_tensor())?)?;
        v_dest.set(&t_dest)?;
    }

    Ok(())
}

/// Copies variables of `src` into the variables of `dest` with the same names.
pub fn copy_vars(dest: &VarMap, src: &VarMap) -> Result<()> {
    let dest = lock(dest)?;
    let src = lock(src)?;

    for (k, v_dest) in dest.iter() {
        let v_src = src
            .get(k)
            .with_context(|| format!("{} is not found in the source varmap", k))?;
        v_dest.set(v_src.as_tensor())?;
    }

    Ok(())
}

/// Returns variables whose names start with one of the given prefixes.
pub fn vars_with_prefix(varmap: &VarMap, prefixes: &[&str]) -> Result<Vec<(String, Var)>> {
    let data = lock(varmap)?;
    let mut vars = data
        .iter()
        .filter(|(k, _)| prefixes.iter().any(|p| k.starts_with(p)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect::<Vec<_>>();
    vars.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(vars)
}

/// Masked mean: `sum(mask * x) / max(sum(mask), 1)`.
///
/// `mask` is broadcast to the shape of `x`, so an all-zero mask yields 0.
pub fn masked_avg(x: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let mask = mask.broadcast_as(x.shape())?.to_dtype(x.dtype())?;
    let total = (x * &mask)?.sum_all()?;
    let denom = mask.sum_all()?.maximum(1f64)?;
    Ok((total / denom)?)
}

/// Masked mean over the entries of the last-but-one axis with index `ix`.
///
/// Used for per-gamma statistics of tensors shaped `[..., G, 1]`.
pub(crate) fn masked_avg_at(x: &Tensor, mask: &Tensor, dim: usize, ix: usize) -> Result<f32> {
    let mask = mask.broadcast_as(x.shape())?;
    let x = x.narrow(dim, ix, 1)?;
    let mask = mask.narrow(dim, ix, 1)?;
    Ok(masked_avg(&x, &mask)?.to_scalar::<f32>()?)
}

fn sign(x: &Tensor) -> Result<Tensor> {
    Ok(x.ge(0f64)?.to_dtype(x.dtype())?.affine(2.0, -1.0)?)
}

/// `sign(x) * ln(|x| + 1)`.
pub fn symlog(x: &Tensor) -> Result<Tensor> {
    Ok((sign(x)? * (x.abs()? + 1.0)?.log()?)?)
}

/// Inverse of [`symlog`], `sign(x) * (exp(|x|) - 1)`.
pub fn symexp(x: &Tensor) -> Result<Tensor> {
    Ok((sign(x)? * (x.abs()?.exp()? - 1.0)?)?)
}

/// Inverse hyperbolic tangent.
pub fn atanh(x: &Tensor) -> Result<Tensor> {
    let num = (x + 1.0)?;
    let den = x.affine(-1.0, 1.0)?;
    Ok(((num / den)?.log()? * 0.5)?)
}

/// `log(1 - tanh(u)^2)` computed from `a = tanh(u)` with a small epsilon.
pub fn log_jacobian_tanh(a: &Tensor, epsilon: f64) -> Result<Tensor> {
    Ok((a.sqr()?.affine(-1.0, 1.0)? + epsilon)?.log()?)
}

/// Log density of the standard normal distribution, elementwise.
pub fn normal_logp(z: &Tensor) -> Result<Tensor> {
    let c = -0.5 * (2.0 * std::f64::consts::PI).ln();
    Ok(z.sqr()?.affine(-0.5, c)?)
}
