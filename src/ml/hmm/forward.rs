use ndarray::{Array1, Array2};

use super::model::ModelParameters;
use crate::error::{Error, Pass, Result};

/// Scaled forward variables α.
///
/// Row `n` is proportional to `P(x_0..=x_n, z_n = k)` and normalized to sum
/// to one. `log_scales[n]` keeps the log of the row's sum before
/// normalization, i.e. `ln P(x_n | x_0..x_{n-1})`.
#[derive(Debug, Clone)]
pub struct ForwardTable {
    pub alpha: Array2<f64>,
    pub log_scales: Array1<f64>,
}

impl ForwardTable {
    /// `ln P(X | θ)`: the sum of the per-row log normalizers.
    pub fn log_likelihood(&self) -> f64 {
        self.log_scales.sum()
    }
}

/// Runs the scaled forward recursion.
///
/// `emissions` is the `N x K` density table for the same `params` snapshot
/// (see [`emission_probabilities`](super::gaussian::emission_probabilities)).
///
/// ```text
/// α[0][k] ∝ π[k] · b[0][k]
/// α[n][k] ∝ b[n][k] · Σ_j A[j][k] · α[n-1][j]
/// ```
///
/// # Errors
///
/// Returns `Error::ZeroDensityRow` with the offending time index if a row
/// sums to zero (or overflows) before normalization,
/// `Error::InvalidParameters` if `emissions` does not have `K` columns and
/// `Error::InvalidObservations` if it has no rows.
pub fn forward(params: &ModelParameters, emissions: &Array2<f64>) -> Result<ForwardTable> {
    params.check_emissions(emissions)?;
    let (n_obs, k) = emissions.dim();
    let pi = params.initial();
    let a = params.transitions();

    let mut alpha = Array2::<f64>::zeros((n_obs, k));
    let mut log_scales = Array1::<f64>::zeros(n_obs);

    for state in 0..k {
        alpha[[0, state]] = pi[state] * emissions[[0, state]];
    }
    log_scales[0] = normalize_row(&mut alpha, 0)?;

    for t in 1..n_obs {
        for state in 0..k {
            let mut incoming = 0.0;
            for prev in 0..k {
                incoming += a[[prev, state]] * alpha[[t - 1, prev]];
            }
            alpha[[t, state]] = emissions[[t, state]] * incoming;
        }
        log_scales[t] = normalize_row(&mut alpha, t)?;
    }

    Ok(ForwardTable { alpha, log_scales })
}

/// Normalizes row `t` in place and returns the log of its former sum.
fn normalize_row(alpha: &mut Array2<f64>, t: usize) -> Result<f64> {
    let mut row = alpha.row_mut(t);
    let sum = row.sum();
    if !(sum.is_finite() && sum > 0.0) {
        return Err(Error::ZeroDensityRow {
            time: t,
            pass: Pass::Forward,
        });
    }
    row /= sum;
    Ok(sum.ln())
}
