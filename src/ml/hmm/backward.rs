use ndarray::Array2;

use super::model::ModelParameters;
use crate::error::{Error, Pass, Result};

/// Runs the scaled backward recursion, returning β (`N x K`).
///
/// ```text
/// β[N-1][k] = 1/K
/// β[n][k]   ∝ Σ_j A[k][j] · b[n+1][j] · β[n+1][j]
/// ```
///
/// Row `k` of `A` is the state at `n`, column `j` the state at `n + 1`.
/// Each row is normalized independently of the forward pass, so the two
/// passes can run concurrently over the same snapshot.
///
/// # Errors
///
/// Returns `Error::ZeroDensityRow` with the row index if a row sums to zero,
/// and `Error::InvalidParameters`/`InvalidObservations` if `emissions` is not
/// a non-empty `N x K` table.
pub fn backward(params: &ModelParameters, emissions: &Array2<f64>) -> Result<Array2<f64>> {
    params.check_emissions(emissions)?;
    let (n_obs, k) = emissions.dim();
    let a = params.transitions();

    let mut beta = Array2::<f64>::zeros((n_obs, k));
    beta.row_mut(n_obs - 1).fill(1.0 / k as f64);

    for t in (0..n_obs - 1).rev() {
        for state in 0..k {
            let mut outgoing = 0.0;
            for next in 0..k {
                outgoing += a[[state, next]] * emissions[[t + 1, next]] * beta[[t + 1, next]];
            }
            beta[[t, state]] = outgoing;
        }

        let mut row = beta.row_mut(t);
        let sum = row.sum();
        if !(sum.is_finite() && sum > 0.0) {
            return Err(Error::ZeroDensityRow {
                time: t,
                pass: Pass::Backward,
            });
        }
        row /= sum;
    }

    Ok(beta)
}
