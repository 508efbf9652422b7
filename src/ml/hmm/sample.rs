//! Synthetic sequences drawn from a known Gaussian HMM.

use ndarray::{Array1, Array2};
use rand::distributions::WeightedIndex;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use super::gaussian::state_densities;
use super::model::{ModelParameters, ObservationSequence};
use crate::error::{Error, Result};

/// Draws `len` observations and their hidden states from `params`.
///
/// `z_0 ~ π`, `z_n ~ A[z_{n-1}]`, `x_n = μ_{z_n} + L_{z_n} ε` with
/// `ε ~ N(0, I)` and `L` the Cholesky factor of `Σ_{z_n}`.
///
/// # Errors
///
/// `Error::InvalidConfig` if `len` is zero, `Error::SingularCovariance` if a
/// covariance cannot be factored.
pub fn sample<R: Rng + ?Sized>(
    params: &ModelParameters,
    len: usize,
    rng: &mut R,
) -> Result<(ObservationSequence, Vec<usize>)> {
    if len == 0 {
        return Err(Error::InvalidConfig(
            "sample length must be at least 1".into(),
        ));
    }
    let densities = state_densities(params)?;
    let d = params.dim();

    let initial = categorical(params.initial().iter())?;
    let rows = params
        .transitions()
        .rows()
        .into_iter()
        .map(|row| categorical(row.iter()))
        .collect::<Result<Vec<_>>>()?;

    let mut states = Vec::with_capacity(len);
    let mut data = Array2::<f64>::zeros((len, d));
    let mut state = initial.sample(rng);
    for t in 0..len {
        if t > 0 {
            state = rows[state].sample(rng);
        }
        states.push(state);

        let eps: Array1<f64> = (0..d)
            .map(|_| -> f64 { StandardNormal.sample(&mut *rng) })
            .collect();
        let x = &params.mean(state) + &densities[state].cholesky_factor().dot(&eps);
        data.row_mut(t).assign(&x);
    }

    Ok((ObservationSequence::new(data)?, states))
}

fn categorical<'a>(weights: impl Iterator<Item = &'a f64>) -> Result<WeightedIndex<f64>> {
    WeightedIndex::new(weights)
        .map_err(|e| Error::InvalidParameters(format!("cannot sample from distribution: {}", e)))
}
