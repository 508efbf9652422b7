use log::warn;
use ndarray::{Array1, Array2, Axis};

use super::model::{ModelParameters, ObservationSequence};
use super::posterior::Posteriors;
use crate::error::{DegenerateState, Error, Result, StateComponent};

/// Default expected mass below which a state counts as unvisited.
pub const DEFAULT_MIN_OCCUPANCY: f64 = 1e-10;

/// Options for the M-step.
#[derive(Debug, Clone, Copy)]
pub struct ReestimationConfig {
    /// Expected mass at or below which a state's update is skipped.
    pub min_occupancy: f64,
    /// Added to the diagonal of every re-estimated covariance.
    pub covariance_regularization: f64,
}

impl Default for ReestimationConfig {
    fn default() -> Self {
        Self {
            min_occupancy: DEFAULT_MIN_OCCUPANCY,
            covariance_regularization: 0.0,
        }
    }
}

/// Output of one M-step: the new parameters plus the states that could not
/// be updated.
#[derive(Debug, Clone)]
pub struct Reestimation {
    pub params: ModelParameters,
    pub warnings: Vec<DegenerateState>,
}

/// Computes θ^new from the posteriors of one E-step.
///
/// `previous` is only read for states whose expected mass is at or below
/// `config.min_occupancy`; their transition row (or mean and covariance) is
/// carried over and a [`DegenerateState`] is reported. The covariance update
/// uses the *new* mean.
///
/// # Errors
///
/// Returns `Error::InvalidParameters` if γ is not `N x K`, ξ is not
/// `(N-1) x K x K`, or `previous` has a different observation dimension.
pub fn reestimate(
    observations: &ObservationSequence,
    posteriors: &Posteriors,
    previous: &ModelParameters,
    config: &ReestimationConfig,
) -> Result<Reestimation> {
    let gamma = &posteriors.gamma;
    let xi = &posteriors.xi;
    let x = observations.as_array();
    let n_obs = observations.len();
    let k = previous.num_states();
    let d = observations.dim();

    if gamma.dim() != (n_obs, k) {
        return Err(Error::InvalidParameters(format!(
            "gamma is {:?}, expected ({}, {})",
            gamma.dim(),
            n_obs,
            k
        )));
    }
    if xi.dim() != (n_obs.saturating_sub(1), k, k) {
        return Err(Error::InvalidParameters(format!(
            "xi is {:?}, expected ({}, {}, {})",
            xi.dim(),
            n_obs.saturating_sub(1),
            k,
            k
        )));
    }
    if previous.dim() != d {
        return Err(Error::InvalidParameters(format!(
            "parameters have dimension {}, observations have {}",
            previous.dim(),
            d
        )));
    }
    let mut warnings = Vec::new();

    // π: renormalized first posterior row
    let first = gamma.row(0);
    let initial = &first / first.sum();

    // A: expected transitions j -> k over expected transitions out of j
    let mut transitions = previous.transitions().clone();
    if n_obs > 1 {
        let counts = xi.sum_axis(Axis(0));
        for j in 0..k {
            let out = counts.row(j).sum();
            if out <= config.min_occupancy {
                warnings.push(degenerate(j, StateComponent::Transitions, out));
                continue;
            }
            let mut row = transitions.row_mut(j);
            row.assign(&counts.row(j));
            row /= out;
        }
    }

    // μ and Σ: γ-weighted sample moments
    let mut means = previous.means().clone();
    let mut covariances = previous.covariances().to_vec();
    for state in 0..k {
        let weights = gamma.column(state);
        let occupancy = weights.sum();
        if occupancy <= config.min_occupancy {
            warnings.push(degenerate(state, StateComponent::Emission, occupancy));
            continue;
        }

        let mean: Array1<f64> = weights.dot(&x) / occupancy;

        let mut cov = Array2::<f64>::zeros((d, d));
        for (t, obs) in x.rows().into_iter().enumerate() {
            let diff = &obs - &mean;
            let w = weights[t];
            for i in 0..d {
                for j in 0..=i {
                    cov[[i, j]] += w * diff[i] * diff[j];
                }
            }
        }
        for i in 0..d {
            for j in 0..i {
                cov[[j, i]] = cov[[i, j]];
            }
        }
        cov /= occupancy;
        for i in 0..d {
            cov[[i, i]] += config.covariance_regularization;
        }

        means.row_mut(state).assign(&mean);
        covariances[state] = cov;
    }

    for warning in &warnings {
        warn!("{}", warning);
    }

    Ok(Reestimation {
        params: ModelParameters::from_parts(initial, transitions, means, covariances),
        warnings,
    })
}

fn degenerate(state: usize, component: StateComponent, mass: f64) -> DegenerateState {
    DegenerateState {
        state,
        component,
        mass,
    }
}
