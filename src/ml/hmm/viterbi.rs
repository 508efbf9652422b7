use super::gaussian::state_densities;
use super::model::{ModelParameters, ObservationSequence};
use crate::error::Result;

/// Runs the Viterbi algorithm for a Gaussian HMM.
///
/// Returns the most likely hidden state path for `observations` together
/// with its log joint probability `ln P(X, Z* | θ)`. Zero probabilities map
/// to `-∞`, so forbidden transitions are never chosen.
///
/// # Errors
///
/// - `Error::InvalidParameters` if the dimensions of `params` and `observations` differ.
/// - `Error::SingularCovariance` if a covariance is not positive-definite.
pub fn viterbi(
    params: &ModelParameters,
    observations: &ObservationSequence,
) -> Result<(Vec<usize>, f64)> {
    params.check_compatible(observations)?;
    let densities = state_densities(params)?;

    let t = observations.len();
    let n = params.num_states();
    let log_init = params.initial().mapv(f64::ln);
    let log_trans = params.transitions().mapv(f64::ln);

    // delta[t][s]: highest log-probability of any path that ends in state s at time t
    // psi[t][s]: which state at time t-1 led to the best path ending in s at time t
    let mut delta = vec![vec![f64::NEG_INFINITY; n]; t];
    let mut psi = vec![vec![0_usize; n]; t];

    let first = observations.get(0);
    for s in 0..n {
        delta[0][s] = log_init[s] + densities[s].log_pdf(first);
    }

    for time in 1..t {
        let obs = observations.get(time);
        for s in 0..n {
            let mut best_val = f64::NEG_INFINITY;
            let mut best_prev = 0_usize;
            for s_prev in 0..n {
                let candidate = delta[time - 1][s_prev] + log_trans[[s_prev, s]];
                if candidate > best_val {
                    best_val = candidate;
                    best_prev = s_prev;
                }
            }
            delta[time][s] = best_val + densities[s].log_pdf(obs);
            psi[time][s] = best_prev;
        }
    }

    let mut best_final_score = f64::NEG_INFINITY;
    let mut best_final_state = 0_usize;
    for s in 0..n {
        if delta[t - 1][s] > best_final_score {
            best_final_score = delta[t - 1][s];
            best_final_state = s;
        }
    }

    let mut path = vec![0_usize; t];
    path[t - 1] = best_final_state;
    for time in (1..t).rev() {
        path[time - 1] = psi[time][path[time]];
    }

    Ok((path, best_final_score))
}
