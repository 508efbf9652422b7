use ndarray::{Array2, Array3, Axis};

use super::model::ModelParameters;
use crate::error::{Error, Pass, Result};

/// Single-state (γ) and pairwise (ξ) posteriors for one sequence.
#[derive(Debug, Clone)]
pub struct Posteriors {
    /// `N x K`; `gamma[[n, k]] = P(z_n = k | X)`.
    pub gamma: Array2<f64>,
    /// `(N-1) x K x K`; `xi[[n, j, k]] = P(z_n = j, z_{n+1} = k | X)`.
    pub xi: Array3<f64>,
}

impl Posteriors {
    /// Most probable state at each position under γ (posterior decoding).
    pub fn decode(&self) -> Vec<usize> {
        self.gamma
            .rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |best, (k, &p)| {
                        if p > best.1 {
                            (k, p)
                        } else {
                            best
                        }
                    })
                    .0
            })
            .collect()
    }
}

/// Combines α and β into γ and ξ.
///
/// `params` and `emissions` must be the same snapshot the passes ran on:
/// ξ reads `A` and `b[n+1]` from it.
///
/// ```text
/// γ[n][k]    ∝ α[n][k] · β[n][k]
/// ξ[n][j][k] ∝ α[n][j] · b[n+1][k] · A[j][k] · β[n+1][k]
/// ```
///
/// # Errors
///
/// Returns `Error::ZeroDensityRow` if a γ row or ξ slice has no mass, which
/// only happens when α and β disagree completely. Returns
/// `Error::InvalidParameters` if α, β and the emission table differ in shape.
pub fn posteriors(
    params: &ModelParameters,
    emissions: &Array2<f64>,
    alpha: &Array2<f64>,
    beta: &Array2<f64>,
) -> Result<Posteriors> {
    params.check_emissions(emissions)?;
    if alpha.dim() != emissions.dim() || beta.dim() != emissions.dim() {
        return Err(Error::InvalidParameters(format!(
            "alpha {:?} and beta {:?} must match the emission table {:?}",
            alpha.dim(),
            beta.dim(),
            emissions.dim()
        )));
    }
    let (n_obs, k) = alpha.dim();
    let a = params.transitions();

    let mut gamma = alpha * beta;
    for (t, mut row) in gamma.axis_iter_mut(Axis(0)).enumerate() {
        let sum = row.sum();
        if !(sum.is_finite() && sum > 0.0) {
            return Err(zero_row(t));
        }
        row /= sum;
    }

    let mut xi = Array3::<f64>::zeros((n_obs.saturating_sub(1), k, k));
    for (t, mut slice) in xi.axis_iter_mut(Axis(0)).enumerate() {
        for j in 0..k {
            for next in 0..k {
                slice[[j, next]] =
                    alpha[[t, j]] * emissions[[t + 1, next]] * a[[j, next]] * beta[[t + 1, next]];
            }
        }
        let sum = slice.sum();
        if !(sum.is_finite() && sum > 0.0) {
            return Err(zero_row(t));
        }
        slice /= sum;
    }

    Ok(Posteriors { gamma, xi })
}

fn zero_row(time: usize) -> Error {
    Error::ZeroDensityRow {
        time,
        pass: Pass::Posterior,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::hmm::backward::backward;
    use crate::ml::hmm::forward::forward;
    use crate::ml::hmm::gaussian::emission_probabilities;
    use crate::ml::hmm::model::ObservationSequence;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn run(params: &ModelParameters, obs: &ObservationSequence) -> Posteriors {
        let b = emission_probabilities(obs, params).unwrap();
        let fwd = forward(params, &b).unwrap();
        let beta = backward(params, &b).unwrap();
        posteriors(params, &b, &fwd.alpha, &beta).unwrap()
    }

    #[test]
    fn test_gamma_and_xi_are_distributions() {
        let params = ModelParameters::new(
            array![0.3, 0.7],
            array![[0.6, 0.4], [0.25, 0.75]],
            array![[0.0, 0.0], [1.5, -1.0]],
            vec![
                array![[1.0, 0.3], [0.3, 1.0]],
                array![[0.5, 0.0], [0.0, 2.0]],
            ],
        )
        .unwrap();
        let obs = ObservationSequence::from_rows(&[
            vec![0.1, 0.2],
            vec![1.4, -0.7],
            vec![2.0, -1.5],
            vec![-0.3, 0.4],
            vec![0.9, 0.0],
        ])
        .unwrap();
        let post = run(&params, &obs);

        assert_eq!(post.gamma.dim(), (5, 2));
        assert_eq!(post.xi.dim(), (4, 2, 2));
        for row in post.gamma.rows() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-9);
        }
        for slice in post.xi.axis_iter(Axis(0)) {
            assert_relative_eq!(slice.sum(), 1.0, epsilon = 1e-9);
        }
        // marginalizing ξ over the later state recovers γ at the earlier step
        for t in 0..4 {
            for j in 0..2 {
                let marginal: f64 = post.xi.slice(ndarray::s![t, j, ..]).sum();
                assert_relative_eq!(marginal, post.gamma[[t, j]], epsilon = 1e-9);
            }
        }
        // and over the earlier state recovers γ at the later step
        for t in 0..4 {
            for k in 0..2 {
                let marginal: f64 = post.xi.slice(ndarray::s![t, .., k]).sum();
                assert_relative_eq!(marginal, post.gamma[[t + 1, k]], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_separated_states_are_recovered() {
        let params = ModelParameters::new(
            array![0.5, 0.5],
            array![[0.5, 0.5], [0.5, 0.5]],
            array![[-10.0], [10.0]],
            vec![array![[1.0]], array![[1.0]]],
        )
        .unwrap();
        let obs = ObservationSequence::from_scalars(&[-10.0, 10.0, -10.0]).unwrap();
        let post = run(&params, &obs);

        let states = [0, 1, 0];
        for (t, &z) in states.iter().enumerate() {
            assert_relative_eq!(post.gamma[[t, z]], 1.0, epsilon = 1e-9);
            assert_relative_eq!(post.gamma[[t, 1 - z]], 0.0, epsilon = 1e-9);
        }
        assert_eq!(post.decode(), vec![0, 1, 0]);
        assert_relative_eq!(post.xi[[0, 0, 1]], 1.0, epsilon = 1e-9);
        assert_relative_eq!(post.xi[[1, 1, 0]], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_single_observation_has_no_xi() {
        let params = ModelParameters::new(
            array![0.5, 0.5],
            array![[0.5, 0.5], [0.5, 0.5]],
            array![[0.0], [1.0]],
            vec![array![[1.0]], array![[1.0]]],
        )
        .unwrap();
        let obs = ObservationSequence::from_scalars(&[0.0]).unwrap();
        let post = run(&params, &obs);
        assert_eq!(post.xi.dim(), (0, 2, 2));
        assert!(post.gamma[[0, 0]] > post.gamma[[0, 1]]);
    }

    #[test]
    fn test_mismatched_tables_are_rejected() {
        let params = ModelParameters::new(
            array![0.5, 0.5],
            array![[0.5, 0.5], [0.5, 0.5]],
            array![[0.0], [1.0]],
            vec![array![[1.0]], array![[1.0]]],
        )
        .unwrap();
        let b = array![[1.0, 1.0], [1.0, 1.0]];
        let short_alpha = array![[0.5, 0.5]];
        let beta = array![[0.5, 0.5], [0.5, 0.5]];
        assert!(matches!(
            posteriors(&params, &b, &short_alpha, &beta),
            Err(Error::InvalidParameters(_))
        ));
        let wide = array![[1.0, 1.0, 1.0], [1.0, 1.0, 1.0]];
        assert!(matches!(
            posteriors(&params, &wide, &wide, &wide),
            Err(Error::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_disjoint_alpha_beta_is_an_error() {
        let params = ModelParameters::new(
            array![0.5, 0.5],
            array![[0.5, 0.5], [0.5, 0.5]],
            array![[0.0], [1.0]],
            vec![array![[1.0]], array![[1.0]]],
        )
        .unwrap();
        let b = array![[1.0, 1.0]];
        let alpha = array![[1.0, 0.0]];
        let beta = array![[0.0, 1.0]];
        let err = posteriors(&params, &b, &alpha, &beta).unwrap_err();
        assert!(matches!(
            err,
            Error::ZeroDensityRow {
                time: 0,
                pass: Pass::Posterior
            }
        ));
    }
}
