//! Multivariate Gaussian emission densities.

use std::f64::consts::PI;

use ndarray::{Array2, ArrayView1};

use super::model::{ModelParameters, ObservationSequence};
use crate::error::{Error, Result};
use crate::math::linalg::{cholesky, log_determinant, solve_lower};

/// A multivariate normal distribution with a pre-factored covariance.
///
/// The Cholesky factor and `ln |Σ|` are computed once in [`GaussianDensity::new`],
/// so evaluating the density is a triangular solve. Immutable and `Sync`; one
/// instance per state can be shared across threads.
#[derive(Debug, Clone)]
pub struct GaussianDensity {
    mean: ndarray::Array1<f64>,
    chol: Array2<f64>,
    log_norm: f64,
}

impl GaussianDensity {
    /// Builds the density of `state` from its mean and covariance.
    ///
    /// # Errors
    ///
    /// Returns `Error::SingularCovariance { state }` if `covariance` is not
    /// positive-definite.
    pub fn new(state: usize, mean: ArrayView1<f64>, covariance: &Array2<f64>) -> Result<Self> {
        let chol = cholesky(covariance).ok_or(Error::SingularCovariance { state })?;
        let d = mean.len() as f64;
        let log_norm = -0.5 * (d * (2.0 * PI).ln() + log_determinant(&chol));
        Ok(Self {
            mean: mean.to_owned(),
            chol,
            log_norm,
        })
    }

    /// Dimension of the distribution.
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Log density at `x`.
    pub fn log_pdf(&self, x: ArrayView1<f64>) -> f64 {
        let diff = &x - &self.mean;
        let z = solve_lower(&self.chol, diff.view());
        self.log_norm - 0.5 * z.dot(&z)
    }

    /// Density at `x`. Underflows to zero far from the mean.
    pub fn pdf(&self, x: ArrayView1<f64>) -> f64 {
        self.log_pdf(x).exp()
    }

    /// Lower Cholesky factor of the covariance.
    pub fn cholesky_factor(&self) -> &Array2<f64> {
        &self.chol
    }
}

/// Evaluates `N(x; mean, covariance)` in one shot.
///
/// # Errors
///
/// Returns `Error::SingularCovariance { state: 0 }` if `covariance` is not
/// positive-definite. Use [`GaussianDensity::new`] to tag a specific state.
pub fn density(x: ArrayView1<f64>, mean: ArrayView1<f64>, covariance: &Array2<f64>) -> Result<f64> {
    Ok(GaussianDensity::new(0, mean, covariance)?.pdf(x))
}

/// Builds one density per state of `params`.
pub fn state_densities(params: &ModelParameters) -> Result<Vec<GaussianDensity>> {
    (0..params.num_states())
        .map(|k| GaussianDensity::new(k, params.mean(k), params.covariance(k)))
        .collect()
}

/// The `N x K` table `b[[n, k]] = density(x_n; μ_k, Σ_k)` under one parameter
/// snapshot. Shared read-only by the forward, backward and posterior steps.
pub fn emission_probabilities(
    observations: &ObservationSequence,
    params: &ModelParameters,
) -> Result<Array2<f64>> {
    params.check_compatible(observations)?;
    let densities = state_densities(params)?;

    #[cfg(feature = "parallel")]
    let table = parallel_table(observations, &densities);
    #[cfg(not(feature = "parallel"))]
    let table = sequential_table(observations, &densities);

    Ok(table)
}

#[cfg_attr(feature = "parallel", allow(dead_code))]
fn sequential_table(
    observations: &ObservationSequence,
    densities: &[GaussianDensity],
) -> Array2<f64> {
    Array2::from_shape_fn((observations.len(), densities.len()), |(t, s)| {
        densities[s].pdf(observations.get(t))
    })
}

/// One rayon task per observation row.
#[cfg(feature = "parallel")]
fn parallel_table(
    observations: &ObservationSequence,
    densities: &[GaussianDensity],
) -> Array2<f64> {
    use rayon::prelude::*;

    let rows: Vec<Vec<f64>> = (0..observations.len())
        .into_par_iter()
        .map(|t| {
            let x = observations.get(t);
            densities.iter().map(|g| g.pdf(x)).collect()
        })
        .collect();
    Array2::from_shape_fn((observations.len(), densities.len()), |(t, s)| rows[t][s])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_standard_normal_1d() {
        let g = GaussianDensity::new(0, array![0.0].view(), &array![[1.0]]).unwrap();
        let at_zero = 1.0 / (2.0 * PI).sqrt();
        assert_relative_eq!(g.pdf(array![0.0].view()), at_zero, epsilon = 1e-12);
        assert_relative_eq!(
            g.pdf(array![1.0].view()),
            at_zero * (-0.5_f64).exp(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_correlated_2d_matches_closed_form() {
        let mean = array![1.0, -1.0];
        let cov = array![[2.0, 0.6], [0.6, 1.0]];
        let x = array![0.5, 0.0];

        // closed form with explicit 2x2 inverse
        let det: f64 = 2.0 * 1.0 - 0.6 * 0.6;
        let inv = array![[1.0 / det, -0.6 / det], [-0.6 / det, 2.0 / det]];
        let diff = &x - &mean;
        let quad = diff.dot(&inv.dot(&diff));
        let expected = (-0.5 * quad).exp() / (2.0 * PI * det.sqrt());

        let value = density(x.view(), mean.view(), &cov).unwrap();
        assert_relative_eq!(value, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_singular_covariance_reports_state() {
        let cov = array![[1.0, 1.0], [1.0, 1.0]];
        let err = GaussianDensity::new(3, array![0.0, 0.0].view(), &cov).unwrap_err();
        assert!(matches!(err, Error::SingularCovariance { state: 3 }));

        let value = density(array![0.0].view(), array![0.0].view(), &array![[0.0]]);
        assert!(matches!(value, Err(Error::SingularCovariance { .. })));
    }

    #[test]
    fn test_emission_table_shape_and_values() {
        let params = ModelParameters::new(
            array![0.5, 0.5],
            array![[0.5, 0.5], [0.5, 0.5]],
            array![[-10.0], [10.0]],
            vec![array![[1.0]], array![[1.0]]],
        )
        .unwrap();
        let obs = ObservationSequence::from_scalars(&[-10.0, 10.0, 0.0]).unwrap();
        let table = emission_probabilities(&obs, &params).unwrap();
        assert_eq!(table.dim(), (3, 2));
        assert!(table[[0, 0]] > 1e30 * table[[0, 1]]);
        assert!(table[[1, 1]] > 1e30 * table[[1, 0]]);
        assert_relative_eq!(table[[2, 0]], table[[2, 1]], epsilon = 1e-300);
    }

    #[test]
    fn test_emission_table_surfaces_singular_state() {
        let params = ModelParameters::new(
            array![0.5, 0.5],
            array![[0.5, 0.5], [0.5, 0.5]],
            array![[0.0], [1.0]],
            vec![array![[1.0]], array![[0.0]]],
        )
        .unwrap();
        let obs = ObservationSequence::from_scalars(&[0.0]).unwrap();
        let err = emission_probabilities(&obs, &params).unwrap_err();
        assert!(matches!(err, Error::SingularCovariance { state: 1 }));
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_parallel_table_matches_sequential() {
        let params = ModelParameters::new(
            array![0.2, 0.3, 0.5],
            array![[0.8, 0.1, 0.1], [0.1, 0.8, 0.1], [0.3, 0.3, 0.4]],
            array![[0.0, 0.0], [2.0, -1.0], [-1.5, 1.5]],
            vec![
                array![[1.0, 0.2], [0.2, 1.0]],
                array![[0.5, 0.0], [0.0, 2.0]],
                array![[1.5, -0.4], [-0.4, 0.8]],
            ],
        )
        .unwrap();
        let rows: Vec<Vec<f64>> = (0..257)
            .map(|i| {
                let t = i as f64 * 0.1;
                vec![2.0 * t.sin(), 1.5 * t.cos()]
            })
            .collect();
        let obs = ObservationSequence::from_rows(&rows).unwrap();
        let densities = state_densities(&params).unwrap();

        let parallel = parallel_table(&obs, &densities);
        let sequential = sequential_table(&obs, &densities);
        assert_eq!(parallel.dim(), (257, 3));
        assert_eq!(parallel, sequential);
        assert_eq!(emission_probabilities(&obs, &params).unwrap(), sequential);
    }
}
