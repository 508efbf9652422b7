use approx::abs_diff_eq;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::error::{Error, Result};

/// Tolerance used when checking that π and the rows of A sum to one.
pub const STOCHASTIC_TOLERANCE: f64 = 1e-6;

/// An immutable sequence of `N` observations, each a `D`-dimensional vector.
///
/// Row `n` of the underlying `(N, D)` matrix is the observation at position `n`.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationSequence {
    data: Array2<f64>,
}

impl ObservationSequence {
    /// Wraps an `(N, D)` matrix.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidObservations` if `N` or `D` is zero or any value
    /// is not finite.
    pub fn new(data: Array2<f64>) -> Result<Self> {
        let (n, d) = data.dim();
        if n == 0 {
            return Err(Error::InvalidObservations(
                "sequence must contain at least one observation".into(),
            ));
        }
        if d == 0 {
            return Err(Error::InvalidObservations(
                "observations must have at least one dimension".into(),
            ));
        }
        if let Some(pos) = data.iter().position(|v| !v.is_finite()) {
            return Err(Error::InvalidObservations(format!(
                "observation {} contains a non-finite value",
                pos / d
            )));
        }
        Ok(Self { data })
    }

    /// Builds a sequence from row vectors, rejecting ragged input.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let dim = rows.first().map_or(0, Vec::len);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dim {
                return Err(Error::InvalidObservations(format!(
                    "observation {} has {} dimensions, expected {}",
                    i,
                    row.len(),
                    dim
                )));
            }
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let data = Array2::from_shape_vec((rows.len(), dim), flat)
            .map_err(|e| Error::InvalidObservations(e.to_string()))?;
        Self::new(data)
    }

    /// Builds a one-dimensional sequence from scalar observations.
    pub fn from_scalars(values: &[f64]) -> Result<Self> {
        let data = Array2::from_shape_fn((values.len(), 1), |(n, _)| values[n]);
        Self::new(data)
    }

    /// Number of observations `N`.
    pub fn len(&self) -> usize {
        self.data.nrows()
    }

    /// Always false; an empty sequence cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.data.nrows() == 0
    }

    /// Dimension `D` of every observation.
    pub fn dim(&self) -> usize {
        self.data.ncols()
    }

    /// The observation at position `n`.
    pub fn get(&self, n: usize) -> ArrayView1<'_, f64> {
        self.data.row(n)
    }

    pub fn as_array(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }
}

/// The parameter set θ = {π, A, μ, Σ} of a Gaussian HMM with `K` states.
///
/// All four parts are index-aligned by state. Values are never mutated in
/// place during training; every EM iteration produces a fresh value.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParameters {
    initial: Array1<f64>,
    transitions: Array2<f64>,
    means: Array2<f64>,
    covariances: Vec<Array2<f64>>,
}

impl ModelParameters {
    /// Creates a validated parameter set.
    ///
    /// - `initial`: π, length `K`
    /// - `transitions`: A, `K x K`, `A[[j, k]] = P(k at n | j at n-1)`
    /// - `means`: μ, `K x D`, one row per state
    /// - `covariances`: Σ, `K` symmetric `D x D` matrices
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidParameters` if shapes disagree, any value is
    /// negative or non-finite, π or a row of A does not sum to one, or a
    /// covariance is not symmetric. Positive-definiteness is checked when
    /// densities are built.
    ///
    /// π and every row of A are rescaled to sum to exactly one after the
    /// tolerance check, so rows that are never re-estimated stay stochastic.
    pub fn new(
        initial: Array1<f64>,
        transitions: Array2<f64>,
        means: Array2<f64>,
        covariances: Vec<Array2<f64>>,
    ) -> Result<Self> {
        let mut params = Self {
            initial,
            transitions,
            means,
            covariances,
        };
        params.validate()?;
        let total = params.initial.sum();
        params.initial /= total;
        for mut row in params.transitions.rows_mut() {
            let total = row.sum();
            row /= total;
        }
        Ok(params)
    }

    /// Assembles parameters produced by re-estimation, which preserves the
    /// invariants by construction.
    pub(crate) fn from_parts(
        initial: Array1<f64>,
        transitions: Array2<f64>,
        means: Array2<f64>,
        covariances: Vec<Array2<f64>>,
    ) -> Self {
        Self {
            initial,
            transitions,
            means,
            covariances,
        }
    }

    fn validate(&self) -> Result<()> {
        let k = self.initial.len();
        if k == 0 {
            return Err(invalid("model must have at least one state"));
        }
        if self.transitions.dim() != (k, k) {
            return Err(invalid(format!(
                "transition matrix has shape {:?}, expected ({}, {})",
                self.transitions.dim(),
                k,
                k
            )));
        }
        if self.means.nrows() != k {
            return Err(invalid(format!(
                "expected {} mean vectors, got {}",
                k,
                self.means.nrows()
            )));
        }
        let d = self.means.ncols();
        if d == 0 {
            return Err(invalid("mean vectors must have at least one dimension"));
        }
        if self.covariances.len() != k {
            return Err(invalid(format!(
                "expected {} covariance matrices, got {}",
                k,
                self.covariances.len()
            )));
        }

        check_distribution(self.initial.view(), "initial distribution")?;
        for (j, row) in self.transitions.rows().into_iter().enumerate() {
            check_distribution(row, &format!("transition row {}", j))?;
        }
        if self.means.iter().any(|v| !v.is_finite()) {
            return Err(invalid("mean vectors must be finite"));
        }

        for (state, cov) in self.covariances.iter().enumerate() {
            if cov.dim() != (d, d) {
                return Err(invalid(format!(
                    "covariance {} has shape {:?}, expected ({}, {})",
                    state,
                    cov.dim(),
                    d,
                    d
                )));
            }
            if cov.iter().any(|v| !v.is_finite()) {
                return Err(invalid(format!("covariance {} must be finite", state)));
            }
            for i in 0..d {
                for j in (i + 1)..d {
                    let scale = cov[[i, j]].abs().max(cov[[j, i]].abs()).max(1.0);
                    if (cov[[i, j]] - cov[[j, i]]).abs() > 1e-9 * scale {
                        return Err(invalid(format!("covariance {} is not symmetric", state)));
                    }
                }
            }
        }
        Ok(())
    }

    /// Number of hidden states `K`.
    pub fn num_states(&self) -> usize {
        self.initial.len()
    }

    /// Emission dimension `D`.
    pub fn dim(&self) -> usize {
        self.means.ncols()
    }

    pub fn initial(&self) -> &Array1<f64> {
        &self.initial
    }

    pub fn transitions(&self) -> &Array2<f64> {
        &self.transitions
    }

    pub fn means(&self) -> &Array2<f64> {
        &self.means
    }

    pub fn covariances(&self) -> &[Array2<f64>] {
        &self.covariances
    }

    pub fn mean(&self, state: usize) -> ArrayView1<'_, f64> {
        self.means.row(state)
    }

    pub fn covariance(&self, state: usize) -> &Array2<f64> {
        &self.covariances[state]
    }

    /// Checks that these parameters can explain `observations`.
    pub fn check_compatible(&self, observations: &ObservationSequence) -> Result<()> {
        if observations.dim() != self.dim() {
            return Err(invalid(format!(
                "model dimension {} does not match observation dimension {}",
                self.dim(),
                observations.dim()
            )));
        }
        Ok(())
    }

    /// Checks that an `N x K` emission table fits these parameters.
    pub fn check_emissions(&self, emissions: &Array2<f64>) -> Result<()> {
        let (n, k) = emissions.dim();
        if n == 0 {
            return Err(Error::InvalidObservations(
                "emission table has no rows".into(),
            ));
        }
        if k != self.num_states() {
            return Err(invalid(format!(
                "emission table has {} columns, expected {} states",
                k,
                self.num_states()
            )));
        }
        Ok(())
    }

    /// Largest absolute difference between corresponding entries of two
    /// parameter sets with the same shape.
    pub fn max_abs_diff(&self, other: &ModelParameters) -> f64 {
        let mut max = max_abs(&self.initial, &other.initial)
            .max(max_abs(&self.transitions, &other.transitions))
            .max(max_abs(&self.means, &other.means));
        for (a, b) in self.covariances.iter().zip(&other.covariances) {
            max = max.max(max_abs(a, b));
        }
        max
    }
}

fn max_abs<D: ndarray::Dimension>(a: &ndarray::Array<f64, D>, b: &ndarray::Array<f64, D>) -> f64 {
    a.iter()
        .zip(b.iter())
        .fold(0.0_f64, |acc, (x, y)| acc.max((x - y).abs()))
}

fn check_distribution(values: ArrayView1<f64>, what: &str) -> Result<()> {
    if values.iter().any(|&p| !p.is_finite() || p < 0.0) {
        return Err(invalid(format!(
            "{} must contain finite non-negative probabilities",
            what
        )));
    }
    let sum = values.sum();
    if !abs_diff_eq!(sum, 1.0, epsilon = STOCHASTIC_TOLERANCE) {
        return Err(invalid(format!("{} sums to {}, expected 1", what, sum)));
    }
    Ok(())
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidParameters(msg.into())
}
