//! Starting parameters derived from a k-means clustering of the observations.

use ndarray::{Array1, Array2, ArrayView2};

use super::model::{ModelParameters, ObservationSequence};
use crate::error::{Error, Result};
use crate::ml::classic::k_means::{kmeans, KMeansConfig};

/// Options for [`initial_parameters`].
#[derive(Debug, Clone)]
pub struct InitConfig {
    pub kmeans: KMeansConfig,
    /// Probability mass on the diagonal of A when `K > 1`.
    pub self_transition: f64,
    /// Added to the diagonal of every initial covariance.
    pub covariance_floor: f64,
}

impl InitConfig {
    /// `K = k`, self-transition 0.9, covariance floor 1e-6.
    pub fn new(k: usize) -> Self {
        Self {
            kmeans: KMeansConfig::new(k),
            self_transition: 0.9,
            covariance_floor: 1e-6,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.kmeans = self.kmeans.with_seed(seed);
        self
    }

    pub fn with_self_transition(mut self, self_transition: f64) -> Self {
        self.self_transition = self_transition;
        self
    }

    pub fn with_covariance_floor(mut self, covariance_floor: f64) -> Self {
        self.covariance_floor = covariance_floor;
        self
    }
}

/// Derives a starting θ from a k-means clustering of `observations`.
///
/// π is uniform, A keeps `self_transition` on the diagonal and spreads the
/// rest evenly, μ are the centroids and Σ are the per-cluster covariances.
/// Clusters with fewer than two members fall back to the covariance of the
/// whole sequence.
///
/// # Errors
///
/// `Error::InvalidConfig` if `K` is zero or exceeds the sequence length, or
/// `self_transition` is outside `[0, 1]`.
pub fn initial_parameters(
    observations: &ObservationSequence,
    config: &InitConfig,
) -> Result<ModelParameters> {
    if !(0.0..=1.0).contains(&config.self_transition) {
        return Err(Error::InvalidConfig(format!(
            "self_transition must lie in [0, 1], got {}",
            config.self_transition
        )));
    }
    if config.covariance_floor.is_nan() || config.covariance_floor < 0.0 {
        return Err(Error::InvalidConfig(
            "covariance_floor must be non-negative".into(),
        ));
    }

    let x = observations.as_array();
    let (assignments, centroids) = kmeans(x, &config.kmeans)?;
    let k = config.kmeans.k;
    let d = observations.dim();

    let initial = Array1::from_elem(k, 1.0 / k as f64);
    let transitions = if k == 1 {
        Array2::from_elem((1, 1), 1.0)
    } else {
        let off = (1.0 - config.self_transition) / (k - 1) as f64;
        Array2::from_shape_fn((k, k), |(i, j)| {
            if i == j {
                config.self_transition
            } else {
                off
            }
        })
    };

    let global = scatter(x, None, d);
    let mut covariances = Vec::with_capacity(k);
    for cluster in 0..k {
        let members: Vec<usize> = assignments
            .iter()
            .enumerate()
            .filter_map(|(i, &c)| (c == cluster).then_some(i))
            .collect();
        let mut cov = if members.len() < 2 {
            global.clone()
        } else {
            scatter(x, Some(&members), d)
        };
        for i in 0..d {
            cov[[i, i]] += config.covariance_floor;
        }
        covariances.push(cov);
    }

    ModelParameters::new(initial, transitions, centroids, covariances)
}

/// Population covariance of the selected rows (all rows when `rows` is None).
fn scatter(x: ArrayView2<f64>, rows: Option<&[usize]>, d: usize) -> Array2<f64> {
    let selected: Vec<usize> = match rows {
        Some(rows) => rows.to_vec(),
        None => (0..x.nrows()).collect(),
    };
    let count = selected.len() as f64;

    let mut mean = Array1::<f64>::zeros(d);
    for &i in &selected {
        mean += &x.row(i);
    }
    mean /= count;

    let mut cov = Array2::<f64>::zeros((d, d));
    for &i in &selected {
        let diff = &x.row(i) - &mean;
        for a in 0..d {
            for b in 0..d {
                cov[[a, b]] += diff[a] * diff[b];
            }
        }
    }
    cov / count
}
