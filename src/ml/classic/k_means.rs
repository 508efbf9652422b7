use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::{Error, Result};

/// Settings for [`kmeans`].
#[derive(Debug, Clone)]
pub struct KMeansConfig {
    /// Number of clusters to find.
    pub k: usize,
    /// Maximum number of iterations.
    pub max_iterations: usize,
    /// Stop once no centroid moves farther than this in one iteration.
    pub tolerance: f64,
    /// Seed for choosing the initial centroids.
    pub seed: u64,
}

impl KMeansConfig {
    /// `k` clusters, at most 300 iterations, tolerance `1e-4`, seed 0.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iterations: 300,
            tolerance: 1e-4,
            seed: 0,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Seed for the initial centroid draw.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Lloyd's algorithm over the rows of `data`. Returns each row's cluster
/// label and the `k x D` centroid matrix.
///
/// Initial centroids are `k` distinct rows chosen with a ChaCha RNG seeded
/// from `config.seed`, so results are reproducible.
///
/// # Errors
///
/// Returns `Error::InvalidConfig` if `config.k` is 0 or greater than the
/// number of rows, or if `data` has no columns.
///
/// # Example
///
/// ```
/// use baum_welch::ml::classic::{kmeans, KMeansConfig};
/// use ndarray::array;
///
/// let data = array![[1.0, 2.0], [1.5, 1.8], [5.0, 8.0], [8.0, 8.0]];
/// let config = KMeansConfig::new(2);
/// let (assignments, centroids) = kmeans(data.view(), &config).unwrap();
///
/// assert_eq!(assignments.len(), 4);
/// assert_eq!(centroids.dim(), (2, 2));
/// ```
pub fn kmeans(data: ArrayView2<f64>, config: &KMeansConfig) -> Result<(Vec<usize>, Array2<f64>)> {
    let (n, dim) = data.dim();
    if dim == 0 {
        return Err(Error::InvalidConfig(
            "data points must have at least one dimension".into(),
        ));
    }
    if config.k == 0 || config.k > n {
        return Err(Error::InvalidConfig(format!(
            "invalid number of clusters k = {} for dataset of size {}",
            config.k, n
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let picks = sample(&mut rng, n, config.k);
    let mut centroids = Array2::<f64>::zeros((config.k, dim));
    for (c, idx) in picks.iter().enumerate() {
        centroids.row_mut(c).assign(&data.row(idx));
    }

    let mut assignments = vec![0_usize; n];
    let tolerance_sq = config.tolerance * config.tolerance;

    for _ in 0..config.max_iterations {
        let mut reassigned = 0;
        for (point, label) in data.rows().into_iter().zip(assignments.iter_mut()) {
            let nearest = nearest_centroid(point, centroids.view(), *label);
            if nearest != *label {
                *label = nearest;
                reassigned += 1;
            }
        }

        let shift_sq = move_centroids(data, &assignments, &mut centroids);
        if reassigned == 0 || shift_sq < tolerance_sq {
            break;
        }
    }

    Ok((assignments, centroids))
}

/// Index of the centroid closest to `point`. `current` wins ties, so a point
/// only moves when another centroid is strictly closer.
fn nearest_centroid(
    point: ArrayView1<f64>,
    centroids: ArrayView2<f64>,
    current: usize,
) -> usize {
    let mut best = (current, distance_sq(point, centroids.row(current)));
    for (c, centroid) in centroids.rows().into_iter().enumerate() {
        let d = distance_sq(point, centroid);
        if d < best.1 {
            best = (c, d);
        }
    }
    best.0
}

/// Moves every non-empty cluster's centroid to the mean of its members and
/// returns the largest squared move. A cluster with no members stays put.
fn move_centroids(
    data: ArrayView2<f64>,
    assignments: &[usize],
    centroids: &mut Array2<f64>,
) -> f64 {
    let mut sums = Array2::<f64>::zeros(centroids.raw_dim());
    let mut members = vec![0_usize; centroids.nrows()];
    for (point, &c) in data.rows().into_iter().zip(assignments) {
        members[c] += 1;
        let mut sum = sums.row_mut(c);
        sum += &point;
    }

    let mut largest = 0.0_f64;
    for ((mut centroid, sum), &count) in centroids
        .rows_mut()
        .into_iter()
        .zip(sums.rows())
        .zip(&members)
    {
        if count == 0 {
            continue;
        }
        let mean = &sum / count as f64;
        largest = largest.max(distance_sq(centroid.view(), mean.view()));
        centroid.assign(&mean);
    }
    largest
}

fn distance_sq(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .fold(0.0, |acc, (&x, &y)| acc + (x - y).powi(2))
}
