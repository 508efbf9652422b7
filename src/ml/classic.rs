pub mod k_means;

pub use k_means::{kmeans, KMeansConfig};
