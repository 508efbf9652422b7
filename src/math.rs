pub mod linalg;

pub use linalg::{cholesky, log_determinant, solve_lower};
