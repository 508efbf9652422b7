use ndarray::{Array1, Array2, ArrayView1};

/// Relative pivot threshold below which a matrix is treated as singular.
const MIN_RELATIVE_PIVOT: f64 = 1e-12;

/// Computes the lower-triangular Cholesky factor `L` with `L Lᵀ = matrix`.
///
/// Returns `None` if the matrix is not square, not finite, or not
/// positive-definite. A pivot counts as non-positive when it does not exceed
/// `1e-12` times its own diagonal entry, so a covariance with a zero
/// eigenvalue is rejected instead of producing a huge inverse, while a
/// well-conditioned matrix with widely different variances is accepted.
pub fn cholesky(matrix: &Array2<f64>) -> Option<Array2<f64>> {
    let (n, m) = matrix.dim();
    if n != m || n == 0 {
        return None;
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = matrix[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                let min_pivot = MIN_RELATIVE_PIVOT * matrix[[i, i]].abs();
                if sum.is_nan() || sum <= 0.0 || sum <= min_pivot {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// Solves `L z = b` for a lower-triangular `L` by forward substitution.
pub fn solve_lower(l: &Array2<f64>, b: ArrayView1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[[i, j]] * z[j];
        }
        z[i] = sum / l[[i, i]];
    }
    z
}

/// `ln |A|` given the Cholesky factor of `A`.
pub fn log_determinant(l: &Array2<f64>) -> f64 {
    2.0 * l.diag().iter().map(|d| d.ln()).sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_cholesky_reconstructs_matrix() {
        let a = array![[4.0, 2.0, 0.4], [2.0, 5.0, 1.0], [0.4, 1.0, 3.0]];
        let l = cholesky(&a).unwrap();
        let rebuilt = l.dot(&l.t());
        for (x, y) in rebuilt.iter().zip(a.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-12);
        }
        // upper triangle stays zero
        assert_eq!(l[[0, 1]], 0.0);
        assert_eq!(l[[0, 2]], 0.0);
        assert_eq!(l[[1, 2]], 0.0);
    }

    #[test]
    fn test_cholesky_rejects_zero_eigenvalue() {
        let a = array![[1.0, 1.0], [1.0, 1.0]];
        assert!(cholesky(&a).is_none());
        let zero = array![[0.0]];
        assert!(cholesky(&zero).is_none());
    }

    #[test]
    fn test_cholesky_accepts_widely_scaled_diagonal() {
        let a = array![[1.0e6, 0.0], [0.0, 1.0e-7]];
        let l = cholesky(&a).unwrap();
        assert_relative_eq!(l[[0, 0]], 1.0e3, epsilon = 1e-9);
        assert_relative_eq!(l[[1, 1]], 1.0e-7_f64.sqrt(), epsilon = 1e-15);
        assert_relative_eq!(log_determinant(&l), (1.0e6_f64 * 1.0e-7).ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_cholesky_rejects_indefinite_and_non_finite() {
        let indefinite = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(cholesky(&indefinite).is_none());
        let nan = array![[f64::NAN, 0.0], [0.0, 1.0]];
        assert!(cholesky(&nan).is_none());
    }

    #[test]
    fn test_solve_lower_and_log_determinant() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let l = cholesky(&a).unwrap();
        let b = array![2.0, 1.0];
        let z = solve_lower(&l, b.view());
        let back = l.dot(&z);
        assert_relative_eq!(back[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(back[1], 1.0, epsilon = 1e-12);
        // det = 4*3 - 2*2 = 8
        assert_relative_eq!(log_determinant(&l), 8.0_f64.ln(), epsilon = 1e-12);
    }
}
