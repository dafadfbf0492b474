//! Shared numerical helpers for the minimizers.

#![allow(clippy::needless_range_loop)]

use ndarray::{Array1, Array2, ArrayView1};

/// Pivot magnitude below which a matrix is treated as singular.
pub const SINGULAR_THRESHOLD: f64 = 1e-14;

/// Machine epsilon.
pub const EPS: f64 = f64::EPSILON;

/// Compute the L2 (Euclidean) norm of a vector.
#[inline]
pub fn norm(v: ArrayView1<'_, f64>) -> f64 {
    v.dot(&v).sqrt()
}

/// Compute the L1 norm (sum of absolute values) of a vector.
#[inline]
pub fn norm_l1(v: ArrayView1<'_, f64>) -> f64 {
    v.iter().map(|x| x.abs()).sum()
}

/// Compute the infinity norm (max absolute value) of a vector.
///
/// NaN entries propagate, so a NaN gradient never reports convergence.
#[inline]
pub fn norm_inf(v: ArrayView1<'_, f64>) -> f64 {
    v.iter().fold(0.0, |acc: f64, x| {
        if x.is_nan() || acc.is_nan() {
            f64::NAN
        } else {
            acc.max(x.abs())
        }
    })
}

/// Solve a linear system Ax = b using Gaussian elimination with partial pivoting.
///
/// # Arguments
/// * `a` - Coefficient matrix (n x n)
/// * `b` - Right-hand side vector (length n)
///
/// # Returns
/// * `Some(x)` - Solution vector if system is non-singular
/// * `None` - If matrix is singular or dimensions don't match
pub fn solve_linear_system(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    if n == 0 || a.nrows() != n || a.ncols() != n {
        return None;
    }

    let mut m = a.clone();
    let mut rhs = b.clone();

    for col in 0..n {
        let mut pivot = col;
        let mut pivot_val = m[[col, col]].abs();
        for row in (col + 1)..n {
            if m[[row, col]].abs() > pivot_val {
                pivot_val = m[[row, col]].abs();
                pivot = row;
            }
        }

        if pivot_val.is_nan() || pivot_val < SINGULAR_THRESHOLD {
            return None;
        }

        if pivot != col {
            for j in 0..n {
                m.swap([col, j], [pivot, j]);
            }
            rhs.swap(col, pivot);
        }

        for row in (col + 1)..n {
            let factor = m[[row, col]] / m[[col, col]];
            for j in col..n {
                m[[row, j]] -= factor * m[[col, j]];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = rhs[i];
        for j in (i + 1)..n {
            sum -= m[[i, j]] * x[j];
        }
        x[i] = sum / m[[i, i]];
    }

    Some(x)
}

/// Outer product `a bᵀ`.
pub fn outer(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> Array2<f64> {
    let mut out = Array2::zeros((a.len(), b.len()));
    for i in 0..a.len() {
        for j in 0..b.len() {
            out[[i, j]] = a[i] * b[j];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_norms() {
        let v = array![3.0, -4.0];
        assert_abs_diff_eq!(norm(v.view()), 5.0, epsilon = 1e-12);
        assert_eq!(norm_l1(v.view()), 7.0);
        assert_eq!(norm_inf(v.view()), 4.0);
        assert_eq!(norm_inf(Array1::<f64>::zeros(0).view()), 0.0);
    }

    #[test]
    fn test_norm_inf_propagates_nan() {
        let v = array![1.0, f64::NAN, 3.0];
        assert!(norm_inf(v.view()).is_nan());
    }

    #[test]
    fn test_solve_linear_system_simple() {
        // 2x + y = 5, x + 3y = 5 -> (2, 1)
        let a = array![[2.0, 1.0], [1.0, 3.0]];
        let b = array![5.0, 5.0];
        let x = solve_linear_system(&a, &b).expect("non-singular system");
        assert_abs_diff_eq!(x[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_solve_linear_system_needs_pivot() {
        let a = array![[0.0, 1.0], [1.0, 0.0]];
        let b = array![2.0, 3.0];
        let x = solve_linear_system(&a, &b).expect("non-singular system");
        assert_abs_diff_eq!(x[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_solve_linear_system_singular() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        let b = array![1.0, 2.0];
        assert!(solve_linear_system(&a, &b).is_none());
    }

    #[test]
    fn test_outer() {
        let m = outer(array![1.0, 2.0].view(), array![3.0, 4.0, 5.0].view());
        assert_eq!(m, array![[3.0, 4.0, 5.0], [6.0, 8.0, 10.0]]);
    }
}
