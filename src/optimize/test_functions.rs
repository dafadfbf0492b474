//! Rosenbrock function and its derivatives.
//!
//! f(x) = Σ 100 (x[i+1] − x[i]²)² + (1 − x[i])², minimum 0 at x = 1.

use ndarray::{Array1, Array2, ArrayView1, s};

/// The Rosenbrock function.
pub fn rosen(x: ArrayView1<'_, f64>) -> f64 {
    let n = x.len();
    if n < 2 {
        return 0.0;
    }
    let head = x.slice(s![..n - 1]);
    let tail = x.slice(s![1..]);
    ndarray::Zip::from(&head)
        .and(&tail)
        .fold(0.0, |acc, &a, &b| acc + 100.0 * (b - a * a).powi(2) + (1.0 - a).powi(2))
}

/// Gradient of [`rosen`].
pub fn rosen_der(x: ArrayView1<'_, f64>) -> Array1<f64> {
    let n = x.len();
    let mut der = Array1::zeros(n);
    if n < 2 {
        return der;
    }
    for i in 1..n - 1 {
        let (xm, xi, xp) = (x[i - 1], x[i], x[i + 1]);
        der[i] = 200.0 * (xi - xm * xm) - 400.0 * (xp - xi * xi) * xi - 2.0 * (1.0 - xi);
    }
    der[0] = -400.0 * x[0] * (x[1] - x[0] * x[0]) - 2.0 * (1.0 - x[0]);
    der[n - 1] = 200.0 * (x[n - 1] - x[n - 2] * x[n - 2]);
    der
}

/// Hessian of [`rosen`].
pub fn rosen_hess(x: ArrayView1<'_, f64>) -> Array2<f64> {
    let n = x.len();
    let mut h = Array2::zeros((n, n));
    if n < 2 {
        return h;
    }
    for i in 0..n - 1 {
        h[[i, i + 1]] = -400.0 * x[i];
        h[[i + 1, i]] = -400.0 * x[i];
    }
    h[[0, 0]] = 1200.0 * x[0] * x[0] - 400.0 * x[1] + 2.0;
    for i in 1..n - 1 {
        h[[i, i]] = 202.0 + 1200.0 * x[i] * x[i] - 400.0 * x[i + 1];
    }
    h[[n - 1, n - 1]] = 200.0;
    h
}

/// Product of the Hessian of [`rosen`] at `x` with `p`.
pub fn rosen_hess_prod(x: ArrayView1<'_, f64>, p: ArrayView1<'_, f64>) -> Array1<f64> {
    let n = x.len();
    let mut hp = Array1::zeros(n);
    if n < 2 {
        return hp;
    }
    hp[0] = (1200.0 * x[0] * x[0] - 400.0 * x[1] + 2.0) * p[0] - 400.0 * x[0] * p[1];
    for i in 1..n - 1 {
        hp[i] = -400.0 * x[i - 1] * p[i - 1]
            + (202.0 + 1200.0 * x[i] * x[i] - 400.0 * x[i + 1]) * p[i]
            - 400.0 * x[i] * p[i + 1];
    }
    hp[n - 1] = -400.0 * x[n - 2] * p[n - 2] + 200.0 * p[n - 1];
    hp
}
