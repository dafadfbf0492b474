//! Shared fixtures for the minimizer tests.

use std::cell::{Cell, RefCell};

use ndarray::{Array1, Array2, ArrayView1, array};

use super::problem::Problem;

/// Maximum entropy problem of Berger, Della Pietra and Della Pietra (1996).
///
/// f(x) = log Σ exp(F x) − K·x. Counts objective and gradient calls and
/// records every point the objective is evaluated at.
pub(crate) struct Berger {
    f: Array2<f64>,
    k: Array1<f64>,
    pub funccalls: Cell<usize>,
    pub gradcalls: Cell<usize>,
    pub trace: RefCell<Vec<Array1<f64>>>,
}

impl Berger {
    pub fn new() -> Self {
        Self {
            f: array![
                [1.0, 1.0, 1.0],
                [1.0, 1.0, 0.0],
                [1.0, 0.0, 1.0],
                [1.0, 0.0, 0.0],
                [1.0, 0.0, 0.0]
            ],
            k: array![1.0, 0.3, 0.5],
            funccalls: Cell::new(0),
            gradcalls: Cell::new(0),
            trace: RefCell::new(Vec::new()),
        }
    }

    pub fn x0() -> Array1<f64> {
        Array1::zeros(3)
    }

    pub fn solution() -> Array1<f64> {
        array![0.0, -0.524869316, 0.487525860]
    }

    /// Event probabilities exp(F x − log Z).
    fn probabilities(&self, x: ArrayView1<'_, f64>) -> (Array1<f64>, f64) {
        let log_pdot = self.f.dot(&x);
        let log_z = log_pdot.mapv(f64::exp).sum().ln();
        (log_pdot.mapv(|v| (v - log_z).exp()), log_z)
    }

    pub fn func(&self, x: ArrayView1<'_, f64>) -> f64 {
        self.funccalls.set(self.funccalls.get() + 1);
        let (_, log_z) = self.probabilities(x);
        self.trace.borrow_mut().push(x.to_owned());
        log_z - self.k.dot(&x)
    }

    pub fn grad(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        self.gradcalls.set(self.gradcalls.get() + 1);
        let (p, _) = self.probabilities(x);
        self.f.t().dot(&p) - &self.k
    }

    pub fn hess(&self, x: ArrayView1<'_, f64>) -> Array2<f64> {
        let (p, _) = self.probabilities(x);
        let mean = self.f.t().dot(&p);
        let centered = &self.f - &mean;
        let weighted = &centered * &p.view().insert_axis(ndarray::Axis(1));
        self.f.t().dot(&weighted)
    }

    pub fn hessp(&self, x: ArrayView1<'_, f64>, p: ArrayView1<'_, f64>) -> Array1<f64> {
        self.hess(x).dot(&p)
    }

    /// Objective only.
    pub fn problem(&self) -> Problem<'_> {
        Problem::new(|x: ArrayView1<f64>| self.func(x))
    }

    /// Objective and analytic gradient.
    pub fn problem_with_gradient(&self) -> Problem<'_> {
        self.problem().with_gradient(|x: ArrayView1<f64>| self.grad(x))
    }

    /// Check the minimizer output the way the regression counts expect:
    /// the comparison itself spends two objective calls.
    pub fn assert_optimal(&self, x: &Array1<f64>) {
        let found = self.func(x.view());
        let best = self.func(Self::solution().view());
        assert!(
            (found - best).abs() <= 1e-6,
            "f(x) = {found}, f(solution) = {best}"
        );
    }

    /// Compare `trace[range]` with expected rows.
    pub fn assert_trace(&self, start: usize, expected: &[[f64; 3]], atol: f64, rtol: f64) {
        let trace = self.trace.borrow();
        assert!(
            trace.len() >= start + expected.len(),
            "trace holds {} points",
            trace.len()
        );
        for (i, row) in expected.iter().enumerate() {
            assert_allclose(trace[start + i].view(), row, atol, rtol);
        }
    }
}

/// Elementwise |actual − expected| ≤ atol + rtol·|expected|.
pub(crate) fn assert_allclose(actual: ArrayView1<'_, f64>, expected: &[f64], atol: f64, rtol: f64) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= atol + rtol * e.abs(),
            "component {i}: {a} vs {e} (actual {actual})"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_gradient_vanishes_at_solution() {
        let b = Berger::new();
        let g = b.grad(Berger::solution().view());
        for v in g.iter() {
            assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_hessian_matches_gradient_differences() {
        let b = Berger::new();
        let x = array![0.1, -0.3, 0.2];
        let h = b.hess(x.view());
        let eps = 1e-6;
        for j in 0..3 {
            let mut xp = x.clone();
            xp[j] += eps;
            let col = (b.grad(xp.view()) - b.grad(x.view())) / eps;
            for i in 0..3 {
                assert_abs_diff_eq!(h[[i, j]], col[i], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_counters_and_trace() {
        let b = Berger::new();
        b.func(Berger::x0().view());
        b.grad(Berger::x0().view());
        assert_eq!(b.funccalls.get(), 1);
        assert_eq!(b.gradcalls.get(), 1);
        assert_eq!(b.trace.borrow().len(), 1);
    }
}
