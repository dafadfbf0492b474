//! Per-run wrapper around user callbacks.
//!
//! Every objective, gradient and Hessian invocation made by a minimizer goes
//! through a [`FunctionEvaluator`]. The evaluator is created fresh for each
//! run and owns the call counters, so the counts reported in a result are
//! exactly the number of user callback invocations of that run.

use ndarray::{Array1, Array2, ArrayView1};

use super::bounds::Bounds;
use super::error::{OptimizeError, OptimizeResult};
use super::problem::{Derivatives, FiniteDiffStep, Problem};
use super::utils::EPS;

/// Call-counting evaluator for one optimization run.
pub struct FunctionEvaluator<'p, 'a> {
    problem: &'p Problem<'a>,
    n: usize,
    nfev: usize,
    ngev: usize,
    nhev: usize,
}

impl<'p, 'a> FunctionEvaluator<'p, 'a> {
    /// Create an evaluator for a problem of dimension `n`.
    ///
    /// # Errors
    /// * `DimensionMismatch` if the bounds or a per-component finite
    ///   difference step do not have length `n`
    /// * `InvalidParameter` if a finite difference step is not positive
    pub fn new(problem: &'p Problem<'a>, n: usize) -> OptimizeResult<Self> {
        if let Some(bounds) = &problem.bounds {
            bounds.check_len(n)?;
        }
        match &problem.fd_step {
            FiniteDiffStep::Scalar(h) => {
                if h.is_nan() || *h <= 0.0 {
                    return Err(OptimizeError::invalid_parameter(
                        "finite_diff_step",
                        "step must be positive",
                    ));
                }
            }
            FiniteDiffStep::PerComponent(h) => {
                if h.len() != n {
                    return Err(OptimizeError::dimension_mismatch(
                        "finite_diff_step",
                        n,
                        h.len(),
                    ));
                }
                if h.iter().any(|v| v.is_nan() || *v <= 0.0) {
                    return Err(OptimizeError::invalid_parameter(
                        "finite_diff_step",
                        "every component step must be positive",
                    ));
                }
            }
        }
        Ok(Self {
            problem,
            n,
            nfev: 0,
            ngev: 0,
            nhev: 0,
        })
    }

    pub fn nfev(&self) -> usize {
        self.nfev
    }

    pub fn ngev(&self) -> usize {
        self.ngev
    }

    pub fn nhev(&self) -> usize {
        self.nhev
    }

    pub fn bounds(&self) -> Option<&'p Bounds> {
        self.problem.bounds.as_ref()
    }

    /// Whether gradients come from a user callback rather than differences.
    pub fn has_gradient(&self) -> bool {
        self.problem.has_gradient()
    }

    /// Evaluate the objective.
    pub fn fun(&mut self, x: ArrayView1<'_, f64>) -> OptimizeResult<f64> {
        self.nfev += 1;
        (self.problem.objective)(x).map_err(OptimizeError::Callback)
    }

    /// Evaluate the gradient at `x`.
    ///
    /// `fx` is the objective value at `x` when already known; a forward
    /// difference gradient reuses it instead of re-evaluating the objective.
    pub fn grad(&mut self, x: ArrayView1<'_, f64>, fx: Option<f64>) -> OptimizeResult<Array1<f64>> {
        let problem = self.problem;
        match problem.derivatives.gradient() {
            Some(g) => {
                self.ngev += 1;
                let out = g(x).map_err(OptimizeError::Callback)?;
                if out.len() != self.n {
                    return Err(OptimizeError::dimension_mismatch(
                        "gradient",
                        self.n,
                        out.len(),
                    ));
                }
                Ok(out)
            }
            None => {
                let f0 = match fx {
                    Some(v) => v,
                    None => self.fun(x)?,
                };
                self.forward_difference(x, f0)
            }
        }
    }

    /// Evaluate both objective and gradient at `x`.
    pub fn fun_and_grad(&mut self, x: ArrayView1<'_, f64>) -> OptimizeResult<(f64, Array1<f64>)> {
        let f = self.fun(x)?;
        let g = self.grad(x, Some(f))?;
        Ok((f, g))
    }

    /// Forward differences, stepping backwards where a forward step would
    /// leave the box.
    fn forward_difference(&mut self, x: ArrayView1<'_, f64>, f0: f64) -> OptimizeResult<Array1<f64>> {
        let problem = self.problem;
        let mut grad = Array1::zeros(self.n);
        let mut xp = x.to_owned();
        for i in 0..self.n {
            let orig = xp[i];
            let h = problem.fd_step.get(i);
            let target = match &problem.bounds {
                Some(bounds) => step_inside(orig, h, bounds.lower()[i], bounds.upper()[i]),
                None => orig + h,
            };
            let h = target - orig;
            if h == 0.0 {
                // Fixed variable.
                continue;
            }
            xp[i] = target;
            let fp = self.fun(xp.view())?;
            xp[i] = orig;
            grad[i] = (fp - f0) / h;
        }
        Ok(grad)
    }

    /// Evaluate the dense Hessian when one was supplied.
    pub fn hessian(&mut self, x: ArrayView1<'_, f64>) -> OptimizeResult<Option<Array2<f64>>> {
        let problem = self.problem;
        match &problem.derivatives {
            Derivatives::Hessian(_, h) => {
                self.nhev += 1;
                let out = h(x).map_err(OptimizeError::Callback)?;
                if out.nrows() != self.n || out.ncols() != self.n {
                    return Err(OptimizeError::dimension_mismatch(
                        "hessian",
                        self.n,
                        out.nrows().max(out.ncols()),
                    ));
                }
                Ok(Some(out))
            }
            _ => Ok(None),
        }
    }

    /// Hessian-vector product `H(x) p`.
    ///
    /// Uses the user product callback when present; otherwise one extra
    /// gradient at `x + εp` differenced against `gx`, the gradient already
    /// known at `x`.
    pub fn hess_prod(
        &mut self,
        x: ArrayView1<'_, f64>,
        gx: ArrayView1<'_, f64>,
        p: ArrayView1<'_, f64>,
    ) -> OptimizeResult<Array1<f64>> {
        let problem = self.problem;
        if let Derivatives::HessianProduct(_, hp) = &problem.derivatives {
            self.nhev += 1;
            let out = hp(x, p).map_err(OptimizeError::Callback)?;
            if out.len() != self.n {
                return Err(OptimizeError::dimension_mismatch(
                    "hessian product",
                    self.n,
                    out.len(),
                ));
            }
            return Ok(out);
        }
        let eps = EPS.sqrt();
        let xe = &x + &(&p * eps);
        let ge = self.grad(xe.view(), None)?;
        Ok((ge - &gx) / eps)
    }
}

/// Point a finite-difference step of `h` away from `x` inside `[lower, upper]`.
///
/// Steps forward when there is room, backward otherwise. A box narrower than
/// `h` on both sides gets the end with more room.
fn step_inside(x: f64, h: f64, lower: f64, upper: f64) -> f64 {
    if x + h <= upper {
        x + h
    } else if x - h >= lower {
        x - h
    } else if upper - x >= x - lower {
        upper
    } else {
        lower
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::cell::Cell;

    #[test]
    fn test_counts_match_callback_invocations() {
        let calls = Cell::new(0usize);
        let gcalls = Cell::new(0usize);
        let problem = Problem::new(|x: ArrayView1<f64>| {
            calls.set(calls.get() + 1);
            x.dot(&x)
        })
        .with_gradient(|x: ArrayView1<f64>| {
            gcalls.set(gcalls.get() + 1);
            x.mapv(|v| 2.0 * v)
        });

        let mut ev = FunctionEvaluator::new(&problem, 2).expect("valid problem");
        let x = array![1.0, 2.0];
        let (f, g) = ev.fun_and_grad(x.view()).expect("evaluation");
        assert_eq!(f, 5.0);
        assert_eq!(g, array![2.0, 4.0]);
        ev.fun(x.view()).expect("evaluation");

        assert_eq!(ev.nfev(), calls.get());
        assert_eq!(ev.ngev(), gcalls.get());
        assert_eq!(ev.nfev(), 2);
        assert_eq!(ev.ngev(), 1);
    }

    #[test]
    fn test_forward_difference_counts_objective_calls() {
        let calls = Cell::new(0usize);
        let problem = Problem::new(|x: ArrayView1<f64>| {
            calls.set(calls.get() + 1);
            x[0] * x[0] + 3.0 * x[1]
        });
        let mut ev = FunctionEvaluator::new(&problem, 2).expect("valid problem");
        let x = array![1.0, 2.0];
        let g = ev.grad(x.view(), None).expect("gradient");
        assert_abs_diff_eq!(g[0], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(g[1], 3.0, epsilon = 1e-6);
        assert_eq!(ev.nfev(), 3);
        assert_eq!(calls.get(), 3);
        assert_eq!(ev.ngev(), 0);
    }

    #[test]
    fn test_per_component_step_and_bound_aware_difference() {
        let bounds = Bounds::new([(None, Some(1.0)), (None, None)]).expect("feasible");
        let problem = Problem::new(|x: ArrayView1<f64>| {
            assert!(x[0] <= 1.0, "stepped outside the box");
            x[0] * x[0] + x[1] * x[1]
        })
        .with_bounds(bounds)
        .with_finite_diff_step(FiniteDiffStep::PerComponent(array![1e-7, 1e-6]));
        let mut ev = FunctionEvaluator::new(&problem, 2).expect("valid problem");
        let g = ev.grad(array![1.0, 1.0].view(), None).expect("gradient");
        assert_abs_diff_eq!(g[0], 2.0, epsilon = 1e-5);
        assert_abs_diff_eq!(g[1], 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_difference_step_in_narrow_box() {
        let bounds = Bounds::new([(Some(0.0), Some(1e-10)), (Some(1.0), Some(1.0))]).expect("feasible");
        let problem = Problem::new(|x: ArrayView1<f64>| {
            assert!((0.0..=1e-10).contains(&x[0]), "stepped outside the box: {}", x[0]);
            assert_eq!(x[1], 1.0);
            3.0 * x[0] + x[1]
        })
        .with_bounds(bounds);
        let mut ev = FunctionEvaluator::new(&problem, 2).expect("valid problem");
        let g = ev.grad(array![3e-11, 1.0].view(), None).expect("gradient");
        assert_abs_diff_eq!(g[0], 3.0, epsilon = 1e-4);
        assert_eq!(g[1], 0.0);
        // The fixed variable is never stepped.
        assert_eq!(ev.nfev(), 2);
    }

    #[test]
    fn test_narrow_box_takes_wider_side() {
        assert_eq!(step_inside(0.5, 0.25, 0.0, 1.0), 0.75);
        assert_eq!(step_inside(1.0, 0.25, 0.0, 1.0), 0.75);
        assert_eq!(step_inside(0.2, 1.0, 0.0, 1.0), 1.0);
        assert_eq!(step_inside(0.8, 1.0, 0.0, 1.0), 0.0);
        assert_eq!(step_inside(1.0, 1.0, 1.0, 1.0), 1.0);
    }

    #[test]
    fn test_step_length_mismatch_rejected() {
        let problem = Problem::new(|x: ArrayView1<f64>| x.sum())
            .with_finite_diff_step(FiniteDiffStep::PerComponent(array![1e-8]));
        match FunctionEvaluator::new(&problem, 3) {
            Err(OptimizeError::DimensionMismatch { .. }) => {}
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("length mismatch accepted"),
        }
    }

    #[test]
    fn test_callback_error_propagates() {
        let problem = Problem::new(|_x: ArrayView1<f64>| -> Result<f64, String> {
            Err("objective exploded".to_string())
        });
        let mut ev = FunctionEvaluator::new(&problem, 1).expect("valid problem");
        let err = ev.fun(array![0.0].view()).expect_err("callback error");
        match err {
            OptimizeError::Callback(inner) => assert_eq!(inner.to_string(), "objective exploded"),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(ev.nfev(), 1);
    }

    #[test]
    fn test_hess_prod_sources() {
        let grad = |x: ArrayView1<f64>| array![2.0 * x[0] + x[1], x[0] + 4.0 * x[1]];
        let x = array![0.5, -1.0];
        let p = array![1.0, 2.0];

        let exact = Problem::new(|x: ArrayView1<f64>| x[0] * x[0] + x[0] * x[1] + 2.0 * x[1] * x[1])
            .with_hessian_product(grad, |_x: ArrayView1<f64>, p: ArrayView1<f64>| {
                array![2.0 * p[0] + p[1], p[0] + 4.0 * p[1]]
            });
        let mut ev = FunctionEvaluator::new(&exact, 2).expect("valid problem");
        let gx = ev.grad(x.view(), None).expect("gradient");
        let hp = ev.hess_prod(x.view(), gx.view(), p.view()).expect("product");
        assert_eq!(hp, array![4.0, 9.0]);
        assert_eq!(ev.nhev(), 1);

        let approx = Problem::new(|x: ArrayView1<f64>| x[0] * x[0] + x[0] * x[1] + 2.0 * x[1] * x[1])
            .with_gradient(grad);
        let mut ev = FunctionEvaluator::new(&approx, 2).expect("valid problem");
        let gx = ev.grad(x.view(), None).expect("gradient");
        let hp = ev.hess_prod(x.view(), gx.view(), p.view()).expect("product");
        assert_abs_diff_eq!(hp[0], 4.0, epsilon = 1e-6);
        assert_abs_diff_eq!(hp[1], 9.0, epsilon = 1e-6);
        assert_eq!(ev.ngev(), 2);
        assert_eq!(ev.nhev(), 0);
    }
}
