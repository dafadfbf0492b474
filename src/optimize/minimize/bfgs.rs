//! BFGS quasi-Newton method for minimization.

use ndarray::{Array1, Array2, ArrayView1};
use tracing::warn;

use super::types::{History, check_x0, log_iteration, log_termination};
use super::{MethodExtras, MinimizeOptions, MultiMinimizeResult, Norm, Status};
use crate::optimize::error::{OptimizeError, OptimizeResult};
use crate::optimize::evaluator::FunctionEvaluator;
use crate::optimize::line_search::{DirectionalLine, WolfeParams, line_search_wolfe12};
use crate::optimize::problem::Problem;
use crate::optimize::utils::{norm, outer};

/// Options for [`bfgs`].
///
/// `g_tol` defaults to 1e-5 and `max_iter` to 200·n. `max_fev` is
/// unlimited unless set.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BfgsOptions {
    pub base: MinimizeOptions,
    /// Norm of the gradient compared against `g_tol`.
    pub norm: Norm,
    /// Initial inverse Hessian approximation (n × n). Defaults to the identity.
    pub initial_inverse_hessian: Option<Array2<f64>>,
}

/// Rank-two BFGS update of the inverse Hessian approximation.
///
/// Returns `false` and leaves `h` unchanged when the curvature condition
/// sᵀy > 0 does not hold.
fn update_inverse_hessian(h: &mut Array2<f64>, s: ArrayView1<'_, f64>, y: ArrayView1<'_, f64>) -> bool {
    let sy = s.dot(&y);
    if sy.is_nan() || sy <= 0.0 {
        return false;
    }
    let rho = 1.0 / sy;
    let n = s.len();
    let eye = Array2::<f64>::eye(n);
    let a1 = &eye - &(outer(s, y) * rho);
    let a2 = &eye - &(outer(y, s) * rho);
    *h = a1.dot(&h.dot(&a2)) + outer(s, s) * rho;
    true
}

/// BFGS quasi-Newton method for minimization.
///
/// # Arguments
/// * `problem` - Objective, with a gradient or finite differences
/// * `x0` - Initial guess
/// * `options` - Solver options
///
/// # Returns
/// Minimum found, with the gradient in `jac` and the final inverse Hessian
/// approximation in `extras`
///
/// # Errors
/// * `InvalidInput` if `x0` is empty
/// * `DimensionMismatch` if the initial inverse Hessian is not n × n
/// * `Callback` if a user callback fails
///
/// # Note
/// BFGS uses gradient information and maintains an approximation of the
/// inverse Hessian. It has superlinear convergence near the minimum.
/// A non-finite objective value stops the run with `PrecisionLoss`; the
/// value is reported as is.
pub fn bfgs(
    problem: &Problem<'_>,
    x0: &Array1<f64>,
    options: &BfgsOptions,
) -> OptimizeResult<MultiMinimizeResult> {
    check_x0("bfgs", x0)?;
    let base = &options.base;
    base.validate()?;
    let n = x0.len();
    let mut ev = FunctionEvaluator::new(problem, n)?;
    if problem.bounds.is_some() {
        warn!("bfgs ignores bounds");
    }

    let g_tol = base.g_tol.unwrap_or(1e-5);
    let max_iter = base.max_iter.unwrap_or(200 * n);
    let max_fev = base.max_fev.unwrap_or(usize::MAX);
    let params = WolfeParams {
        amin: 1e-100,
        amax: Some(1e100),
        ..WolfeParams::default()
    };

    let mut hk = match &options.initial_inverse_hessian {
        Some(h) => {
            if h.dim() != (n, n) {
                return Err(OptimizeError::dimension_mismatch(
                    "bfgs initial inverse hessian",
                    n,
                    h.nrows(),
                ));
            }
            h.clone()
        }
        None => Array2::eye(n),
    };

    let mut xk = x0.clone();
    let (mut old_fval, mut gfk) = ev.fun_and_grad(xk.view())?;
    let mut old_old_fval = old_fval + norm(gfk.view()) / 2.0;
    let mut gnorm = options.norm.apply(gfk.view());
    let mut history = History::new(base.return_all, &xk);
    let mut k = 0;
    let mut status = Status::Success;

    while gnorm > g_tol && k < max_iter {
        let pk = -hk.dot(&gfk);
        let outcome = {
            let mut line = DirectionalLine::new(&mut ev, xk.view(), pk.view());
            line_search_wolfe12(&mut line, gfk.dot(&pk), old_fval, Some(old_old_fval), &params)?
        };
        let Some(outcome) = outcome else {
            warn!(iteration = k, "bfgs line search failed");
            status = Status::LineSearchFailure;
            break;
        };
        old_old_fval = outcome.old_fval;
        old_fval = outcome.fval;

        let sk = &pk * outcome.alpha;
        let xkp1 = &xk + &sk;
        let gfkp1 = match outcome.grad {
            Some(g) => g,
            None => ev.grad(xkp1.view(), Some(outcome.fval))?,
        };
        let yk = &gfkp1 - &gfk;
        xk = xkp1;
        gfk = gfkp1;
        k += 1;
        history.push(&xk);
        log_iteration("bfgs", k, old_fval, base.verbose);

        gnorm = options.norm.apply(gfk.view());
        if gnorm <= g_tol {
            break;
        }
        if !old_fval.is_finite() {
            warn!(fun = old_fval, "bfgs reached a non-finite objective value");
            status = Status::PrecisionLoss;
            break;
        }
        if ev.nfev() >= max_fev {
            status = Status::MaxEvaluations;
            break;
        }
        if !update_inverse_hessian(&mut hk, sk.view(), yk.view()) {
            warn!(iteration = k, "curvature condition failed, skipping update");
        }
    }

    if status == Status::Success {
        if k >= max_iter && gnorm > g_tol {
            status = Status::MaxIterations;
        } else if gnorm.is_nan() || old_fval.is_nan() || xk.iter().any(|v| v.is_nan()) {
            status = Status::PrecisionLoss;
        }
    }

    let result = MultiMinimizeResult {
        x: xk,
        fun: old_fval,
        jac: Some(gfk),
        iterations: k,
        nfev: ev.nfev(),
        ngev: ev.ngev(),
        nhev: 0,
        status,
        extras: MethodExtras::Bfgs {
            inverse_hessian: hk,
        },
        all_iterates: history.into_inner(),
    };
    log_termination("bfgs", &result, base.verbose);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::problem::FiniteDiffStep;
    use crate::optimize::test_functions::{rosen, rosen_der};
    use crate::optimize::test_support::Berger;
    use crate::optimize::utils::EPS;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn berger_options() -> BfgsOptions {
        BfgsOptions {
            base: MinimizeOptions {
                max_iter: Some(1000),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_bfgs() {
        let berger = Berger::new();
        let res = bfgs(&berger.problem_with_gradient(), &Berger::x0(), &berger_options())
            .expect("bfgs");
        assert!(res.success());
        berger.assert_optimal(&res.x);

        assert_eq!(berger.funccalls.get(), 10);
        assert_eq!(berger.gradcalls.get(), 8);
        berger.assert_trace(
            6,
            &[
                [0.0, -5.25060743e-01, 4.87748473e-01],
                [0.0, -5.24885582e-01, 4.87530347e-01],
            ],
            1e-14,
            1e-7,
        );
        match &res.extras {
            MethodExtras::Bfgs { inverse_hessian } => assert_eq!(inverse_hessian.dim(), (3, 3)),
            other => panic!("unexpected extras {other:?}"),
        }
    }

    #[test]
    fn test_bfgs_numerical_jacobian() {
        // Per-component steps scaled by fixed factors in (0, 1).
        let berger = Berger::new();
        let eps = array![0.71, 0.23, 0.94] * EPS.sqrt();
        let problem = berger
            .problem()
            .with_finite_diff_step(FiniteDiffStep::PerComponent(eps));
        let res = bfgs(&problem, &Berger::x0(), &berger_options()).expect("bfgs");
        berger.assert_optimal(&res.x);
        assert_eq!(berger.gradcalls.get(), 0);
    }

    #[test]
    fn test_bfgs_nan() {
        let problem = Problem::new(|x: ArrayView1<f64>| x[0])
            .with_gradient(|x: ArrayView1<f64>| Array1::ones(x.len()));
        let res = bfgs(&problem, &array![f64::NAN], &BfgsOptions::default()).expect("bfgs");
        assert!(res.fun.is_nan());
        assert!(!res.success());
    }

    #[test]
    fn test_bfgs_infinite() {
        // Minimum at -infinity.
        let problem = Problem::new(|x: ArrayView1<f64>| -(-x[0]).exp())
            .with_gradient(|x: ArrayView1<f64>| array![(-x[0]).exp()]);
        let res = bfgs(&problem, &array![0.0], &BfgsOptions::default()).expect("bfgs");
        assert!(!res.fun.is_finite());
    }

    #[test]
    fn test_bfgs_rosenbrock() {
        let problem = Problem::new(rosen).with_gradient(rosen_der);
        let res = bfgs(&problem, &array![-1.2, 1.0, 0.5], &BfgsOptions::default()).expect("bfgs");
        assert!(res.success(), "{:?}", res.status);
        for v in res.x.iter() {
            assert_abs_diff_eq!(*v, 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_update_skipped_without_curvature() {
        let mut h = Array2::eye(2);
        let s = array![1.0, 0.0];
        let y = array![-1.0, 0.0];
        assert!(!update_inverse_hessian(&mut h, s.view(), y.view()));
        assert_eq!(h, Array2::eye(2));

        // Secant condition H y = s after an update.
        let y = array![2.0, 1.0];
        assert!(update_inverse_hessian(&mut h, s.view(), y.view()));
        let hy = h.dot(&y);
        assert_abs_diff_eq!(hy[0], s[0], epsilon = 1e-12);
        assert_abs_diff_eq!(hy[1], s[1], epsilon = 1e-12);
    }

    #[test]
    fn test_initial_inverse_hessian_checked() {
        let problem = Problem::new(|x: ArrayView1<f64>| x.dot(&x));
        let opts = BfgsOptions {
            initial_inverse_hessian: Some(Array2::eye(3)),
            ..Default::default()
        };
        let err = bfgs(&problem, &array![1.0, 1.0], &opts).expect_err("wrong shape");
        assert!(matches!(err, OptimizeError::DimensionMismatch { .. }));
    }
}
