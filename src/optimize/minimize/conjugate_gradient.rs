//! Nonlinear conjugate gradient method (Polak-Ribière with restarts).

use ndarray::{Array1, ArrayView1};
use tracing::{debug, warn};

use super::types::{History, check_x0, log_iteration, log_termination};
use super::{MethodExtras, MinimizeOptions, MultiMinimizeResult, Norm, Status};
use crate::optimize::error::OptimizeResult;
use crate::optimize::evaluator::FunctionEvaluator;
use crate::optimize::line_search::{DirectionalLine, WolfeParams, line_search_wolfe12};
use crate::optimize::problem::Problem;
use crate::optimize::utils::norm;

/// Required descent of the next direction, relative to ‖g‖².
const SIGMA_3: f64 = 0.01;

/// Options for [`conjugate_gradient`].
///
/// `g_tol` defaults to 1e-5 and `max_iter` to 200·n. `max_fev` is
/// unlimited unless set.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CgOptions {
    pub base: MinimizeOptions,
    /// Norm of the gradient compared against `g_tol`.
    pub norm: Norm,
}

/// One Polak-Ribière-plus update.
struct PrStep {
    alpha: f64,
    x: Array1<f64>,
    p: Array1<f64>,
    g: Array1<f64>,
    gnorm: f64,
}

fn polak_ribiere_step(
    alpha: f64,
    x: Array1<f64>,
    g: Array1<f64>,
    g_old: &Array1<f64>,
    p_old: &Array1<f64>,
    delta: f64,
    gnorm_kind: Norm,
) -> PrStep {
    let y = &g - g_old;
    let beta = (y.dot(&g) / delta).max(0.0);
    let p = p_old * beta - &g;
    let gnorm = gnorm_kind.apply(g.view());
    PrStep {
        alpha,
        x,
        p,
        g,
        gnorm,
    }
}

impl PrStep {
    /// Replace an ascent direction by steepest descent.
    ///
    /// Only steps the line search accepted without the descent check can
    /// produce one. Returns `true` when the direction was reset.
    fn restart_if_ascent(&mut self) -> bool {
        if self.p.dot(&self.g) < 0.0 {
            return false;
        }
        self.p = -&self.g;
        true
    }
}

/// Nonlinear conjugate gradient method for minimization.
///
/// # Arguments
/// * `problem` - Objective, with a gradient or finite differences
/// * `x0` - Initial guess
/// * `options` - Solver options
///
/// # Returns
/// Minimum found, with the gradient there in `jac`
///
/// # Errors
/// * `InvalidInput` if `x0` is empty
/// * `InvalidParameter` for a negative tolerance
/// * `Callback` if a user callback fails
///
/// # Note
/// Uses β = max(0, gₖ₊₁·(gₖ₊₁ − gₖ) / gₖ·gₖ). The line search only accepts
/// steps after which the next direction is still a descent direction.
pub fn conjugate_gradient(
    problem: &Problem<'_>,
    x0: &Array1<f64>,
    options: &CgOptions,
) -> OptimizeResult<MultiMinimizeResult> {
    check_x0("conjugate_gradient", x0)?;
    let base = &options.base;
    base.validate()?;
    let n = x0.len();
    let mut ev = FunctionEvaluator::new(problem, n)?;
    if problem.bounds.is_some() {
        warn!("conjugate_gradient ignores bounds");
    }

    let g_tol = base.g_tol.unwrap_or(1e-5);
    let max_iter = base.max_iter.unwrap_or(200 * n);
    let max_fev = base.max_fev.unwrap_or(usize::MAX);
    let params = WolfeParams {
        c2: 0.4,
        amin: 1e-100,
        amax: Some(1e100),
        ..WolfeParams::default()
    };

    let mut xk = x0.clone();
    let (mut old_fval, mut gfk) = ev.fun_and_grad(xk.view())?;
    let mut old_old_fval = old_fval + norm(gfk.view()) / 2.0;
    let mut pk = -&gfk;
    let mut gnorm = options.norm.apply(gfk.view());
    let mut history = History::new(base.return_all, &xk);
    let mut k = 0;
    let mut status = Status::Success;

    while gnorm > g_tol && k < max_iter {
        let deltak = gfk.dot(&gfk);
        let mut cached: Option<PrStep> = None;

        let outcome = {
            let mut descent = |alpha: f64,
                               x1: ArrayView1<'_, f64>,
                               _f1: f64,
                               g1: ArrayView1<'_, f64>|
             -> OptimizeResult<bool> {
                let step = polak_ribiere_step(
                    alpha,
                    x1.to_owned(),
                    g1.to_owned(),
                    &gfk,
                    &pk,
                    deltak,
                    options.norm,
                );
                let ok = step.gnorm <= g_tol || step.p.dot(&step.g) <= -SIGMA_3 * step.g.dot(&step.g);
                cached = Some(step);
                Ok(ok)
            };
            let mut line =
                DirectionalLine::new(&mut ev, xk.view(), pk.view()).with_extra_condition(&mut descent);
            line_search_wolfe12(&mut line, gfk.dot(&pk), old_fval, Some(old_old_fval), &params)?
        };

        let Some(outcome) = outcome else {
            warn!(iteration = k, "conjugate_gradient line search failed");
            status = Status::LineSearchFailure;
            break;
        };
        old_old_fval = outcome.old_fval;
        old_fval = outcome.fval;

        let mut step = match cached.take() {
            Some(step) if step.alpha == outcome.alpha => step,
            _ => {
                let x1 = &xk + &(&pk * outcome.alpha);
                let g1 = match outcome.grad {
                    Some(g) => g,
                    None => ev.grad(x1.view(), Some(outcome.fval))?,
                };
                polak_ribiere_step(outcome.alpha, x1, g1, &gfk, &pk, deltak, options.norm)
            }
        };
        if step.restart_if_ascent() {
            debug!(iteration = k, "restarting with steepest descent");
        }
        xk = step.x;
        pk = step.p;
        gfk = step.g;
        gnorm = step.gnorm;

        k += 1;
        history.push(&xk);
        log_iteration("conjugate_gradient", k, old_fval, base.verbose);
        if ev.nfev() >= max_fev {
            status = Status::MaxEvaluations;
            break;
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
        extras: MethodExtras::None,
        all_iterates: history.into_inner(),
    };
    log_termination("conjugate_gradient", &result, base.verbose);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::error::OptimizeError;
    use crate::optimize::test_functions::{rosen, rosen_der};
    use crate::optimize::test_support::Berger;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn berger_options() -> CgOptions {
        CgOptions {
            base: MinimizeOptions {
                max_iter: Some(1000),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_cg() {
        let berger = Berger::new();
        let res = conjugate_gradient(&berger.problem_with_gradient(), &Berger::x0(), &berger_options())
            .expect("conjugate_gradient");
        assert!(res.success());
        berger.assert_optimal(&res.x);

        assert_eq!(berger.funccalls.get(), 9);
        assert_eq!(berger.gradcalls.get(), 7);
        assert_eq!(res.nfev, 7);
        assert_eq!(res.ngev, 7);
        berger.assert_trace(
            2,
            &[[0.0, -0.5, 0.5], [0.0, -5.05700028e-01, 4.95985862e-01]],
            1e-14,
            1e-7,
        );
    }

    #[test]
    fn test_cg_rosenbrock() {
        let problem = Problem::new(rosen).with_gradient(rosen_der);
        let res = conjugate_gradient(&problem, &array![-1.2, 1.0], &CgOptions::default())
            .expect("conjugate_gradient");
        assert!(res.success(), "{:?}", res.status);
        assert_abs_diff_eq!(res.x[0], 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(res.x[1], 1.0, epsilon = 1e-4);
        let jac = res.jac.expect("gradient reported");
        assert!(jac.iter().all(|g| g.abs() <= 1e-5));
    }

    #[test]
    fn test_cg_numerical_gradient() {
        let problem = Problem::new(|x: ArrayView1<f64>| (x[0] - 1.0).powi(2) + 4.0 * (x[1] + 2.0).powi(2));
        let opts = CgOptions {
            base: MinimizeOptions {
                g_tol: Some(1e-4),
                return_all: true,
                ..Default::default()
            },
            norm: Norm::L2,
        };
        let res = conjugate_gradient(&problem, &array![0.0, 0.0], &opts).expect("conjugate_gradient");
        assert!(res.success());
        assert_abs_diff_eq!(res.x[0], 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(res.x[1], -2.0, epsilon = 1e-4);
        assert_eq!(res.ngev, 0);
        let all = res.all_iterates.expect("iterates kept");
        assert_eq!(all.len(), res.iterations + 1);
    }

    #[test]
    fn test_cg_iteration_budget() {
        let problem = Problem::new(rosen).with_gradient(rosen_der);
        let opts = CgOptions {
            base: MinimizeOptions {
                max_iter: Some(2),
                ..Default::default()
            },
            ..Default::default()
        };
        let res = conjugate_gradient(&problem, &array![-1.2, 1.0], &opts).expect("conjugate_gradient");
        assert_eq!(res.status, Status::MaxIterations);
        assert_eq!(res.iterations, 2);
    }

    #[test]
    fn test_ascent_direction_restarts() {
        // The previous direction is not a descent direction for g_old, as
        // after an unconverged line search; β = 1 carries it over.
        let g_old = array![1.0, 0.0];
        let p_old = array![0.0, 10.0];
        let g = array![1.0, 1.0];
        let mut step =
            polak_ribiere_step(0.5, array![0.0, 0.0], g.clone(), &g_old, &p_old, 1.0, Norm::Inf);
        assert_eq!(step.p, array![-1.0, 9.0]);
        assert!(step.restart_if_ascent());
        assert_eq!(step.p, -&g);

        let mut step =
            polak_ribiere_step(0.5, array![0.0, 0.0], g.clone(), &g_old, &-&g_old, 1.0, Norm::Inf);
        let before = step.p.clone();
        assert!(!step.restart_if_ascent());
        assert_eq!(step.p, before);
    }

    #[test]
    fn test_cg_empty_input() {
        let problem = Problem::new(|x: ArrayView1<f64>| x.sum());
        let err = conjugate_gradient(&problem, &Array1::zeros(0), &CgOptions::default())
            .expect_err("empty x0");
        assert!(matches!(err, OptimizeError::InvalidInput { .. }));
    }
}
