//! Line-search Newton-CG (truncated Newton) method.

use ndarray::{Array1, Array2, ArrayView1};
use tracing::{debug, warn};

use super::types::{History, check_x0, log_iteration, log_termination};
use super::{MethodExtras, MinimizeOptions, MultiMinimizeResult, Status};
use crate::optimize::error::OptimizeResult;
use crate::optimize::evaluator::FunctionEvaluator;
use crate::optimize::line_search::{DirectionalLine, WolfeParams, line_search_wolfe12};
use crate::optimize::problem::Problem;
use crate::optimize::utils::{EPS, norm_l1};

/// Options for [`newton_cg`].
///
/// `x_tol` (average relative step, default 1e-5) is multiplied by n for the
/// stopping test on ‖Δx‖₁. `max_iter` defaults to 200·n.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NewtonCgOptions {
    pub base: MinimizeOptions,
}

/// Source of Hessian-vector products for one outer iteration.
enum Curvature {
    Dense(Array2<f64>),
    Product,
}

/// Outcome of the inner CG solve.
enum InnerSolve {
    Direction(Array1<f64>),
    /// Iteration limit reached: the Hessian is probably indefinite.
    NotConverged,
}

/// Approximately solve H d = −g by conjugate gradients from d = 0.
fn truncated_cg(
    ev: &mut FunctionEvaluator<'_, '_>,
    x: ArrayView1<'_, f64>,
    g: &Array1<f64>,
    curvature: &Curvature,
    max_inner: usize,
) -> OptimizeResult<InnerSolve> {
    let maggrad = norm_l1(g.view());
    let eta = maggrad.sqrt().min(0.5);
    let termcond = eta * maggrad;

    let mut xsupi = Array1::zeros(g.len());
    let mut ri = g.clone();
    let mut psupi = -&ri;
    let mut dri0 = ri.dot(&ri);

    for i in 0..max_inner {
        if norm_l1(ri.view()) <= termcond {
            return Ok(InnerSolve::Direction(xsupi));
        }
        let ap = match curvature {
            Curvature::Dense(h) => h.dot(&psupi),
            Curvature::Product => ev.hess_prod(x, g.view(), psupi.view())?,
        };
        let curv = psupi.dot(&ap);
        if (0.0..=3.0 * EPS).contains(&curv) {
            return Ok(InnerSolve::Direction(xsupi));
        } else if curv < 0.0 {
            if i > 0 {
                return Ok(InnerSolve::Direction(xsupi));
            }
            // Negative curvature on the first step: scaled steepest descent.
            return Ok(InnerSolve::Direction(psupi * (dri0 / -curv)));
        }
        let alphai = dri0 / curv;
        xsupi.scaled_add(alphai, &psupi);
        ri.scaled_add(alphai, &ap);
        let dri1 = ri.dot(&ri);
        let betai = dri1 / dri0;
        psupi = &psupi * betai - &ri;
        dri0 = dri1;
    }
    Ok(InnerSolve::NotConverged)
}

/// Newton-CG method for minimization.
///
/// # Arguments
/// * `problem` - Objective with a gradient (finite differences otherwise)
///   and optionally a Hessian or Hessian-vector product
/// * `x0` - Initial guess
/// * `options` - Solver options
///
/// # Returns
/// Minimum found, with the gradient used for the last step in `jac`
///
/// # Errors
/// * `InvalidInput` if `x0` is empty
/// * `Callback` if a user callback fails
///
/// # Note
/// Each outer iteration solves the Newton system inexactly with CG. Without
/// second-order callbacks, Hessian products are forward differences of the
/// gradient.
pub fn newton_cg(
    problem: &Problem<'_>,
    x0: &Array1<f64>,
    options: &NewtonCgOptions,
) -> OptimizeResult<MultiMinimizeResult> {
    check_x0("newton_cg", x0)?;
    let base = &options.base;
    base.validate()?;
    let n = x0.len();
    let mut ev = FunctionEvaluator::new(problem, n)?;
    if problem.bounds.is_some() {
        warn!("newton_cg ignores bounds");
    }

    let xtol = base.x_tol.unwrap_or(1e-5) * n as f64;
    let max_iter = base.max_iter.unwrap_or(200 * n);
    let max_fev = base.max_fev.unwrap_or(usize::MAX);
    let max_inner = 20 * n;
    let params = WolfeParams::default();

    let mut xk = x0.clone();
    let mut old_fval = ev.fun(xk.view())?;
    let mut old_old_fval = None;
    let mut gfk = ev.grad(xk.view(), Some(old_fval))?;
    let mut update_norm = 2.0 * xtol;
    let mut history = History::new(base.return_all, &xk);
    let mut k = 0;
    let mut status = Status::Success;

    while update_norm > xtol {
        if k >= max_iter {
            status = Status::MaxIterations;
            break;
        }
        if ev.nfev() >= max_fev {
            status = Status::MaxEvaluations;
            break;
        }

        let curvature = match ev.hessian(xk.view())? {
            Some(h) => Curvature::Dense(h),
            None => Curvature::Product,
        };
        let pk = match truncated_cg(&mut ev, xk.view(), &gfk, &curvature, max_inner)? {
            InnerSolve::Direction(p) => p,
            InnerSolve::NotConverged => {
                warn!(iteration = k, "CG iterations did not converge, the Hessian is not positive definite");
                status = Status::PrecisionLoss;
                break;
            }
        };

        let outcome = {
            let mut line = DirectionalLine::new(&mut ev, xk.view(), pk.view());
            line_search_wolfe12(&mut line, gfk.dot(&pk), old_fval, old_old_fval, &params)?
        };
        let Some(outcome) = outcome else {
            warn!(iteration = k, "newton_cg line search failed");
            status = Status::LineSearchFailure;
            break;
        };
        old_old_fval = Some(outcome.old_fval);
        old_fval = outcome.fval;

        let update = &pk * outcome.alpha;
        update_norm = norm_l1(update.view());
        xk += &update;
        k += 1;
        history.push(&xk);
        log_iteration("newton_cg", k, old_fval, base.verbose);

        gfk = match outcome.grad {
            Some(g) => g,
            None => ev.grad(xk.view(), Some(old_fval))?,
        };
        debug!(update_norm, "newton_cg step");
    }

    if status == Status::Success && (old_fval.is_nan() || xk.iter().any(|v| v.is_nan())) {
        status = Status::PrecisionLoss;
    }

    let result = MultiMinimizeResult {
        x: xk,
        fun: old_fval,
        jac: Some(gfk),
        iterations: k,
        nfev: ev.nfev(),
        ngev: ev.ngev(),
        nhev: ev.nhev(),
        status,
        extras: MethodExtras::None,
        all_iterates: history.into_inner(),
    };
    log_termination("newton_cg", &result, base.verbose);
    Ok(result)
}
