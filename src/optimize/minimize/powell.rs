//! Powell's direction set method for derivative-free minimization.

use ndarray::{Array1, Array2, ArrayView1};
use tracing::{trace, warn};

use super::types::{History, check_x0, log_iteration, log_termination};
use super::{MethodExtras, MinimizeOptions, MultiMinimizeResult, Status};
use crate::optimize::error::{OptimizeError, OptimizeResult};
use crate::optimize::evaluator::FunctionEvaluator;
use crate::optimize::problem::Problem;
use crate::optimize::scalar::{Bracket, brent_core};

const BRENT_MAXITER: usize = 500;

/// Options for [`powell`].
///
/// `x_tol` and `f_tol` default to 1e-4. When neither `max_iter` nor
/// `max_fev` is given both default to 1000·n; when only one is given the
/// other is unlimited.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PowellOptions {
    pub base: MinimizeOptions,
    /// Initial direction set, one direction per row (n × n). Defaults to the
    /// coordinate directions.
    pub directions: Option<Array2<f64>>,
}

/// Outcome of a Brent minimization along one direction.
struct LineMin {
    fval: f64,
    x: Array1<f64>,
    step: Array1<f64>,
}

/// Minimize along `direction` from `x`.
///
/// Returns `None` when no bracket can be found. A zero direction leaves
/// the point unchanged without evaluating.
fn line_minimize(
    ev: &mut FunctionEvaluator<'_, '_>,
    x: &Array1<f64>,
    fval: f64,
    direction: ArrayView1<'_, f64>,
    tol: f64,
) -> OptimizeResult<Option<LineMin>> {
    if direction.iter().all(|&d| d == 0.0) {
        return Ok(Some(LineMin {
            fval,
            x: x.clone(),
            step: direction.to_owned(),
        }));
    }
    let mut phi = |alpha: f64| {
        let xa = x + &(&direction * alpha);
        ev.fun(xa.view())
    };
    match brent_core(&mut phi, Bracket::Auto, tol, BRENT_MAXITER) {
        Ok(res) => {
            let step = &direction * res.x;
            trace!(alpha = res.x, fval = res.f_min, "powell line minimum");
            Ok(Some(LineMin {
                fval: res.f_min,
                x: x + &step,
                step,
            }))
        }
        Err(OptimizeError::DidNotConverge { .. }) => {
            warn!("powell line search found no bracket");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Powell's direction set method for derivative-free minimization.
///
/// # Arguments
/// * `problem` - Objective to minimize; derivatives and bounds are not used
/// * `x0` - Initial guess
/// * `options` - Solver options
///
/// # Returns
/// Minimum found and, in `extras`, the final direction set.
///
/// # Errors
/// * `InvalidInput` if `x0` is empty
/// * `DimensionMismatch` if the initial direction set is not n × n
/// * `Callback` if the objective fails
///
/// # Note
/// Powell's method performs successive line searches along conjugate directions.
/// It doesn't require derivatives but can be faster than Nelder-Mead.
pub fn powell(
    problem: &Problem<'_>,
    x0: &Array1<f64>,
    options: &PowellOptions,
) -> OptimizeResult<MultiMinimizeResult> {
    check_x0("powell", x0)?;
    let base = &options.base;
    base.validate()?;
    let n = x0.len();
    let mut ev = FunctionEvaluator::new(problem, n)?;
    if problem.bounds.is_some() {
        warn!("powell ignores bounds");
    }

    let x_tol = base.x_tol.unwrap_or(1e-4);
    let f_tol = base.f_tol.unwrap_or(1e-4);
    let (max_iter, max_fev) = match (base.max_iter, base.max_fev) {
        (None, None) => (1000 * n, 1000 * n),
        (Some(it), None) => (it, usize::MAX),
        (None, Some(fev)) => (usize::MAX, fev),
        (Some(it), Some(fev)) => (it, fev),
    };

    let mut direc = match &options.directions {
        Some(d) => {
            if d.dim() != (n, n) {
                return Err(OptimizeError::dimension_mismatch(
                    "powell directions",
                    n,
                    d.nrows(),
                ));
            }
            d.clone()
        }
        None => Array2::eye(n),
    };

    let mut x = x0.clone();
    let mut fval = ev.fun(x.view())?;
    let mut history = History::new(base.return_all, &x);
    let mut iterations = 0;
    let mut status = Status::Success;
    let line_tol = x_tol * 100.0;
    // Start of the current extrapolation segment.
    let mut x1 = x0.clone();

    'outer: loop {
        let fx = fval;
        let mut bigind = 0;
        let mut delta = 0.0;

        for i in 0..n {
            let fx2 = fval;
            let Some(line) = line_minimize(&mut ev, &x, fval, direc.row(i), line_tol)? else {
                status = Status::LineSearchFailure;
                break 'outer;
            };
            fval = line.fval;
            x = line.x;
            if fx2 - fval > delta {
                delta = fx2 - fval;
                bigind = i;
            }
        }
        iterations += 1;
        history.push(&x);
        log_iteration("powell", iterations, fval, base.verbose);

        if 2.0 * (fx - fval) <= f_tol * (fx.abs() + fval.abs()) + 1e-20 {
            break;
        }
        if ev.nfev() >= max_fev || iterations >= max_iter {
            break;
        }
        if fx.is_nan() && fval.is_nan() {
            break;
        }

        // Extrapolate along the net displacement of this iteration.
        let direc1 = &x - &x1;
        x1 = x.clone();
        let x2 = &x + &direc1;
        let fx2 = ev.fun(x2.view())?;

        if fx > fx2 {
            let mut t = 2.0 * (fx + fx2 - 2.0 * fval);
            let temp = fx - fval - delta;
            t *= temp * temp;
            let temp = fx - fx2;
            t -= delta * temp * temp;
            if t < 0.0 {
                let Some(line) = line_minimize(&mut ev, &x, fval, direc1.view(), line_tol)? else {
                    status = Status::LineSearchFailure;
                    break 'outer;
                };
                fval = line.fval;
                x = line.x;
                if line.step.iter().any(|&v| v != 0.0) {
                    let last = direc.row(n - 1).to_owned();
                    direc.row_mut(bigind).assign(&last);
                    direc.row_mut(n - 1).assign(&line.step);
                }
            }
        }
    }

    if status == Status::Success {
        status = if ev.nfev() >= max_fev {
            Status::MaxEvaluations
        } else if iterations >= max_iter {
            Status::MaxIterations
        } else if fval.is_nan() || x.iter().any(|v| v.is_nan()) {
            Status::PrecisionLoss
        } else {
            Status::Success
        };
    }

    let result = MultiMinimizeResult {
        x,
        fun: fval,
        jac: None,
        iterations,
        nfev: ev.nfev(),
        ngev: 0,
        nhev: 0,
        status,
        extras: MethodExtras::Powell { directions: direc },
        all_iterates: history.into_inner(),
    };
    log_termination("powell", &result, base.verbose);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::test_functions::rosen;
    use crate::optimize::test_support::Berger;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_powell() {
        let berger = Berger::new();
        let opts = PowellOptions {
            base: MinimizeOptions {
                max_iter: Some(1000),
                ..Default::default()
            },
            ..Default::default()
        };
        let res = powell(&berger.problem(), &Berger::x0(), &opts).expect("powell");
        assert!(res.success());
        berger.assert_optimal(&res.x);
        assert_eq!(berger.funccalls.get(), 116);
        assert_eq!(res.nfev, 114);
        assert_eq!(berger.gradcalls.get(), 0);
        assert_eq!(res.ngev, 0);
        berger.assert_trace(
            34,
            &[
                [0.72949016, -0.44156936, 0.47100962],
                [0.72949016, -0.44156936, 0.48052496],
                [1.45898031, -0.88313872, 0.95153458],
                [0.72949016, -0.44156936, 0.47576729],
                [1.72949016, -0.44156936, 0.47576729],
            ],
            1e-14,
            1e-7,
        );
    }

    #[test]
    fn test_powell_quadratic() {
        let problem = Problem::new(|x: ArrayView1<f64>| {
            (x[0] - 1.0).powi(2) + (x[1] - 2.0).powi(2) + x[0] * x[1]
        });
        let opts = PowellOptions {
            base: MinimizeOptions {
                x_tol: Some(1e-8),
                f_tol: Some(1e-12),
                ..Default::default()
            },
            ..Default::default()
        };
        let res = powell(&problem, &array![0.0, 0.0], &opts).expect("powell");
        assert!(res.success());
        // Minimum of the coupled quadratic: 2(x0 - 1) + x1 = 0, 2(x1 - 2) + x0 = 0.
        assert_abs_diff_eq!(res.x[0], 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(res.x[1], 2.0, epsilon = 1e-4);
        match &res.extras {
            MethodExtras::Powell { directions } => assert_eq!(directions.dim(), (2, 2)),
            other => panic!("unexpected extras {other:?}"),
        }
    }

    #[test]
    fn test_powell_rosenbrock() {
        let problem = Problem::new(rosen);
        let opts = PowellOptions {
            base: MinimizeOptions {
                x_tol: Some(1e-8),
                f_tol: Some(1e-8),
                ..Default::default()
            },
            ..Default::default()
        };
        let res = powell(&problem, &array![-1.2, 1.0], &opts).expect("powell");
        assert_abs_diff_eq!(res.x[0], 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(res.x[1], 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_iteration_budget() {
        let problem = Problem::new(rosen);
        let opts = PowellOptions {
            base: MinimizeOptions {
                max_iter: Some(1),
                ..Default::default()
            },
            ..Default::default()
        };
        let res = powell(&problem, &array![-1.2, 1.0], &opts).expect("powell");
        assert_eq!(res.status, Status::MaxIterations);
        assert_eq!(res.iterations, 1);
    }

    #[test]
    fn test_unbounded_direction_fails_line_search() {
        // Linear objective: no bracket exists along the first direction.
        let problem = Problem::new(|x: ArrayView1<f64>| -x[0]);
        let res = powell(&problem, &array![0.0], &PowellOptions::default()).expect("powell");
        assert_eq!(res.status, Status::LineSearchFailure);
    }

    #[test]
    fn test_direction_shape_checked() {
        let problem = Problem::new(|x: ArrayView1<f64>| x.sum());
        let opts = PowellOptions {
            directions: Some(Array2::eye(3)),
            ..Default::default()
        };
        let err = powell(&problem, &array![0.0, 0.0], &opts).expect_err("bad directions");
        assert!(matches!(err, OptimizeError::DimensionMismatch { .. }));
    }
}
