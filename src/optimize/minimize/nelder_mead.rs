//! Nelder-Mead simplex algorithm for derivative-free minimization.

use std::cmp::Ordering;

use ndarray::{Array1, Array2, Axis, s};
use tracing::warn;

use super::types::{History, check_x0, log_iteration, log_termination};
use super::{MethodExtras, MinimizeOptions, MultiMinimizeResult, Status};
use crate::optimize::error::{OptimizeError, OptimizeResult};
use crate::optimize::evaluator::FunctionEvaluator;
use crate::optimize::problem::Problem;

const NONZERO_DELTA: f64 = 0.05;
const ZERO_DELTA: f64 = 0.00025;

/// Options for [`nelder_mead`].
///
/// `x_tol` and `f_tol` default to 1e-4, `max_iter` and `max_fev` to 200·n.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NelderMeadOptions {
    pub base: MinimizeOptions,
    /// Use coefficients adapted to the problem dimension.
    pub adaptive: bool,
    /// Starting simplex, one vertex per row ((n+1) × n). Replaces the
    /// simplex built around `x0`.
    pub initial_simplex: Option<Array2<f64>>,
}

/// Reflection, expansion, contraction and shrink coefficients.
#[derive(Debug, Clone, Copy)]
struct Coefficients {
    rho: f64,
    chi: f64,
    psi: f64,
    sigma: f64,
}

impl Coefficients {
    fn new(n: usize, adaptive: bool) -> Self {
        if adaptive {
            let dim = n as f64;
            Self {
                rho: 1.0,
                chi: 1.0 + 2.0 / dim,
                psi: 0.75 - 1.0 / (2.0 * dim),
                sigma: 1.0 - 1.0 / dim,
            }
        } else {
            Self {
                rho: 1.0,
                chi: 2.0,
                psi: 0.5,
                sigma: 0.5,
            }
        }
    }
}

/// Ascending order with NaN values last.
fn nan_last(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Largest absolute value, NaN if any entry is NaN.
fn max_abs<'a>(values: impl Iterator<Item = &'a f64>) -> f64 {
    values.fold(0.0, |m: f64, &v| {
        if m.is_nan() || v.is_nan() {
            f64::NAN
        } else {
            m.max(v.abs())
        }
    })
}

/// Reorder vertices by value, stably.
fn sort_simplex(sim: &mut Array2<f64>, fsim: &mut Array1<f64>) {
    let mut order: Vec<usize> = (0..fsim.len()).collect();
    order.sort_by(|&a, &b| nan_last(fsim[a], fsim[b]));
    *sim = sim.select(Axis(0), &order);
    *fsim = fsim.select(Axis(0), &order);
}

/// Nelder-Mead simplex algorithm for derivative-free minimization.
///
/// # Arguments
/// * `problem` - Objective to minimize; derivatives and bounds are not used
/// * `x0` - Initial guess
/// * `options` - Solver options
///
/// # Returns
/// Best vertex of the final simplex. `extras` holds the final simplex and
/// its values.
///
/// # Errors
/// * `InvalidInput` if `x0` is empty
/// * `DimensionMismatch` if the initial simplex is not (n+1) × n
/// * `Callback` if the objective fails
///
/// # Note
/// Nelder-Mead is robust and doesn't require derivatives, but convergence
/// can be slow for high-dimensional problems (n > 10).
pub fn nelder_mead(
    problem: &Problem<'_>,
    x0: &Array1<f64>,
    options: &NelderMeadOptions,
) -> OptimizeResult<MultiMinimizeResult> {
    check_x0("nelder_mead", x0)?;
    let base = &options.base;
    base.validate()?;
    let n = x0.len();
    let mut ev = FunctionEvaluator::new(problem, n)?;
    if problem.bounds.is_some() {
        warn!("nelder_mead ignores bounds");
    }

    let x_tol = base.x_tol.unwrap_or(1e-4);
    let f_tol = base.f_tol.unwrap_or(1e-4);
    let max_iter = base.max_iter.unwrap_or(200 * n);
    let max_fev = base.max_fev.unwrap_or(200 * n);
    let Coefficients {
        rho,
        chi,
        psi,
        sigma,
    } = Coefficients::new(n, options.adaptive);

    let mut sim = match &options.initial_simplex {
        Some(simplex) => {
            if simplex.dim() != (n + 1, n) {
                return Err(OptimizeError::dimension_mismatch(
                    "nelder_mead initial simplex rows",
                    n + 1,
                    simplex.nrows(),
                ));
            }
            simplex.clone()
        }
        None => {
            let mut sim = Array2::zeros((n + 1, n));
            sim.row_mut(0).assign(x0);
            for k in 0..n {
                let mut row = sim.row_mut(k + 1);
                row.assign(x0);
                row[k] = if x0[k] != 0.0 {
                    (1.0 + NONZERO_DELTA) * x0[k]
                } else {
                    ZERO_DELTA
                };
            }
            sim
        }
    };

    let mut fsim = Array1::zeros(n + 1);
    for k in 0..=n {
        fsim[k] = ev.fun(sim.row(k))?;
    }
    sort_simplex(&mut sim, &mut fsim);

    let mut history = History::new(base.return_all, &sim.row(0).to_owned());
    let mut iterations = 1;

    while ev.nfev() < max_fev && iterations < max_iter {
        let x_spread = max_abs((&sim.slice(s![1.., ..]) - &sim.row(0)).iter());
        let f_spread = max_abs((&fsim.slice(s![1..]) - fsim[0]).iter());
        if x_spread <= x_tol && f_spread <= f_tol {
            break;
        }

        let worst = sim.row(n).to_owned();
        let xbar = sim.slice(s![..n, ..]).sum_axis(Axis(0)) / n as f64;
        let xr = &xbar * (1.0 + rho) - &worst * rho;
        let fxr = ev.fun(xr.view())?;
        let mut do_shrink = false;

        if fxr < fsim[0] {
            let xe = &xbar * (1.0 + rho * chi) - &worst * (rho * chi);
            let fxe = ev.fun(xe.view())?;
            if fxe < fxr {
                sim.row_mut(n).assign(&xe);
                fsim[n] = fxe;
            } else {
                sim.row_mut(n).assign(&xr);
                fsim[n] = fxr;
            }
        } else if fxr < fsim[n - 1] {
            sim.row_mut(n).assign(&xr);
            fsim[n] = fxr;
        } else if fxr < fsim[n] {
            // Outside contraction.
            let xc = &xbar * (1.0 + psi * rho) - &worst * (psi * rho);
            let fxc = ev.fun(xc.view())?;
            if fxc <= fxr {
                sim.row_mut(n).assign(&xc);
                fsim[n] = fxc;
            } else {
                do_shrink = true;
            }
        } else {
            // Inside contraction.
            let xcc = &xbar * (1.0 - psi) + &worst * psi;
            let fxcc = ev.fun(xcc.view())?;
            if fxcc < fsim[n] {
                sim.row_mut(n).assign(&xcc);
                fsim[n] = fxcc;
            } else {
                do_shrink = true;
            }
        }

        if do_shrink {
            let best = sim.row(0).to_owned();
            for j in 1..=n {
                let shrunk = &best + &((&sim.row(j) - &best) * sigma);
                sim.row_mut(j).assign(&shrunk);
                fsim[j] = ev.fun(sim.row(j))?;
            }
        }

        sort_simplex(&mut sim, &mut fsim);
        history.push(&sim.row(0).to_owned());
        log_iteration("nelder_mead", iterations, fsim[0], base.verbose);
        iterations += 1;
    }

    let status = if ev.nfev() >= max_fev {
        Status::MaxEvaluations
    } else if iterations >= max_iter {
        Status::MaxIterations
    } else {
        Status::Success
    };

    let result = MultiMinimizeResult {
        x: sim.row(0).to_owned(),
        fun: fsim[0],
        jac: None,
        iterations,
        nfev: ev.nfev(),
        ngev: 0,
        nhev: 0,
        status,
        extras: MethodExtras::NelderMead {
            simplex: sim,
            values: fsim,
        },
        all_iterates: history.into_inner(),
    };
    log_termination("nelder_mead", &result, base.verbose);
    Ok(result)
}
