//! Scalar minimization algorithms.

use tracing::debug;

use super::bracket::{BracketResult, bracket_core};
use super::{Bracket, BoundValue, MinimizeResult, ScalarOptions};
use crate::optimize::error::{OptimizeError, OptimizeResult};
use crate::optimize::minimize::Status;
use crate::optimize::problem::CallbackOutput;

const BRENT_TOL: f64 = 1.48e-8;
const BRENT_MAXITER: usize = 500;
const BRENT_MINTOL: f64 = 1.0e-11;
const CGOLD: f64 = 0.3819660;
const GOLDEN_RATIO_CONJ: f64 = 0.61803399;
const BOUNDED_XATOL: f64 = 1e-5;
const BOUNDED_MAXFUN: usize = 500;

/// Resolve a [`Bracket`] into a checked triple.
fn resolve_bracket<F>(f: &mut F, brack: Bracket, context: &str) -> OptimizeResult<BracketResult>
where
    F: FnMut(f64) -> OptimizeResult<f64>,
{
    match brack {
        Bracket::Auto => bracket_core(f, 0.0, 1.0),
        Bracket::Pair(xa, xb) => bracket_core(f, xa, xb),
        Bracket::Triple(xa, xb, xc) => {
            let (xa, xc) = if xa > xc { (xc, xa) } else { (xa, xc) };
            if !(xa < xb && xb < xc) {
                return Err(OptimizeError::InvalidBracket {
                    context: format!("{context}: bracket must satisfy xa < xb < xc"),
                });
            }
            let fa = f(xa)?;
            let fb = f(xb)?;
            let fc = f(xc)?;
            if !(fb < fa && fb < fc) {
                return Err(OptimizeError::InvalidBracket {
                    context: format!("{context}: bracket must satisfy f(xb) < f(xa), f(xc)"),
                });
            }
            Ok(BracketResult {
                xa,
                xb,
                xc,
                fa,
                fb,
                fc,
                nfev: 3,
            })
        }
    }
}

/// Brent's method on a bracketed minimum.
///
/// Shared with Powell's line minimization, which supplies its own counting
/// objective.
pub(crate) fn brent_core<F>(
    f: &mut F,
    brack: Bracket,
    tol: f64,
    max_iter: usize,
) -> OptimizeResult<MinimizeResult>
where
    F: FnMut(f64) -> OptimizeResult<f64>,
{
    let BracketResult {
        xa,
        xb,
        xc,
        nfev: bracket_nfev,
        ..
    } = resolve_bracket(f, brack, "minimize_scalar_brent")?;
    // The search starts from a fresh evaluation at the middle point.
    let fb = f(xb)?;
    let mut nfev = bracket_nfev + 1;

    let (mut x, mut w, mut v) = (xb, xb, xb);
    let (mut fx, mut fw, mut fv) = (fb, fb, fb);
    let (mut a, mut b) = if xa < xc { (xa, xc) } else { (xc, xa) };
    let mut deltax: f64 = 0.0;
    let mut rat: f64 = 0.0;
    let mut iter = 0;

    while iter < max_iter {
        let tol1 = tol * x.abs() + BRENT_MINTOL;
        let tol2 = 2.0 * tol1;
        let xmid = 0.5 * (a + b);
        if (x - xmid).abs() < (tol2 - 0.5 * (b - a)) {
            break;
        }

        if deltax.abs() <= tol1 {
            deltax = if x >= xmid { a - x } else { b - x };
            rat = CGOLD * deltax;
        } else {
            // Parabola through x, w and v.
            let tmp1 = (x - w) * (fx - fv);
            let mut tmp2 = (x - v) * (fx - fw);
            let mut p = (x - v) * tmp2 - (x - w) * tmp1;
            tmp2 = 2.0 * (tmp2 - tmp1);
            if tmp2 > 0.0 {
                p = -p;
            }
            tmp2 = tmp2.abs();
            let dx_temp = deltax;
            deltax = rat;
            if p > tmp2 * (a - x) && p < tmp2 * (b - x) && p.abs() < (0.5 * tmp2 * dx_temp).abs() {
                rat = p / tmp2;
                let u = x + rat;
                if (u - a) < tol2 || (b - u) < tol2 {
                    rat = if xmid - x >= 0.0 { tol1 } else { -tol1 };
                }
            } else {
                deltax = if x >= xmid { a - x } else { b - x };
                rat = CGOLD * deltax;
            }
        }

        let u = if rat.abs() < tol1 {
            if rat >= 0.0 { x + tol1 } else { x - tol1 }
        } else {
            x + rat
        };
        let fu = f(u)?;
        nfev += 1;

        if fu > fx {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu <= fw || w == x {
                v = w;
                w = u;
                fv = fw;
                fw = fu;
            } else if fu <= fv || v == x || v == w {
                v = u;
                fv = fu;
            }
        } else {
            if u >= x {
                a = x;
            } else {
                b = x;
            }
            v = w;
            w = x;
            x = u;
            fv = fw;
            fw = fx;
            fx = fu;
        }
        iter += 1;
    }

    let status = if iter >= max_iter {
        Status::MaxIterations
    } else if x.is_nan() || fx.is_nan() {
        Status::PrecisionLoss
    } else {
        Status::Success
    };
    debug!(x, fx, iter, nfev, ?status, "brent finished");
    Ok(MinimizeResult {
        x,
        f_min: fx,
        iterations: iter,
        nfev,
        status,
    })
}

/// Brent's method for scalar minimization.
///
/// # Arguments
/// * `f` - Function to minimize
/// * `brack` - Bracket triple, or starting points for a bracket search
/// * `options` - Solver options
///
/// # Returns
/// Minimum of `f` inside the bracket
///
/// # Errors
/// * `InvalidBracket` if a supplied triple is not a valid bracket
/// * `DidNotConverge` if no bracket is found
/// * `Callback` if `f` fails
///
/// # Note
/// Uses inverse parabolic interpolation when the parabola through the three
/// best points falls well inside the bracket and golden-section steps
/// otherwise. Running out of iterations is reported through `status`.
pub fn minimize_scalar_brent<F, R>(
    mut f: F,
    brack: Bracket,
    options: &ScalarOptions,
) -> OptimizeResult<MinimizeResult>
where
    F: FnMut(f64) -> R,
    R: CallbackOutput<f64>,
{
    let tol = options.tol_or(BRENT_TOL)?;
    let max_iter = options.max_iter.unwrap_or(BRENT_MAXITER);
    brent_core(
        &mut |x| f(x).into_callback_result().map_err(OptimizeError::Callback),
        brack,
        tol,
        max_iter,
    )
}

/// Golden section search for minimization.
///
/// # Arguments
/// * `f` - Function to minimize
/// * `brack` - Bracket triple, or starting points for a bracket search
/// * `options` - Solver options
///
/// # Errors
/// * `InvalidBracket` if a supplied triple is not a valid bracket
/// * `DidNotConverge` if no bracket is found
/// * `Callback` if `f` fails
///
/// # Note
/// Golden section search is robust and doesn't require derivatives.
/// It has linear convergence but is very reliable.
pub fn minimize_scalar_golden<F, R>(
    mut f: F,
    brack: Bracket,
    options: &ScalarOptions,
) -> OptimizeResult<MinimizeResult>
where
    F: FnMut(f64) -> R,
    R: CallbackOutput<f64>,
{
    let tol = options.tol_or(f64::EPSILON.sqrt())?;
    let max_iter = options.max_iter.unwrap_or(5000);
    let mut func = |x: f64| f(x).into_callback_result().map_err(OptimizeError::Callback);

    let BracketResult { xa, xb, xc, nfev, .. } =
        resolve_bracket(&mut func, brack, "minimize_scalar_golden")?;
    let mut nfev = nfev;

    let gc = 1.0 - GOLDEN_RATIO_CONJ;
    let mut x0 = xa;
    let mut x3 = xc;
    let (mut x1, mut x2) = if (xc - xb).abs() > (xb - xa).abs() {
        (xb, xb + gc * (xc - xb))
    } else {
        (xb - gc * (xb - xa), xb)
    };
    let mut f1 = func(x1)?;
    let mut f2 = func(x2)?;
    nfev += 2;

    let mut nit = 0;
    for _ in 0..max_iter {
        if (x3 - x0).abs() <= tol * (x1.abs() + x2.abs()) {
            break;
        }
        if f2 < f1 {
            x0 = x1;
            x1 = x2;
            x2 = GOLDEN_RATIO_CONJ * x1 + gc * x3;
            f1 = f2;
            f2 = func(x2)?;
        } else {
            x3 = x2;
            x2 = x1;
            x1 = GOLDEN_RATIO_CONJ * x2 + gc * x0;
            f2 = f1;
            f1 = func(x1)?;
        }
        nfev += 1;
        nit += 1;
    }

    let (x, f_min) = if f1 < f2 { (x1, f1) } else { (x2, f2) };
    let status = if nit >= max_iter {
        Status::MaxIterations
    } else if x.is_nan() || f_min.is_nan() {
        Status::PrecisionLoss
    } else {
        Status::Success
    };
    Ok(MinimizeResult {
        x,
        f_min,
        iterations: nit,
        nfev,
        status,
    })
}

/// `sign(v)` with `sign(0) = 1`.
#[inline]
fn sign_or_one(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        1.0
    }
}

/// Bounded scalar minimization (Brent's method on a closed interval).
///
/// # Arguments
/// * `f` - Function to minimize
/// * `lower` - Lower end of the interval: a scalar or a one-element array
/// * `upper` - Upper end of the interval: a scalar or a one-element array
/// * `options` - `tol` is the absolute tolerance on x (default 1e-5),
///   `max_iter` caps function evaluations (default 500)
///
/// # Errors
/// * `InvalidInput` if an endpoint is not a single finite value
/// * `InvalidInterval` if lower > upper
/// * `Callback` if `f` fails
pub fn minimize_scalar_bounded<F, R>(
    mut f: F,
    lower: impl Into<BoundValue>,
    upper: impl Into<BoundValue>,
    options: &ScalarOptions,
) -> OptimizeResult<MinimizeResult>
where
    F: FnMut(f64) -> R,
    R: CallbackOutput<f64>,
{
    let x1 = lower.into().scalar("lower")?;
    let x2 = upper.into().scalar("upper")?;
    if !(x1.is_finite() && x2.is_finite()) {
        return Err(OptimizeError::InvalidInput {
            context: "minimize_scalar_bounded: bounds must be finite".to_string(),
        });
    }
    if x1 > x2 {
        return Err(OptimizeError::InvalidInterval {
            a: x1,
            b: x2,
            context: "minimize_scalar_bounded".to_string(),
        });
    }
    let xatol = options.tol_or(BOUNDED_XATOL)?;
    let maxfun = options.max_iter.unwrap_or(BOUNDED_MAXFUN);
    let mut func = |x: f64| f(x).into_callback_result().map_err(OptimizeError::Callback);

    let sqrt_eps = 2.2e-16_f64.sqrt();
    let golden_mean = 0.5 * (3.0 - 5.0_f64.sqrt());
    let (mut a, mut b) = (x1, x2);
    let mut fulc = a + golden_mean * (b - a);
    let mut nfc = fulc;
    let mut xf = fulc;
    let mut rat: f64 = 0.0;
    let mut e: f64 = 0.0;
    let mut fx = func(xf)?;
    let mut num = 1;
    let mut fu = f64::INFINITY;
    let mut ffulc = fx;
    let mut fnfc = fx;
    let mut xm = 0.5 * (a + b);
    let mut tol1 = sqrt_eps * xf.abs() + xatol / 3.0;
    let mut tol2 = 2.0 * tol1;
    let mut status = Status::Success;

    while (xf - xm).abs() > (tol2 - 0.5 * (b - a)) {
        let mut golden = true;
        if e.abs() > tol1 {
            golden = false;
            let mut r = (xf - nfc) * (fx - ffulc);
            let mut q = (xf - fulc) * (fx - fnfc);
            let mut p = (xf - fulc) * q - (xf - nfc) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            q = q.abs();
            r = e;
            e = rat;

            if p.abs() < (0.5 * q * r).abs() && p > q * (a - xf) && p < q * (b - xf) {
                rat = p / q;
                let x = xf + rat;
                if (x - a) < tol2 || (b - x) < tol2 {
                    let si = sign_or_one(xm - xf);
                    rat = tol1 * si;
                }
            } else {
                golden = true;
            }
        }
        if golden {
            e = if xf >= xm { a - xf } else { b - xf };
            rat = golden_mean * e;
        }

        let si = sign_or_one(rat);
        let x = xf + si * rat.abs().max(tol1);
        fu = func(x)?;
        num += 1;

        if fu <= fx {
            if x >= xf {
                a = xf;
            } else {
                b = xf;
            }
            fulc = nfc;
            ffulc = fnfc;
            nfc = xf;
            fnfc = fx;
            xf = x;
            fx = fu;
        } else {
            if x < xf {
                a = x;
            } else {
                b = x;
            }
            if fu <= fnfc || nfc == xf {
                fulc = nfc;
                ffulc = fnfc;
                nfc = x;
                fnfc = fu;
            } else if fu <= ffulc || fulc == xf || fulc == nfc {
                fulc = x;
                ffulc = fu;
            }
        }

        xm = 0.5 * (a + b);
        tol1 = sqrt_eps * xf.abs() + xatol / 3.0;
        tol2 = 2.0 * tol1;

        if num >= maxfun {
            status = Status::MaxEvaluations;
            break;
        }
    }

    if xf.is_nan() || fx.is_nan() || fu.is_nan() {
        status = Status::PrecisionLoss;
    }
    Ok(MinimizeResult {
        x: xf,
        f_min: fx,
        iterations: num,
        nfev: num,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    const SOLUTION: f64 = 1.5;

    fn fun(x: f64) -> f64 {
        (x - 1.5).powi(2) - 0.8
    }

    #[test]
    fn test_brent() {
        let opts = ScalarOptions::default();
        for brack in [
            Bracket::Auto,
            Bracket::Pair(-3.0, -2.0),
            Bracket::Triple(-15.0, -1.0, 15.0),
            Bracket::Triple(15.0, -1.0, -15.0),
        ] {
            let res = minimize_scalar_brent(fun, brack, &opts).expect("brent failed");
            assert_abs_diff_eq!(res.x, SOLUTION, epsilon = 1e-6);
            assert_eq!(res.status, Status::Success);
            assert_abs_diff_eq!(res.f_min, -0.8, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_brent_counts_bracket_evaluations() {
        let mut calls = 0;
        let res = minimize_scalar_brent(
            |x: f64| {
                calls += 1;
                fun(x)
            },
            Bracket::Auto,
            &ScalarOptions::default(),
        )
        .expect("brent failed");
        assert_eq!(res.nfev, calls);
    }

    #[test]
    fn test_brent_reevaluates_bracket_midpoint() {
        let mut points = Vec::new();
        let res = minimize_scalar_brent(
            |x: f64| {
                points.push(x);
                fun(x)
            },
            Bracket::Triple(-1.0, 1.0, 4.0),
            &ScalarOptions::default(),
        )
        .expect("brent failed");
        assert_eq!(&points[..4], &[-1.0, 1.0, 4.0, 1.0]);
        assert_eq!(res.nfev, points.len());
    }

    #[test]
    fn test_brent_invalid_triple() {
        let opts = ScalarOptions::default();
        let err = minimize_scalar_brent(fun, Bracket::Triple(0.0, 5.0, 1.0), &opts)
            .expect_err("xb outside");
        assert!(matches!(err, OptimizeError::InvalidBracket { .. }));
        let err = minimize_scalar_brent(fun, Bracket::Triple(2.0, 3.0, 4.0), &opts)
            .expect_err("no interior minimum");
        assert!(matches!(err, OptimizeError::InvalidBracket { .. }));
    }

    #[test]
    fn test_brent_iteration_cap_reported() {
        let opts = ScalarOptions {
            max_iter: Some(2),
            tol: None,
        };
        let res = minimize_scalar_brent(|x: f64| (x - 0.3).powi(4), Bracket::Auto, &opts)
            .expect("brent failed");
        assert_eq!(res.status, Status::MaxIterations);
        assert_eq!(res.iterations, 2);
    }

    #[test]
    fn test_golden() {
        let opts = ScalarOptions::default();
        let res = minimize_scalar_golden(fun, Bracket::Auto, &opts).expect("golden failed");
        assert_abs_diff_eq!(res.x, SOLUTION, epsilon = 1e-6);

        let res = minimize_scalar_golden(|x: f64| x.sin(), Bracket::Triple(3.0, 4.5, 6.0), &opts)
            .expect("golden failed");
        assert_abs_diff_eq!(res.x, 1.5 * std::f64::consts::PI, epsilon = 1e-6);
        assert_abs_diff_eq!(res.f_min, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_fminbound() {
        let opts = ScalarOptions::default();
        let res = minimize_scalar_bounded(fun, 0.0, 1.0, &opts).expect("bounded failed");
        assert_abs_diff_eq!(res.x, 1.0, epsilon = 1e-4);

        let res = minimize_scalar_bounded(fun, 1.0, 5.0, &opts).expect("bounded failed");
        assert_abs_diff_eq!(res.x, SOLUTION, epsilon = 1e-6);
        assert_eq!(res.status, Status::Success);

        let res = minimize_scalar_bounded(fun, array![1.0], array![5.0], &opts)
            .expect("bounded failed");
        assert_abs_diff_eq!(res.x, SOLUTION, epsilon = 1e-6);

        let err = minimize_scalar_bounded(fun, 5.0, 1.0, &opts).expect_err("lower > upper");
        assert!(matches!(err, OptimizeError::InvalidInterval { .. }));
    }

    #[test]
    fn test_fminbound_scalar() {
        let opts = ScalarOptions::default();
        let err = minimize_scalar_bounded(fun, array![0.0, 0.0], 1.0, &opts)
            .expect_err("two-element bound");
        assert!(matches!(err, OptimizeError::InvalidInput { .. }));

        let res = minimize_scalar_bounded(fun, 1.0, vec![5.0], &opts).expect("bounded failed");
        assert_abs_diff_eq!(res.x, SOLUTION, epsilon = 1e-6);
    }

    #[test]
    fn test_fminbound_evaluation_cap() {
        let opts = ScalarOptions {
            max_iter: Some(3),
            tol: None,
        };
        let res = minimize_scalar_bounded(|x: f64| x.cos(), 0.0, 6.0, &opts)
            .expect("bounded failed");
        assert_eq!(res.status, Status::MaxEvaluations);
        assert_eq!(res.nfev, 3);
    }

    #[test]
    fn test_fminbound_nan_objective() {
        let res = minimize_scalar_bounded(|_x: f64| f64::NAN, 0.0, 1.0, &ScalarOptions::default())
            .expect("bounded failed");
        assert_eq!(res.status, Status::PrecisionLoss);
    }
}
