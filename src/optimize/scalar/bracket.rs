//! Downhill bracket search.

use crate::optimize::error::{OptimizeError, OptimizeResult};
use crate::optimize::problem::CallbackOutput;

const GOLD: f64 = 1.618034;
const VERY_SMALL: f64 = 1e-21;
const GROW_LIMIT: f64 = 110.0;
const MAX_ITER: usize = 1000;

/// A bracket `(xa, xb, xc)` with `f(xb) <= f(xa), f(xc)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BracketResult {
    pub xa: f64,
    pub xb: f64,
    pub xc: f64,
    pub fa: f64,
    pub fb: f64,
    pub fc: f64,
    /// Function evaluations spent.
    pub nfev: usize,
}

/// Find a bracket of a minimum by walking downhill from `xa` and `xb`.
///
/// Steps grow by the golden ratio with parabolic extrapolation, limited to
/// 110 times the current interval.
///
/// # Errors
/// * `DidNotConverge` if no bracket is found within 1000 steps, or the
///   search overflows or meets a NaN value
/// * `Callback` if `f` fails
pub fn bracket<F, R>(mut f: F, xa: f64, xb: f64) -> OptimizeResult<BracketResult>
where
    F: FnMut(f64) -> R,
    R: CallbackOutput<f64>,
{
    bracket_core(
        &mut |x| f(x).into_callback_result().map_err(OptimizeError::Callback),
        xa,
        xb,
    )
}

pub(crate) fn bracket_core<F>(f: &mut F, xa: f64, xb: f64) -> OptimizeResult<BracketResult>
where
    F: FnMut(f64) -> OptimizeResult<f64>,
{
    let (mut xa, mut xb) = (xa, xb);
    let mut fa = f(xa)?;
    let mut fb = f(xb)?;
    if fa < fb {
        std::mem::swap(&mut xa, &mut xb);
        std::mem::swap(&mut fa, &mut fb);
    }
    let mut xc = xb + GOLD * (xb - xa);
    let mut fc = f(xc)?;
    let mut nfev = 3;
    let mut iter = 0;

    while fc < fb {
        let tmp1 = (xb - xa) * (fb - fc);
        let tmp2 = (xb - xc) * (fb - fa);
        let val = tmp2 - tmp1;
        let denom = if val.abs() < VERY_SMALL {
            2.0 * VERY_SMALL
        } else {
            2.0 * val
        };
        let mut w = xb - ((xb - xc) * tmp2 - (xb - xa) * tmp1) / denom;
        let wlim = xb + GROW_LIMIT * (xc - xb);
        if iter > MAX_ITER {
            return Err(OptimizeError::DidNotConverge {
                iterations: iter,
                tolerance: 0.0,
                context: "bracket".to_string(),
            });
        }
        iter += 1;

        let mut fw;
        if (w - xc) * (xb - w) > 0.0 {
            // Parabolic minimum between xb and xc.
            fw = f(w)?;
            nfev += 1;
            if fw < fc {
                return Ok(BracketResult {
                    xa: xb,
                    xb: w,
                    xc,
                    fa: fb,
                    fb: fw,
                    fc,
                    nfev,
                });
            } else if fw > fb {
                return Ok(BracketResult {
                    xa,
                    xb,
                    xc: w,
                    fa,
                    fb,
                    fc: fw,
                    nfev,
                });
            }
            w = xc + GOLD * (xc - xb);
            fw = f(w)?;
            nfev += 1;
        } else if (w - wlim) * (wlim - xc) >= 0.0 {
            w = wlim;
            fw = f(w)?;
            nfev += 1;
        } else if (w - wlim) * (xc - w) > 0.0 {
            fw = f(w)?;
            nfev += 1;
            if fw < fc {
                xb = xc;
                xc = w;
                w = xc + GOLD * (xc - xb);
                fb = fc;
                fc = fw;
                fw = f(w)?;
                nfev += 1;
            }
        } else {
            w = xc + GOLD * (xc - xb);
            fw = f(w)?;
            nfev += 1;
        }
        xa = xb;
        xb = xc;
        xc = w;
        fa = fb;
        fb = fc;
        fc = fw;
    }

    if !(xa.is_finite() && xb.is_finite() && xc.is_finite()) || fb.is_nan() {
        return Err(OptimizeError::DidNotConverge {
            iterations: iter,
            tolerance: 0.0,
            context: "bracket: search left the finite range".to_string(),
        });
    }

    Ok(BracketResult {
        xa,
        xb,
        xc,
        fa,
        fb,
        fc,
        nfev,
    })
}
