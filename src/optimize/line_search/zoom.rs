//! Bracketing line search with cubic/quadratic interpolation zoom
//! (Nocedal & Wright, Algorithms 3.5 and 3.6).

use tracing::{trace, warn};

use super::{LineFunction, WolfeParams, initial_step};
use crate::optimize::error::OptimizeResult;

const MAX_BRACKET_TRIALS: usize = 10;
const MAX_ZOOM_TRIALS: usize = 10;

/// Strong Wolfe search by step doubling and zoom.
///
/// Returns `(alpha, phi(alpha), converged)`. When the doubling phase runs
/// out of trials having reached a strictly lower value, that step is
/// returned with `converged == false` (an unbounded-below objective keeps
/// decreasing). Returns `None` when no step is acceptable.
pub fn scalar_search_wolfe2<L: LineFunction + ?Sized>(
    line: &mut L,
    phi0: f64,
    old_phi0: Option<f64>,
    derphi0: f64,
    params: &WolfeParams,
) -> OptimizeResult<Option<(f64, f64, bool)>> {
    let (c1, c2) = (params.c1, params.c2);
    let mut alpha0 = 0.0;
    let mut alpha1 = initial_step(phi0, old_phi0, derphi0);
    if let Some(amax) = params.amax {
        alpha1 = alpha1.min(amax);
    }

    let mut phi_a1 = line.phi(alpha1)?;
    let mut phi_a0 = phi0;
    let mut derphi_a0 = derphi0;

    for i in 0..MAX_BRACKET_TRIALS {
        if alpha1 == 0.0 || params.amax.is_some_and(|amax| alpha0 > amax) {
            warn!(alpha1, "line search cannot make progress");
            return Ok(None);
        }

        if phi_a1 > phi0 + c1 * alpha1 * derphi0 || (phi_a1 >= phi_a0 && i > 0) {
            return zoom(
                line,
                Endpoint::new(alpha0, phi_a0, derphi_a0),
                (alpha1, phi_a1),
                phi0,
                derphi0,
                params,
            );
        }

        let derphi_a1 = line.derphi(alpha1)?;
        if derphi_a1.abs() <= -c2 * derphi0 && line.accept(alpha1, phi_a1)? {
            return Ok(Some((alpha1, phi_a1, true)));
        }

        if derphi_a1 >= 0.0 {
            return zoom(
                line,
                Endpoint::new(alpha1, phi_a1, derphi_a1),
                (alpha0, phi_a0),
                phi0,
                derphi0,
                params,
            );
        }

        let mut alpha2 = 2.0 * alpha1;
        if let Some(amax) = params.amax {
            alpha2 = alpha2.min(amax);
        }
        alpha0 = alpha1;
        alpha1 = alpha2;
        phi_a0 = phi_a1;
        phi_a1 = line.phi(alpha1)?;
        derphi_a0 = derphi_a1;
    }

    if phi_a1 < phi0 {
        trace!(alpha1, phi_a1, "line search ran out of trials while decreasing");
        Ok(Some((alpha1, phi_a1, false)))
    } else {
        warn!("line search did not converge");
        Ok(None)
    }
}

/// Low end of a zoom interval: the step with the lowest value seen so far.
#[derive(Debug, Clone, Copy)]
struct Endpoint {
    a: f64,
    phi: f64,
    derphi: f64,
}

impl Endpoint {
    fn new(a: f64, phi: f64, derphi: f64) -> Self {
        Self { a, phi, derphi }
    }
}

/// Shrink `[lo, hi]` until a strong Wolfe step is found.
fn zoom<L: LineFunction + ?Sized>(
    line: &mut L,
    mut lo: Endpoint,
    hi: (f64, f64),
    phi0: f64,
    derphi0: f64,
    params: &WolfeParams,
) -> OptimizeResult<Option<(f64, f64, bool)>> {
    const DELTA1: f64 = 0.2;
    const DELTA2: f64 = 0.1;
    let (mut a_hi, mut phi_hi) = hi;
    let mut a_rec = 0.0;
    let mut phi_rec = phi0;

    for i in 0..MAX_ZOOM_TRIALS {
        let dalpha = a_hi - lo.a;
        let (a, b) = if dalpha < 0.0 {
            (a_hi, lo.a)
        } else {
            (lo.a, a_hi)
        };

        // Cubic interpolant through lo, hi and the previous endpoint; fall
        // back to a quadratic, then to bisection, when it lands too close
        // to either end.
        let mut a_j = None;
        if i > 0 {
            let cchk = DELTA1 * dalpha;
            a_j = cubicmin(lo.a, lo.phi, lo.derphi, a_hi, phi_hi, a_rec, phi_rec)
                .filter(|&x| !(x > b - cchk || x < a + cchk));
        }
        let a_j = match a_j {
            Some(x) => x,
            None => {
                let qchk = DELTA2 * dalpha;
                match quadmin(lo.a, lo.phi, lo.derphi, a_hi, phi_hi) {
                    Some(x) if !(x > b - qchk || x < a + qchk) => x,
                    _ => lo.a + 0.5 * dalpha,
                }
            }
        };

        let phi_aj = line.phi(a_j)?;
        if phi_aj > phi0 + params.c1 * a_j * derphi0 || phi_aj >= lo.phi {
            phi_rec = phi_hi;
            a_rec = a_hi;
            a_hi = a_j;
            phi_hi = phi_aj;
        } else {
            let derphi_aj = line.derphi(a_j)?;
            if derphi_aj.abs() <= -params.c2 * derphi0 && line.accept(a_j, phi_aj)? {
                return Ok(Some((a_j, phi_aj, true)));
            }
            if derphi_aj * (a_hi - lo.a) >= 0.0 {
                phi_rec = phi_hi;
                a_rec = a_hi;
                a_hi = lo.a;
                phi_hi = lo.phi;
            } else {
                phi_rec = lo.phi;
                a_rec = lo.a;
            }
            lo = Endpoint::new(a_j, phi_aj, derphi_aj);
        }
    }

    warn!("zoom did not find an acceptable step");
    Ok(None)
}

/// Minimizer of the cubic through (a, fa) with slope fpa at a, (b, fb) and
/// (c, fc). `None` when the cubic has no finite minimizer.
fn cubicmin(a: f64, fa: f64, fpa: f64, b: f64, fb: f64, c: f64, fc: f64) -> Option<f64> {
    let cc = fpa;
    let db = b - a;
    let dc = c - a;
    let denom = (db * dc).powi(2) * (db - dc);
    if denom == 0.0 {
        return None;
    }
    let r1 = fb - fa - cc * db;
    let r2 = fc - fa - cc * dc;
    let aa = (dc * dc * r1 - db * db * r2) / denom;
    let bb = (-dc.powi(3) * r1 + db.powi(3) * r2) / denom;
    let radical = bb * bb - 3.0 * aa * cc;
    if aa == 0.0 || radical < 0.0 {
        return None;
    }
    let xmin = a + (-bb + radical.sqrt()) / (3.0 * aa);
    xmin.is_finite().then_some(xmin)
}

/// Minimizer of the quadratic through (a, fa) with slope fpa at a and (b, fb).
fn quadmin(a: f64, fa: f64, fpa: f64, b: f64, fb: f64) -> Option<f64> {
    let db = b - a;
    let denom = db * db;
    if denom == 0.0 {
        return None;
    }
    let bb = (fb - fa - fpa * db) / denom;
    if bb == 0.0 {
        return None;
    }
    let xmin = a - fpa / (2.0 * bb);
    xmin.is_finite().then_some(xmin)
}
