//! Strong Wolfe line searches.
//!
//! [`line_search_wolfe12`] first runs the Moré–Thuente search
//! ([`scalar_search_wolfe1`]) and falls back to the bracketing/zoom search
//! ([`scalar_search_wolfe2`]) when it fails or when the accepted step is
//! rejected by the caller's extra condition.

mod dcsrch;
mod zoom;

pub use dcsrch::{Dcsrch, SearchError, SearchWarning, Task};
pub use zoom::scalar_search_wolfe2;

use ndarray::{Array1, ArrayView1};
use tracing::trace;

use super::error::OptimizeResult;
use super::evaluator::FunctionEvaluator;

/// A function of the step length `alpha` along a search direction.
pub trait LineFunction {
    /// phi(alpha) = f(x + alpha p).
    fn phi(&mut self, alpha: f64) -> OptimizeResult<f64>;

    /// phi'(alpha) = ∇f(x + alpha p) · p.
    fn derphi(&mut self, alpha: f64) -> OptimizeResult<f64>;

    /// Extra acceptance test applied to a step that satisfies the Wolfe
    /// conditions.
    fn accept(&mut self, _alpha: f64, _phi: f64) -> OptimizeResult<bool> {
        Ok(true)
    }
}

/// Line search constants.
#[derive(Debug, Clone, Copy)]
pub struct WolfeParams {
    /// Sufficient decrease constant.
    pub c1: f64,
    /// Curvature constant.
    pub c2: f64,
    /// Largest step. The Moré–Thuente stage uses 50 when unset; the zoom
    /// stage is then uncapped.
    pub amax: Option<f64>,
    /// Smallest step for the Moré–Thuente stage.
    pub amin: f64,
    /// Relative bracket tolerance for the Moré–Thuente stage.
    pub xtol: f64,
}

impl Default for WolfeParams {
    fn default() -> Self {
        Self {
            c1: 1e-4,
            c2: 0.9,
            amax: None,
            amin: 1e-8,
            xtol: 1e-14,
        }
    }
}

/// Accepted step of a line search.
#[derive(Debug, Clone)]
pub struct LineSearchOutcome {
    pub alpha: f64,
    /// phi(alpha).
    pub fval: f64,
    /// phi(0), the value before the step.
    pub old_fval: f64,
    /// Gradient at `x + alpha p` when the search already evaluated it.
    pub grad: Option<Array1<f64>>,
}

/// Initial trial step from the previous decrease, capped at 1.
fn initial_step(phi0: f64, old_phi0: Option<f64>, derphi0: f64) -> f64 {
    match old_phi0 {
        Some(old) if derphi0 != 0.0 => {
            let a = 1.01 * 2.0 * (phi0 - old) / derphi0;
            if a.is_nan() || a < 0.0 { 1.0 } else { a.min(1.0) }
        }
        _ => 1.0,
    }
}

/// Moré–Thuente search for a strong Wolfe step.
///
/// Returns `(alpha, phi(alpha))`, or `None` when the search ends with a
/// warning, an error, or after 100 trials.
pub fn scalar_search_wolfe1<L: LineFunction + ?Sized>(
    line: &mut L,
    phi0: f64,
    old_phi0: Option<f64>,
    derphi0: f64,
    params: &WolfeParams,
) -> OptimizeResult<Option<(f64, f64)>> {
    let mut stp = initial_step(phi0, old_phi0, derphi0);
    let amax = params.amax.unwrap_or(50.0);
    let mut search = Dcsrch::new(params.c1, params.c2, params.xtol, params.amin, amax);

    let mut phi1 = phi0;
    let mut task = search.start(stp, phi0, derphi0);
    let mut trials = 0;
    while task.is_fg() {
        if trials == 100 {
            task = Task::Warning(SearchWarning::MaxIterations);
            break;
        }
        if !stp.is_finite() {
            task = Task::Warning(SearchWarning::RoundingErrors);
            break;
        }
        phi1 = line.phi(stp)?;
        let derphi1 = line.derphi(stp)?;
        trials += 1;
        trace!(stp, phi1, derphi1, "dcsrch trial");
        task = search.iterate(&mut stp, phi1, derphi1);
    }

    match task {
        Task::Convergence => Ok(Some((stp, phi1))),
        other => {
            trace!(?other, "dcsrch stopped without a step");
            Ok(None)
        }
    }
}

/// Evaluator-backed [`LineFunction`] along `x + alpha p`.
///
/// Caches the last objective value (reused by finite-difference gradients)
/// and the last gradient (handed back to the caller with the accepted step).
pub struct DirectionalLine<'e, 'p, 'a> {
    ev: &'e mut FunctionEvaluator<'p, 'a>,
    x: ArrayView1<'e, f64>,
    p: ArrayView1<'e, f64>,
    last_f: Option<(f64, f64)>,
    last_g: Option<(f64, Array1<f64>)>,
    extra: Option<&'e mut dyn FnMut(f64, ArrayView1<'_, f64>, f64, ArrayView1<'_, f64>) -> OptimizeResult<bool>>,
}

impl<'e, 'p, 'a> DirectionalLine<'e, 'p, 'a> {
    pub fn new(
        ev: &'e mut FunctionEvaluator<'p, 'a>,
        x: ArrayView1<'e, f64>,
        p: ArrayView1<'e, f64>,
    ) -> Self {
        Self {
            ev,
            x,
            p,
            last_f: None,
            last_g: None,
            extra: None,
        }
    }

    /// Require `condition(alpha, x_new, f_new, g_new)` for a step to be accepted.
    pub fn with_extra_condition(
        mut self,
        condition: &'e mut dyn FnMut(f64, ArrayView1<'_, f64>, f64, ArrayView1<'_, f64>) -> OptimizeResult<bool>,
    ) -> Self {
        self.extra = Some(condition);
        self
    }

    fn point(&self, alpha: f64) -> Array1<f64> {
        &self.x + &(&self.p * alpha)
    }

    fn forget(&mut self) {
        self.last_f = None;
        self.last_g = None;
    }

    /// Gradient at `alpha` if it was the last one evaluated.
    fn take_grad(&mut self, alpha: f64) -> Option<Array1<f64>> {
        match self.last_g.take() {
            Some((a, g)) if a == alpha => Some(g),
            _ => None,
        }
    }
}

impl LineFunction for DirectionalLine<'_, '_, '_> {
    fn phi(&mut self, alpha: f64) -> OptimizeResult<f64> {
        let xa = self.point(alpha);
        let f = self.ev.fun(xa.view())?;
        self.last_f = Some((alpha, f));
        Ok(f)
    }

    fn derphi(&mut self, alpha: f64) -> OptimizeResult<f64> {
        let xa = self.point(alpha);
        let fx = match self.last_f {
            Some((a, f)) if a == alpha => Some(f),
            _ => None,
        };
        let g = self.ev.grad(xa.view(), fx)?;
        let d = g.dot(&self.p);
        self.last_g = Some((alpha, g));
        Ok(d)
    }

    fn accept(&mut self, alpha: f64, phi: f64) -> OptimizeResult<bool> {
        if self.extra.is_none() {
            return Ok(true);
        }
        if !matches!(self.last_g, Some((a, _)) if a == alpha) {
            self.derphi(alpha)?;
        }
        let xa = self.point(alpha);
        match (&mut self.extra, &self.last_g) {
            (Some(cond), Some((_, g))) => cond(alpha, xa.view(), phi, g.view()),
            _ => Ok(true),
        }
    }
}

/// Strong Wolfe search with the Moré–Thuente stage and the zoom fallback.
///
/// `gfk_dot_p` is ∇f(x)·p, `old_fval` is f(x) and `old_old_fval` the value
/// at the previous iterate (used for the initial step). Returns `None` when
/// no acceptable step was found.
pub fn line_search_wolfe12(
    line: &mut DirectionalLine<'_, '_, '_>,
    gfk_dot_p: f64,
    old_fval: f64,
    old_old_fval: Option<f64>,
    params: &WolfeParams,
) -> OptimizeResult<Option<LineSearchOutcome>> {
    if let Some((alpha, fval)) =
        scalar_search_wolfe1(line, old_fval, old_old_fval, gfk_dot_p, params)?
    {
        if line.accept(alpha, fval)? {
            return Ok(Some(LineSearchOutcome {
                alpha,
                fval,
                old_fval,
                grad: line.take_grad(alpha),
            }));
        }
    }

    trace!("falling back to zoom line search");
    line.forget();
    let result = scalar_search_wolfe2(line, old_fval, old_old_fval, gfk_dot_p, params)?;
    Ok(result.map(|(alpha, fval, converged)| {
        let grad = if converged {
            line.take_grad(alpha)
        } else {
            None
        };
        LineSearchOutcome {
            alpha,
            fval,
            old_fval,
            grad,
        }
    }))
}
