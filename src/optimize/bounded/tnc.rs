//! Truncated Newton method with box constraints (TNC).
//!
//! Variables are mapped to a scaled space z = (x − offset) / scale where the
//! search runs. Each iteration solves the Newton system on the free
//! variables approximately with preconditioned conjugate gradients, using
//! forward differences of the gradient for Hessian-vector products, and
//! performs a Moré–Thuente line search capped at the largest feasible
//! step. Variables that reach a bound are pinned there until their
//! Lagrange multiplier shows that releasing them would decrease f.

#![allow(clippy::needless_range_loop)]

use std::ops::ControlFlow;

use ndarray::{Array1, ArrayView1};
use tracing::{debug, trace, warn};

use crate::optimize::bounds::Bounds;
use crate::optimize::error::{OptimizeError, OptimizeResult};
use crate::optimize::evaluator::FunctionEvaluator;
use crate::optimize::line_search::{Dcsrch, Task};
use crate::optimize::minimize::{
    History, MethodExtras, MinimizeOptions, MultiMinimizeResult, Status, check_x0, log_iteration,
    log_termination,
};
use crate::optimize::problem::Problem;
use crate::optimize::utils::{EPS, norm};

const LS_FTOL: f64 = 1e-4;
const LS_XTOL: f64 = 1e-10;
const LS_MAX_TRIALS: usize = 20;
/// Relative threshold on rz and vᵀHv below which the CG loop stops.
const CG_TOL: f64 = 1e-12;
const DEFAULT_RESCALE: f64 = 1.3;
const DEFAULT_ETA: f64 = 0.25;
const DEFAULT_MAX_STEP: f64 = 10.0;
const MAX_STEP_CAP: f64 = 1e10;

/// Detailed TNC return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TncStatus {
    Infeasible,
    LocalMinimum,
    FConverged,
    XConverged,
    MaxFunctionEvaluations,
    LineSearchFailed,
    AllVariablesConstant,
    NoProgress,
    UserAbort,
}

impl TncStatus {
    /// Numeric code, from −1 (`Infeasible`) to 7 (`UserAbort`).
    pub fn code(self) -> i32 {
        match self {
            Self::Infeasible => -1,
            Self::LocalMinimum => 0,
            Self::FConverged => 1,
            Self::XConverged => 2,
            Self::MaxFunctionEvaluations => 3,
            Self::LineSearchFailed => 4,
            Self::AllVariablesConstant => 5,
            Self::NoProgress => 6,
            Self::UserAbort => 7,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => Self::Infeasible,
            0 => Self::LocalMinimum,
            1 => Self::FConverged,
            2 => Self::XConverged,
            3 => Self::MaxFunctionEvaluations,
            4 => Self::LineSearchFailed,
            5 => Self::AllVariablesConstant,
            6 => Self::NoProgress,
            7 => Self::UserAbort,
            _ => return None,
        })
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::Infeasible => "Infeasible (lower bound > upper bound)",
            Self::LocalMinimum => "Local minimum reached (|pg| ~= 0)",
            Self::FConverged => "Converged (|f_n-f_(n-1)| ~= 0)",
            Self::XConverged => "Converged (|x_n-x_(n-1)| ~= 0)",
            Self::MaxFunctionEvaluations => "Max. number of function evaluations reached",
            Self::LineSearchFailed => "Linear search failed",
            Self::AllVariablesConstant => "All lower bounds are equal to the upper bounds",
            Self::NoProgress => "Unable to progress",
            Self::UserAbort => "User requested end of minimization",
        }
    }

    /// Coarse status shared with the other minimizers.
    pub fn status(self) -> Status {
        match self {
            Self::LocalMinimum | Self::FConverged | Self::XConverged | Self::AllVariablesConstant => {
                Status::Success
            }
            Self::MaxFunctionEvaluations => Status::MaxEvaluations,
            Self::LineSearchFailed => Status::LineSearchFailure,
            Self::Infeasible | Self::NoProgress | Self::UserAbort => Status::PrecisionLoss,
        }
    }
}

/// Options for [`tnc`].
///
/// From `base`: `max_fev` counts objective evaluations and Hessian-vector
/// products (default max(100, 10·n)), `g_tol` bounds the projected gradient
/// norm (default 1e-2·√accuracy), `x_tol` the relative step (default √ε)
/// and `f_tol` the change in f (default 0). `max_iter` is not used.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TncOptions {
    pub base: MinimizeOptions,
    /// Per-variable scale. Defaults to u − l for doubly bounded variables
    /// and 1 + |x0| otherwise.
    pub scale: Option<Array1<f64>>,
    /// Per-variable offset. Defaults to (u + l)/2 for doubly bounded
    /// variables and x0 otherwise.
    pub offset: Option<Array1<f64>>,
    /// Hessian-vector products per iteration; 0 means steepest descent.
    /// Defaults to max(1, min(50, n)).
    pub max_cg_iter: Option<usize>,
    /// Curvature tolerance of the line search, in [0, 1).
    pub eta: f64,
    /// Maximum step of the line search in scaled units.
    pub max_step: f64,
    /// Relative precision of the finite-difference Hessian products.
    /// Defaults to √ε.
    pub accuracy: Option<f64>,
    /// Estimate of the minimum value, used for the first trial step.
    pub min_estimate: f64,
    /// Rescale f when |log10 ‖g‖| exceeds this; negative never rescales.
    pub rescale: f64,
}

impl Default for TncOptions {
    fn default() -> Self {
        Self {
            base: MinimizeOptions::default(),
            scale: None,
            offset: None,
            max_cg_iter: None,
            eta: DEFAULT_ETA,
            max_step: DEFAULT_MAX_STEP,
            accuracy: None,
            min_estimate: 0.0,
            rescale: DEFAULT_RESCALE,
        }
    }
}

/// Active-set membership of one variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pivot {
    Lower,
    Free,
    Upper,
    /// Lower bound equals upper bound.
    Constant,
}

fn project(v: &mut Array1<f64>, pivots: &[Pivot]) {
    for (vi, p) in v.iter_mut().zip(pivots) {
        if *p != Pivot::Free {
            *vi = 0.0;
        }
    }
}

fn projected_norm(g: &Array1<f64>, pivots: &[Pivot]) -> f64 {
    let mut pg = g.clone();
    project(&mut pg, pivots);
    norm(pg.view())
}

/// Affine map between user variables and the scaled search space.
#[derive(Debug)]
struct Scaling {
    scale: Array1<f64>,
    offset: Array1<f64>,
    x_lower: Array1<f64>,
    x_upper: Array1<f64>,
    z_lower: Array1<f64>,
    z_upper: Array1<f64>,
}

impl Scaling {
    fn new(
        x: &Array1<f64>,
        bounds: &Bounds,
        user_scale: Option<&Array1<f64>>,
        user_offset: Option<&Array1<f64>>,
    ) -> OptimizeResult<Self> {
        let n = x.len();
        for (name, v) in [("scale", user_scale), ("offset", user_offset)] {
            if let Some(v) = v {
                if v.len() != n {
                    return Err(OptimizeError::dimension_mismatch(name, n, v.len()));
                }
            }
        }
        let (lower, upper) = (bounds.lower(), bounds.upper());
        let mut scale: Array1<f64> = Array1::ones(n);
        let mut offset: Array1<f64> = Array1::zeros(n);
        for i in 0..n {
            let (l, u) = (lower[i], upper[i]);
            if l == u {
                offset[i] = l;
                continue;
            }
            let (s, o) = if l.is_finite() && u.is_finite() {
                (u - l, 0.5 * (u + l))
            } else {
                (1.0 + x[i].abs(), x[i])
            };
            scale[i] = match user_scale {
                Some(us) if !(us[i] > 0.0 && us[i].is_finite()) => {
                    return Err(OptimizeError::invalid_parameter(
                        "scale",
                        format!("entry {i} must be positive and finite, got {}", us[i]),
                    ));
                }
                Some(us) => us[i],
                None => s,
            };
            offset[i] = match user_offset {
                Some(uo) if !uo[i].is_finite() => {
                    return Err(OptimizeError::invalid_parameter(
                        "offset",
                        format!("entry {i} must be finite, got {}", uo[i]),
                    ));
                }
                Some(uo) => uo[i],
                None => o,
            };
        }
        let z_lower = (&lower - &offset) / &scale;
        let z_upper = (&upper - &offset) / &scale;
        Ok(Self {
            scale,
            offset,
            x_lower: lower.to_owned(),
            x_upper: upper.to_owned(),
            z_lower,
            z_upper,
        })
    }

    fn to_scaled(&self, x: &Array1<f64>) -> Array1<f64> {
        (x - &self.offset) / &self.scale
    }

    /// User variables for `z`, clipped into the box.
    fn unscale(&self, z: &Array1<f64>) -> Array1<f64> {
        let x = z * &self.scale + &self.offset;
        Array1::from_shape_fn(x.len(), |i| x[i].max(self.x_lower[i]).min(self.x_upper[i]))
    }

    fn clamp(&self, z: Array1<f64>) -> Array1<f64> {
        Array1::from_shape_fn(z.len(), |i| z[i].max(self.z_lower[i]).min(self.z_upper[i]))
    }

    /// Gradient with respect to z of fscale·f.
    fn scale_grad(&self, gx: &Array1<f64>, fscale: f64, pivots: &[Pivot]) -> Array1<f64> {
        let mut g = gx * &self.scale * fscale;
        for (gi, p) in g.iter_mut().zip(pivots) {
            if *p == Pivot::Constant {
                *gi = 0.0;
            }
        }
        g
    }

    fn initial_pivots(&self, x: &Array1<f64>) -> Vec<Pivot> {
        (0..x.len())
            .map(|i| {
                if self.x_lower[i] == self.x_upper[i] {
                    Pivot::Constant
                } else if x[i] <= self.x_lower[i] {
                    Pivot::Lower
                } else if x[i] >= self.x_upper[i] {
                    Pivot::Upper
                } else {
                    Pivot::Free
                }
            })
            .collect()
    }

    /// Pin free variables that the step `p` drove onto a bound.
    fn add_constraints(&self, z: &mut Array1<f64>, p: &Array1<f64>, pivots: &mut [Pivot]) -> bool {
        let mut added = false;
        for i in 0..z.len() {
            if pivots[i] != Pivot::Free || p[i] == 0.0 {
                continue;
            }
            let (lo, hi) = (self.z_lower[i], self.z_upper[i]);
            if p[i] < 0.0 && lo.is_finite() && z[i] - lo <= 10.0 * EPS * (lo.abs() + 1.0) {
                pivots[i] = Pivot::Lower;
                z[i] = lo;
                added = true;
            } else if p[i] > 0.0 && hi.is_finite() && hi - z[i] <= 10.0 * EPS * (hi.abs() + 1.0) {
                pivots[i] = Pivot::Upper;
                z[i] = hi;
                added = true;
            }
        }
        added
    }

    /// Largest step along `p` keeping the free variables feasible.
    fn max_step(&self, mut step: f64, z: &Array1<f64>, p: &Array1<f64>, pivots: &[Pivot]) -> f64 {
        for i in 0..z.len() {
            if pivots[i] != Pivot::Free || p[i] == 0.0 {
                continue;
            }
            if p[i] < 0.0 {
                let room = self.z_lower[i] - z[i];
                if room > step * p[i] {
                    step = room / p[i];
                }
            } else {
                let room = self.z_upper[i] - z[i];
                if room < step * p[i] {
                    step = room / p[i];
                }
            }
        }
        step.max(0.0)
    }
}

/// Release the pinned variable whose multiplier most strongly says f would
/// decrease by moving it into the interior.
fn release_most_violated(g: &Array1<f64>, pivots: &mut [Pivot]) -> bool {
    let mut worst = None;
    let mut cmax = 0.0;
    for i in 0..g.len() {
        let t = match pivots[i] {
            Pivot::Lower => g[i],
            Pivot::Upper => -g[i],
            Pivot::Free | Pivot::Constant => continue,
        };
        if t < cmax {
            cmax = t;
            worst = Some(i);
        }
    }
    match worst {
        Some(i) => {
            debug!(index = i, multiplier = cmax, "releasing constraint");
            pivots[i] = Pivot::Free;
            true
        }
        None => false,
    }
}

/// Diagonal scaling combined with one BFGS pair, used to precondition the
/// inner CG iterations.
#[derive(Debug)]
struct Preconditioner {
    diag: Array1<f64>,
    pair: Option<(Array1<f64>, Array1<f64>, f64)>,
}

impl Preconditioner {
    fn new(n: usize) -> Self {
        Self {
            diag: Array1::ones(n),
            pair: None,
        }
    }

    fn reset(&mut self) {
        self.diag.fill(1.0);
        self.pair = None;
    }

    fn update(&mut self, s: &Array1<f64>, y: &Array1<f64>) {
        let ys = y.dot(s);
        self.pair = (ys > 0.0).then(|| (s.clone(), y.clone(), ys));
    }

    /// Diagonal of the BFGS-updated matrix, the starting point for the
    /// diagonal accumulated during CG.
    fn initial_diagonal(&self) -> Array1<f64> {
        let Some((s, y, ys)) = &self.pair else {
            return self.diag.clone();
        };
        let bs = &self.diag * s;
        let sbs = s.dot(&bs);
        let mut e = Array1::from_shape_fn(s.len(), |i| {
            let d = self.diag[i];
            d - d * d * s[i] * s[i] / sbs + y[i] * y[i] / ys
        });
        e.mapv_inplace(|v| if v > 1e-6 { v } else { 1.0 });
        e
    }

    /// Apply the inverse of the preconditioner.
    fn solve(&self, r: &Array1<f64>) -> Array1<f64> {
        let hr = r / &self.diag;
        let Some((s, y, ys)) = &self.pair else {
            return hr;
        };
        let hy = y / &self.diag;
        let rs = r.dot(s);
        let yhy = y.dot(&hy);
        let rhy = r.dot(&hy);
        let delta = (1.0 + yhy / ys) * rs / ys - rhy / ys;
        let beta = -rs / ys;
        hr + s * delta + hy * beta
    }
}

/// Evaluation state shared by the inner and outer loops.
struct Context<'s, 'e, 'p, 'a> {
    ev: &'e mut FunctionEvaluator<'p, 'a>,
    scaling: &'s Scaling,
    fscale: f64,
    accuracy: f64,
    /// Objective/gradient evaluations plus Hessian products so far.
    evals: usize,
    max_fev: usize,
}

impl Context<'_, '_, '_, '_> {
    fn evaluate(&mut self, z: &Array1<f64>) -> OptimizeResult<(Array1<f64>, f64, Array1<f64>)> {
        let x = self.scaling.unscale(z);
        let (f, gx) = self.ev.fun_and_grad(x.view())?;
        self.evals += 1;
        Ok((x, f, gx))
    }

    /// Forward difference of the scaled gradient along `v`.
    fn hess_vec(
        &mut self,
        z: &Array1<f64>,
        g: &Array1<f64>,
        v: &Array1<f64>,
        pivots: &[Pivot],
    ) -> OptimizeResult<Array1<f64>> {
        let delta = self.accuracy * (norm(z.view()) + 1.0);
        let zv = z + &(v * delta);
        let xv = self.scaling.unscale(&zv);
        let gx = self.ev.grad(xv.view(), None)?;
        self.evals += 1;
        let gv = self.scaling.scale_grad(&gx, self.fscale, pivots);
        Ok((gv - g) / delta)
    }

    /// Preconditioned truncated CG on the free variables for H p = −g.
    fn direction(
        &mut self,
        z: &Array1<f64>,
        g: &Array1<f64>,
        pivots: &[Pivot],
        precond: &mut Preconditioner,
        max_cg: usize,
    ) -> OptimizeResult<Array1<f64>> {
        let n = z.len();
        let mut gp = g.clone();
        project(&mut gp, pivots);
        if max_cg == 0 {
            return Ok(-gp);
        }
        let rhsnrm = norm(gp.view());
        let mut emat = precond.initial_diagonal();
        let mut r = -&gp;
        let mut v: Array1<f64> = Array1::zeros(n);
        let mut zsol: Array1<f64> = Array1::zeros(n);
        let mut qold = 0.0;
        let mut rzold = 0.0;

        for k in 0..max_cg {
            project(&mut r, pivots);
            let mut zk = precond.solve(&r);
            project(&mut zk, pivots);
            let rz = r.dot(&zk);
            if rz / rhsnrm < CG_TOL || self.evals + 1 >= self.max_fev {
                if k == 0 {
                    zsol = -&gp;
                }
                break;
            }
            let beta = if k == 0 { 0.0 } else { rz / rzold };
            v = &zk + &(v * beta);
            project(&mut v, pivots);

            let mut hv = self.hess_vec(z, g, &v, pivots)?;
            project(&mut hv, pivots);
            let vhv = v.dot(&hv);
            if vhv / rhsnrm < CG_TOL {
                // Non-positive curvature.
                if k == 0 {
                    zsol = -precond.solve(&gp);
                    project(&mut zsol, pivots);
                }
                break;
            }

            let vr = v.dot(&r);
            if vr > 0.0 {
                for i in 0..n {
                    let e = emat[i] - r[i] * r[i] / vr + hv[i] * hv[i] / vhv;
                    emat[i] = if e > 1e-6 { e } else { 1.0 };
                }
            }

            let alpha = rz / vhv;
            zsol.scaled_add(alpha, &v);
            r.scaled_add(-alpha, &hv);

            // Truncate once the quadratic model stops improving.
            let gtp = zsol.dot(&gp);
            let pr = r.dot(&zsol);
            let qnew = 0.5 * (gtp + pr);
            let qtest = (k + 1) as f64 * (1.0 - qold / qnew);
            if qtest <= 0.5 {
                break;
            }
            if gtp > 0.0 {
                zsol.scaled_add(-alpha, &v);
                break;
            }
            qold = qnew;
            rzold = rz;
        }
        precond.diag = emat;
        Ok(zsol)
    }
}

/// Point accepted by the line search.
struct Trial {
    alpha: f64,
    z: Array1<f64>,
    x: Array1<f64>,
    /// Scaled objective.
    f: f64,
    fx: f64,
    gx: Array1<f64>,
    /// Scaled gradient.
    g: Array1<f64>,
}

struct LineResult {
    trial: Option<Trial>,
    budget_exhausted: bool,
}

/// First trial step: a step to the estimated minimum value, capped at 1 and
/// at the maximum step.
fn initial_step(f: f64, f_min: f64, gtp: f64, max_step: f64) -> f64 {
    let d = (f - f_min).abs();
    let mut alpha = 1.0;
    if 2.0 * d <= -gtp && d >= EPS {
        alpha = -2.0 * d / gtp;
    }
    alpha.min(max_step)
}

#[allow(clippy::too_many_arguments)]
fn line_search(
    ctx: &mut Context<'_, '_, '_, '_>,
    z: &Array1<f64>,
    f: f64,
    p: &Array1<f64>,
    gtp: f64,
    alpha0: f64,
    stpmax: f64,
    eta: f64,
    pivots: &[Pivot],
) -> OptimizeResult<LineResult> {
    let mut search = Dcsrch::new(LS_FTOL, eta, LS_XTOL, 0.0, stpmax);
    let mut stp = alpha0;
    let mut best: Option<Trial> = None;
    if !search.start(stp, f, gtp).is_fg() {
        return Ok(LineResult {
            trial: None,
            budget_exhausted: false,
        });
    }
    for _ in 0..LS_MAX_TRIALS {
        if ctx.evals >= ctx.max_fev {
            return Ok(LineResult {
                trial: best,
                budget_exhausted: true,
            });
        }
        let zt = ctx.scaling.clamp(z + &(p * stp));
        let (xt, fx, gx) = ctx.evaluate(&zt)?;
        let ft = fx * ctx.fscale;
        let gt = ctx.scaling.scale_grad(&gx, ctx.fscale, pivots);
        let used = stp;
        let task = search.iterate(&mut stp, ft, gt.dot(p));
        trace!(stp = used, f = ft, "tnc trial step");
        let trial = Trial {
            alpha: used,
            z: zt,
            x: xt,
            f: ft,
            fx,
            gx,
            g: gt,
        };
        match task {
            Task::Fg => {
                if ft < f && best.as_ref().is_none_or(|b| ft < b.f) {
                    best = Some(trial);
                }
            }
            Task::Convergence => {
                return Ok(LineResult {
                    trial: Some(trial),
                    budget_exhausted: false,
                });
            }
            Task::Warning(w) => {
                debug!(?w, "tnc line search warning");
                if ft < f && best.as_ref().is_none_or(|b| ft < b.f) {
                    best = Some(trial);
                }
                break;
            }
            Task::Error(e) => {
                debug!(?e, "tnc line search error");
                break;
            }
        }
    }
    Ok(LineResult {
        trial: best,
        budget_exhausted: false,
    })
}

/// Rescale f so that ‖g‖ is 1 when |log10 ‖g‖| exceeds `rescale`.
fn rescale_objective(
    rescale: f64,
    fscale: &mut f64,
    f: &mut f64,
    g: &mut Array1<f64>,
    f_last_constraint: &mut f64,
) -> bool {
    if rescale < 0.0 {
        return false;
    }
    let gnorm = norm(g.view());
    if !(gnorm > EPS && gnorm.log10().abs() > rescale) {
        return false;
    }
    let factor = 1.0 / gnorm;
    *fscale *= factor;
    *f *= factor;
    *f_last_constraint *= factor;
    *g *= factor;
    debug!(fscale = *fscale, "tnc rescaled objective");
    true
}

/// Truncated Newton method with box constraints.
///
/// Equivalent to [`tnc_with_callback`] with a callback that never stops
/// the run.
///
/// # Errors
/// See [`tnc_with_callback`].
pub fn tnc(
    problem: &Problem<'_>,
    x0: &Array1<f64>,
    options: &TncOptions,
) -> OptimizeResult<MultiMinimizeResult> {
    tnc_with_callback(problem, x0, options, |_| ControlFlow::Continue(()))
}

/// Truncated Newton method with box constraints, calling `callback` with
/// the current point after every iteration.
///
/// # Arguments
/// * `problem` - Objective, with a gradient or finite differences, and
///   optional bounds
/// * `x0` - Initial guess; clipped into the box
/// * `options` - Solver options
/// * `callback` - Returning `ControlFlow::Break` ends the run with
///   [`TncStatus::UserAbort`]
///
/// # Returns
/// Minimum found, with the detailed return code in `extras`
///
/// # Errors
/// * `InvalidInput` if `x0` is empty
/// * `InvalidParameter` for an `eta` outside [0, 1), a non-positive
///   `max_step` or invalid scales and offsets
/// * `DimensionMismatch` if bounds, scales or offsets do not match `x0`
/// * `Callback` if a user callback fails
pub fn tnc_with_callback<C>(
    problem: &Problem<'_>,
    x0: &Array1<f64>,
    options: &TncOptions,
    mut callback: C,
) -> OptimizeResult<MultiMinimizeResult>
where
    C: FnMut(ArrayView1<'_, f64>) -> ControlFlow<()>,
{
    check_x0("tnc", x0)?;
    let base = &options.base;
    base.validate()?;
    if !(0.0..1.0).contains(&options.eta) {
        return Err(OptimizeError::invalid_parameter(
            "eta",
            format!("must lie in [0, 1), got {}", options.eta),
        ));
    }
    if !(options.max_step > 0.0) {
        return Err(OptimizeError::invalid_parameter(
            "max_step",
            format!("must be positive, got {}", options.max_step),
        ));
    }
    if base.max_iter.is_some() {
        warn!("tnc ignores max_iter, use max_fev");
    }
    let n = x0.len();
    let mut ev = FunctionEvaluator::new(problem, n)?;

    let accuracy = match options.accuracy {
        Some(a) if a > EPS => a,
        _ => EPS.sqrt(),
    };
    let pg_tol = base.g_tol.unwrap_or(1e-2 * accuracy.sqrt());
    let x_tol = base.x_tol.unwrap_or(EPS.sqrt());
    let f_tol = base.f_tol.unwrap_or(0.0);
    let max_fev = base.max_fev.unwrap_or((10 * n).max(100));
    let max_cg = options.max_cg_iter.unwrap_or_else(|| n.clamp(1, 50));

    let bounds = match ev.bounds() {
        Some(b) => b.clone(),
        None => Bounds::unbounded(n),
    };
    let mut x = bounds.project(x0.view());
    let scaling = Scaling::new(&x, &bounds, options.scale.as_ref(), options.offset.as_ref())?;
    let mut pivots = scaling.initial_pivots(&x);
    let mut z = scaling.to_scaled(&x);

    let (mut fx, mut gx) = ev.fun_and_grad(x.view())?;
    let mut history = History::new(base.return_all, &x);
    let mut ctx = Context {
        ev: &mut ev,
        scaling: &scaling,
        fscale: 1.0,
        accuracy,
        evals: 1,
        max_fev,
    };
    let mut f = fx;
    let mut g = scaling.scale_grad(&gx, 1.0, &pivots);
    let mut f_last_constraint = f;
    rescale_objective(options.rescale, &mut ctx.fscale, &mut f, &mut g, &mut f_last_constraint);

    let mut precond = Preconditioner::new(n);
    let mut max_step = options.max_step;
    let mut iterations = 0;
    let mut zero_steps = 0;

    let tnc_status = if pivots.iter().all(|p| *p == Pivot::Constant) {
        TncStatus::AllVariablesConstant
    } else {
        loop {
            let pg_norm = projected_norm(&g, &pivots);
            if pg_norm.is_nan() || f.is_nan() {
                break TncStatus::NoProgress;
            }
            if pg_norm <= pg_tol * ctx.fscale {
                if !release_most_violated(&g, &mut pivots) {
                    break TncStatus::LocalMinimum;
                }
                precond.reset();
                f_last_constraint = f;
            }
            if ctx.evals >= max_fev {
                break TncStatus::MaxFunctionEvaluations;
            }

            let p = ctx.direction(&z, &g, &pivots, &mut precond, max_cg)?;
            let gtp = g.dot(&p);
            if !(gtp < 0.0) {
                warn!(iteration = iterations, gtp, "tnc direction is not a descent direction");
                break TncStatus::NoProgress;
            }
            let pnorm = norm(p.view());
            let ustpmax = max_step / (pnorm + EPS);
            let spe = scaling.max_step(ustpmax, &z, &p, &pivots);
            if spe <= 0.0 {
                // A free variable sits on a bound the step points through.
                zero_steps += 1;
                if zero_steps > n || !scaling.add_constraints(&mut z, &p, &mut pivots) {
                    break TncStatus::NoProgress;
                }
                precond.reset();
                f_last_constraint = f;
                continue;
            }
            zero_steps = 0;

            let alpha0 = initial_step(f, options.min_estimate * ctx.fscale, gtp, spe);
            let ls = line_search(&mut ctx, &z, f, &p, gtp, alpha0, spe, options.eta, &pivots)?;
            let Some(trial) = ls.trial else {
                break if ls.budget_exhausted {
                    TncStatus::MaxFunctionEvaluations
                } else {
                    warn!(iteration = iterations, "tnc line search failed");
                    TncStatus::LineSearchFailed
                };
            };

            let s = &trial.z - &z;
            let mut y = &trial.g - &g;
            project(&mut y, &pivots);
            let difnew = f - trial.f;
            let alpha = trial.alpha;
            z = trial.z;
            x = trial.x;
            f = trial.f;
            g = trial.g;
            fx = trial.fx;
            gx = trial.gx;
            iterations += 1;
            log_iteration("tnc", iterations, fx, base.verbose);

            if alpha >= 0.9 * ustpmax {
                max_step = (max_step * 1e2).min(MAX_STEP_CAP);
            }
            let newcon = scaling.add_constraints(&mut z, &p, &mut pivots);
            if newcon {
                x = scaling.unscale(&z);
            }
            history.push(&x);
            if callback(x.view()).is_break() {
                break TncStatus::UserAbort;
            }
            if ls.budget_exhausted {
                break TncStatus::MaxFunctionEvaluations;
            }

            if newcon {
                precond.reset();
                f_last_constraint = f;
            } else {
                let pg_norm = projected_norm(&g, &pivots);
                let stalled = f_last_constraint - f <= -0.5 * gtp && pg_norm > pg_tol * ctx.fscale;
                if !stalled && release_most_violated(&g, &mut pivots) {
                    precond.reset();
                    f_last_constraint = f;
                } else {
                    if difnew.abs() <= f_tol * f.abs() {
                        break TncStatus::FConverged;
                    }
                    if alpha * pnorm < x_tol * (1.0 + norm(z.view())) {
                        break TncStatus::XConverged;
                    }
                    precond.update(&s, &y);
                }
            }

            if rescale_objective(options.rescale, &mut ctx.fscale, &mut f, &mut g, &mut f_last_constraint)
            {
                precond.reset();
            }
        }
    };

    let result = MultiMinimizeResult {
        x,
        fun: fx,
        jac: Some(gx),
        iterations,
        nfev: ev.nfev(),
        ngev: ev.ngev(),
        nhev: ev.nhev(),
        status: tnc_status.status(),
        extras: MethodExtras::Tnc { status: tnc_status },
        all_iterates: history.into_inner(),
    };
    log_termination("tnc", &result, base.verbose);
    Ok(result)
}
