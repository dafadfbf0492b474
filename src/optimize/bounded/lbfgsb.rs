//! Limited-memory BFGS with box constraints (L-BFGS-B).
//!
//! The quasi-Newton matrix is kept in compact form B = θI − W M Wᵀ with
//! W = [Y, θS] built from the last `m` correction pairs. Each iteration
//! computes the generalized Cauchy point along the projected steepest
//! descent path, minimizes the quadratic model over the variables that are
//! still free there, and finishes with a Moré–Thuente line search that
//! stays inside the box.

#![allow(clippy::needless_range_loop)]

use std::collections::VecDeque;

use ndarray::{Array1, Array2, Axis};
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
use crate::optimize::utils::{EPS, norm, norm_inf, solve_linear_system};

const LS_FTOL: f64 = 1e-3;
const LS_GTOL: f64 = 0.9;
const LS_XTOL: f64 = 0.1;
const STPMAX_UNCONSTRAINED: f64 = 1e10;

/// Options for [`lbfgsb`].
///
/// `g_tol` is the projected gradient tolerance (default 1e-5). `f_tol` is
/// the relative reduction tolerance (default 1e7·ε). `max_iter` and
/// `max_fev` default to 15000.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LbfgsbOptions {
    pub base: MinimizeOptions,
    /// Number of correction pairs kept.
    pub m: usize,
    /// Maximum number of trial steps per line search.
    pub max_ls: usize,
}

impl Default for LbfgsbOptions {
    fn default() -> Self {
        Self {
            base: MinimizeOptions::default(),
            m: 10,
            max_ls: 20,
        }
    }
}

/// Stored correction pairs and the scaling θ.
#[derive(Debug)]
struct Memory {
    s: VecDeque<Array1<f64>>,
    y: VecDeque<Array1<f64>>,
    capacity: usize,
    theta: f64,
}

impl Memory {
    fn new(capacity: usize) -> Self {
        Self {
            s: VecDeque::with_capacity(capacity),
            y: VecDeque::with_capacity(capacity),
            capacity,
            theta: 1.0,
        }
    }

    fn len(&self) -> usize {
        self.s.len()
    }

    fn is_empty(&self) -> bool {
        self.s.is_empty()
    }

    fn clear(&mut self) {
        self.s.clear();
        self.y.clear();
        self.theta = 1.0;
    }

    fn push(&mut self, s: Array1<f64>, y: Array1<f64>) {
        if self.len() == self.capacity {
            self.s.pop_front();
            self.y.pop_front();
        }
        self.theta = y.dot(&y) / s.dot(&y);
        self.s.push_back(s);
        self.y.push_back(y);
    }

    /// Build W and the inverse middle matrix
    /// M⁻¹ = [[−D, Lᵀ], [L, θSᵀS]] where D = diag(SᵀY) and L is the
    /// strictly lower triangle of SᵀY.
    fn compact(&self, n: usize) -> Compact {
        let k = self.len();
        let theta = self.theta;
        let mut w = Array2::zeros((n, 2 * k));
        for (j, (s, y)) in self.s.iter().zip(self.y.iter()).enumerate() {
            w.column_mut(j).assign(y);
            w.column_mut(k + j).assign(&(s * theta));
        }
        let mut minv = Array2::zeros((2 * k, 2 * k));
        for i in 0..k {
            for j in 0..k {
                let sy = self.s[i].dot(&self.y[j]);
                if i == j {
                    minv[[i, i]] = -sy;
                } else if i > j {
                    minv[[k + i, j]] = sy;
                    minv[[j, k + i]] = sy;
                }
                minv[[k + i, k + j]] = theta * self.s[i].dot(&self.s[j]);
            }
        }
        Compact { w, minv, theta }
    }
}

/// Compact representation of the current quasi-Newton matrix.
#[derive(Debug)]
struct Compact {
    w: Array2<f64>,
    minv: Array2<f64>,
    theta: f64,
}

impl Compact {
    fn cols(&self) -> usize {
        self.w.ncols()
    }

    /// M·v, or `None` when the middle matrix is singular.
    fn apply_m(&self, v: &Array1<f64>) -> Option<Array1<f64>> {
        if v.is_empty() {
            return Some(v.clone());
        }
        solve_linear_system(&self.minv, v)
    }
}

/// Generalized Cauchy point and c = Wᵀ(x_cp − x).
#[derive(Debug)]
struct CauchyPoint {
    xcp: Array1<f64>,
    c: Array1<f64>,
}

/// First local minimizer of the quadratic model along the projected
/// gradient path x(t) = P(x − t g).
fn cauchy_point(
    x: &Array1<f64>,
    g: &Array1<f64>,
    bounds: &Bounds,
    cm: &Compact,
) -> Option<CauchyPoint> {
    let n = x.len();
    let (lower, upper) = (bounds.lower(), bounds.upper());
    let theta = cm.theta;

    let mut breaks = vec![f64::INFINITY; n];
    let mut d = Array1::zeros(n);
    for i in 0..n {
        let gi = g[i];
        if gi < 0.0 && upper[i].is_finite() {
            breaks[i] = (x[i] - upper[i]) / gi;
        } else if gi > 0.0 && lower[i].is_finite() {
            breaks[i] = (x[i] - lower[i]) / gi;
        }
        if breaks[i] != 0.0 {
            d[i] = -gi;
        }
    }

    let mut xcp = x.clone();
    let mut c = Array1::zeros(cm.cols());
    if d.iter().all(|&v| v == 0.0) {
        return Some(CauchyPoint { xcp, c });
    }

    let mut order: Vec<usize> = (0..n)
        .filter(|&i| breaks[i] > 0.0 && breaks[i].is_finite())
        .collect();
    order.sort_by(|&a, &b| breaks[a].total_cmp(&breaks[b]));

    let mut p = cm.w.t().dot(&d);
    let mut f1 = -d.dot(&d);
    let mut f2 = -theta * f1 - p.dot(&cm.apply_m(&p)?);
    let f2_org = f2;
    let mut dtm = -f1 / f2;
    let mut t_old = 0.0;

    for &b in &order {
        let dt = breaks[b] - t_old;
        if dtm < dt {
            break;
        }
        let xb = if d[b] > 0.0 { upper[b] } else { lower[b] };
        let zb = xb - x[b];
        xcp[b] = xb;
        c.scaled_add(dt, &p);

        let gb = g[b];
        let wb = cm.w.row(b).to_owned();
        let mc = cm.apply_m(&c)?;
        let mp = cm.apply_m(&p)?;
        let mw = cm.apply_m(&wb)?;
        f1 += dt * f2 + gb * gb + theta * gb * zb - gb * wb.dot(&mc);
        f2 -= theta * gb * gb + 2.0 * gb * wb.dot(&mp) + gb * gb * wb.dot(&mw);
        f2 = f2.max(EPS * f2_org);
        p.scaled_add(gb, &wb);
        d[b] = 0.0;
        dtm = -f1 / f2;
        t_old = breaks[b];
    }

    let dtm = dtm.max(0.0);
    let t = t_old + dtm;
    for i in 0..n {
        if d[i] != 0.0 {
            xcp[i] = x[i] + t * d[i];
        }
    }
    c.scaled_add(dtm, &p);
    Some(CauchyPoint { xcp, c })
}

/// Indices of the variables left free at the Cauchy point.
///
/// A variable sitting on a bound with a zero gradient component keeps the
/// membership it had at the previous iteration.
fn free_variables(
    xcp: &Array1<f64>,
    g: &Array1<f64>,
    bounds: &Bounds,
    prev_free: &mut [bool],
) -> Vec<usize> {
    let (lower, upper) = (bounds.lower(), bounds.upper());
    let mut free = Vec::with_capacity(xcp.len());
    for i in 0..xcp.len() {
        let at_bound = xcp[i] <= lower[i] || xcp[i] >= upper[i];
        let is_free = if !at_bound {
            true
        } else if lower[i] == upper[i] {
            false
        } else if g[i] == 0.0 {
            prev_free[i]
        } else {
            false
        };
        prev_free[i] = is_free;
        if is_free {
            free.push(i);
        }
    }
    free
}

/// Minimize the quadratic model over the free variables starting from the
/// Cauchy point and return the target point x̄ of the line search.
fn subspace_minimize(
    x: &Array1<f64>,
    g: &Array1<f64>,
    cp: CauchyPoint,
    free: &[usize],
    bounds: &Bounds,
    cm: &Compact,
) -> Option<Array1<f64>> {
    let CauchyPoint { xcp, c } = cp;
    if free.is_empty() || cm.cols() == 0 {
        return Some(xcp);
    }
    let theta = cm.theta;
    let (lower, upper) = (bounds.lower(), bounds.upper());

    // Reduced gradient of the model at the Cauchy point.
    let mc = cm.apply_m(&c)?;
    let full = g + &((&xcp - x) * theta) - cm.w.dot(&mc);
    let r = full.select(Axis(0), free);
    let wz = cm.w.select(Axis(0), free);

    // Sherman–Morrison–Woodbury: (θI − W_Z M W_Zᵀ)⁻¹ r.
    let v = cm.apply_m(&wz.t().dot(&r))?;
    let a = wz.t().dot(&wz);
    let k2 = cm.cols();
    let mut nmat = Array2::eye(k2);
    for j in 0..k2 {
        let col = cm.apply_m(&a.column(j).to_owned())?;
        for i in 0..k2 {
            nmat[[i, j]] -= col[i] / theta;
        }
    }
    let v = solve_linear_system(&nmat, &v)?;
    let mut du = -(&r / theta) - wz.dot(&v) / (theta * theta);

    let mut xbar = xcp.clone();
    for (j, &i) in free.iter().enumerate() {
        xbar[i] = (xcp[i] + du[j]).max(lower[i]).min(upper[i]);
    }
    if (&xbar - x).dot(g) <= 0.0 {
        return Some(xbar);
    }

    // Projection is not a descent direction: truncate the step instead.
    trace!("projected subspace step is not descent, truncating");
    let mut alpha: f64 = 1.0;
    let mut blocking = None;
    for (j, &i) in free.iter().enumerate() {
        let dk = du[j];
        let mut limit = alpha;
        if dk < 0.0 && lower[i].is_finite() {
            let room = lower[i] - xcp[i];
            if room >= 0.0 {
                limit = 0.0;
            } else if dk * alpha < room {
                limit = room / dk;
            }
        } else if dk > 0.0 && upper[i].is_finite() {
            let room = upper[i] - xcp[i];
            if room <= 0.0 {
                limit = 0.0;
            } else if dk * alpha > room {
                limit = room / dk;
            }
        }
        if limit < alpha {
            alpha = limit;
            blocking = Some(j);
        }
    }

    let mut xbar = xcp;
    if alpha < 1.0 {
        if let Some(j) = blocking {
            let i = free[j];
            xbar[i] = if du[j] > 0.0 { upper[i] } else { lower[i] };
            du[j] = 0.0;
        }
    }
    for (j, &i) in free.iter().enumerate() {
        xbar[i] += alpha * du[j];
    }
    Some(xbar)
}

/// Target point of the next line search, or `None` when the compact matrix
/// turned out singular.
fn search_target(
    x: &Array1<f64>,
    g: &Array1<f64>,
    bounds: &Bounds,
    memory: &Memory,
    constrained: bool,
    prev_free: &mut [bool],
) -> Option<Array1<f64>> {
    let n = x.len();
    let cm = memory.compact(n);
    if !constrained && !memory.is_empty() {
        // Without bounds the Cauchy point is skipped: x̄ = x − H g.
        let cp = CauchyPoint {
            xcp: x.clone(),
            c: Array1::zeros(cm.cols()),
        };
        let all: Vec<usize> = (0..n).collect();
        return subspace_minimize(x, g, cp, &all, bounds, &cm);
    }
    let cp = cauchy_point(x, g, bounds, &cm)?;
    let free = free_variables(&cp.xcp, g, bounds, prev_free);
    debug!(free = free.len(), n, "cauchy point");
    subspace_minimize(x, g, cp, &free, bounds, &cm)
}

/// Largest step along `d` that stays in the box.
fn max_feasible_step(x: &Array1<f64>, d: &Array1<f64>, bounds: &Bounds) -> f64 {
    let (lower, upper) = (bounds.lower(), bounds.upper());
    let mut stpmx = STPMAX_UNCONSTRAINED;
    for i in 0..x.len() {
        let di = d[i];
        if di < 0.0 && lower[i].is_finite() {
            let room = lower[i] - x[i];
            if room >= 0.0 {
                stpmx = 0.0;
            } else if di * stpmx < room {
                stpmx = room / di;
            }
        } else if di > 0.0 && upper[i].is_finite() {
            let room = upper[i] - x[i];
            if room <= 0.0 {
                stpmx = 0.0;
            } else if di * stpmx > room {
                stpmx = room / di;
            }
        }
    }
    stpmx
}

/// Accepted line search point.
struct Step {
    stp: f64,
    x: Array1<f64>,
    f: f64,
    g: Array1<f64>,
}

#[allow(clippy::too_many_arguments)]
fn line_search(
    ev: &mut FunctionEvaluator<'_, '_>,
    x: &Array1<f64>,
    f: f64,
    g: &Array1<f64>,
    d: &Array1<f64>,
    xbar: &Array1<f64>,
    stp0: f64,
    stpmax: f64,
    max_ls: usize,
) -> OptimizeResult<Option<Step>> {
    let gd = g.dot(d);
    if gd.is_nan() || gd >= 0.0 || stpmax <= 0.0 {
        debug!(gd, stpmax, "lbfgsb search direction rejected");
        return Ok(None);
    }
    let mut search = Dcsrch::new(LS_FTOL, LS_GTOL, LS_XTOL, 0.0, stpmax);
    let mut stp = stp0;
    if !search.start(stp, f, gd).is_fg() {
        return Ok(None);
    }
    for _ in 0..max_ls {
        let xt = if stp == 1.0 {
            xbar.clone()
        } else {
            x + &(d * stp)
        };
        let (ft, gt) = ev.fun_and_grad(xt.view())?;
        let used = stp;
        match search.iterate(&mut stp, ft, gt.dot(d)) {
            Task::Fg => trace!(stp = used, f = ft, "lbfgsb trial step"),
            Task::Convergence | Task::Warning(_) => {
                return Ok(Some(Step {
                    stp: used,
                    x: xt,
                    f: ft,
                    g: gt,
                }));
            }
            Task::Error(e) => {
                debug!(?e, "lbfgsb line search error");
                return Ok(None);
            }
        }
    }
    Ok(None)
}

/// ∞-norm of the gradient projected onto the box.
fn projected_gradient_norm(x: &Array1<f64>, g: &Array1<f64>, bounds: &Bounds) -> f64 {
    let (lower, upper) = (bounds.lower(), bounds.upper());
    let pg = Array1::from_shape_fn(x.len(), |i| {
        let gi = g[i];
        if gi < 0.0 {
            if upper[i].is_finite() { (x[i] - upper[i]).max(gi) } else { gi }
        } else if lower[i].is_finite() {
            (x[i] - lower[i]).min(gi)
        } else {
            gi
        }
    });
    norm_inf(pg.view())
}

/// Limited-memory BFGS with box constraints.
///
/// # Arguments
/// * `problem` - Objective, with a gradient or finite differences, and
///   optional bounds
/// * `x0` - Initial guess; projected into the box before the first
///   evaluation
/// * `options` - Solver options
///
/// # Returns
/// Minimum found, with the gradient in `jac` and, in `extras`, which
/// variables ended on a bound
///
/// # Errors
/// * `InvalidInput` if `x0` is empty
/// * `InvalidParameter` if `m` or `max_ls` is zero
/// * `DimensionMismatch` if the bounds do not match `x0`
/// * `Callback` if a user callback fails
pub fn lbfgsb(
    problem: &Problem<'_>,
    x0: &Array1<f64>,
    options: &LbfgsbOptions,
) -> OptimizeResult<MultiMinimizeResult> {
    check_x0("lbfgsb", x0)?;
    let base = &options.base;
    base.validate()?;
    if options.m == 0 {
        return Err(OptimizeError::invalid_parameter(
            "m",
            "at least one correction pair is required",
        ));
    }
    if options.max_ls == 0 {
        return Err(OptimizeError::invalid_parameter(
            "max_ls",
            "must be positive",
        ));
    }
    let n = x0.len();
    let mut ev = FunctionEvaluator::new(problem, n)?;

    let pg_tol = base.g_tol.unwrap_or(1e-5);
    let f_tol = base.f_tol.unwrap_or(1e7 * EPS);
    let max_iter = base.max_iter.unwrap_or(15000);
    let max_fev = base.max_fev.unwrap_or(15000);

    let bounds = match ev.bounds() {
        Some(b) => b.clone(),
        None => Bounds::unbounded(n),
    };
    let constrained = (0..n).any(|i| bounds.is_bounded(i));
    let boxed = (0..n).all(|i| bounds.lower()[i].is_finite() && bounds.upper()[i].is_finite());

    let mut x = bounds.project(x0.view());
    let (mut f, mut g) = ev.fun_and_grad(x.view())?;
    let mut memory = Memory::new(options.m);
    let mut prev_free = vec![true; n];
    let mut history = History::new(base.return_all, &x);
    let mut iterations = 0;
    let mut status = Status::Success;

    let mut pg_norm = projected_gradient_norm(&x, &g, &bounds);
    debug!(f, pg_norm, constrained, "lbfgsb start");

    while !(pg_norm <= pg_tol) {
        if pg_norm.is_nan() || f.is_nan() {
            status = Status::PrecisionLoss;
            break;
        }
        if iterations >= max_iter {
            status = Status::MaxIterations;
            break;
        }
        if ev.nfev() >= max_fev {
            status = Status::MaxEvaluations;
            break;
        }

        let step = loop {
            let Some(xbar) = search_target(&x, &g, &bounds, &memory, constrained, &mut prev_free)
            else {
                warn!(iteration = iterations, "singular compact matrix, resetting memory");
                memory.clear();
                continue;
            };
            let d = &xbar - &x;
            let stpmax = if !constrained {
                STPMAX_UNCONSTRAINED
            } else if iterations == 0 {
                1.0
            } else {
                max_feasible_step(&x, &d, &bounds)
            };
            let stp0 = if iterations == 0 && !boxed {
                (1.0 / norm(d.view())).min(stpmax)
            } else {
                stpmax.min(1.0)
            };
            if let Some(step) =
                line_search(&mut ev, &x, f, &g, &d, &xbar, stp0, stpmax, options.max_ls)?
            {
                break Some((step, d));
            }
            if memory.is_empty() {
                break None;
            }
            warn!(iteration = iterations, "lbfgsb line search failed, resetting memory");
            memory.clear();
        };
        let Some((step, d)) = step else {
            warn!(iteration = iterations, "lbfgsb line search failed");
            status = Status::LineSearchFailure;
            break;
        };

        let s = &step.x - &x;
        let y = &step.g - &g;
        let gd_old = g.dot(&d);
        let f_old = f;
        x = step.x;
        f = step.f;
        g = step.g;
        iterations += 1;
        history.push(&x);
        log_iteration("lbfgsb", iterations, f, base.verbose);

        pg_norm = projected_gradient_norm(&x, &g, &bounds);
        if pg_norm <= pg_tol {
            break;
        }
        if f_old - f <= f_tol * f_old.abs().max(f.abs()).max(1.0) {
            debug!(f_old, f, "relative reduction below f_tol");
            break;
        }

        let sy = s.dot(&y);
        if sy > EPS * (-step.stp * gd_old) {
            memory.push(s, y);
        } else {
            debug!(iteration = iterations, sy, "skipping correction pair");
        }
    }

    let active = (0..n)
        .map(|i| x[i] <= bounds.lower()[i] || x[i] >= bounds.upper()[i])
        .collect();

    let result = MultiMinimizeResult {
        x,
        fun: f,
        jac: Some(g),
        iterations,
        nfev: ev.nfev(),
        ngev: ev.ngev(),
        nhev: 0,
        status,
        extras: MethodExtras::LBfgsB { active },
        all_iterates: history.into_inner(),
    };
    log_termination("lbfgsb", &result, base.verbose);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::test_functions::{rosen, rosen_der};
    use crate::optimize::test_support::Berger;
    use approx::assert_abs_diff_eq;
    use ndarray::{ArrayView1, array};

    fn active_mask(res: &MultiMinimizeResult) -> Vec<bool> {
        match &res.extras {
            MethodExtras::LBfgsB { active } => active.clone(),
            other => panic!("unexpected extras {other:?}"),
        }
    }

    #[test]
    fn test_l_bfgs_b() {
        let berger = Berger::new();
        let opts = LbfgsbOptions {
            base: MinimizeOptions {
                max_iter: Some(1000),
                ..Default::default()
            },
            ..Default::default()
        };
        let res = lbfgsb(&berger.problem_with_gradient(), &Berger::x0(), &opts).expect("lbfgsb");
        assert!(res.success(), "{:?}", res.status);
        berger.assert_optimal(&res.x);
        // Every evaluation computes both the value and the gradient.
        assert_eq!(berger.funccalls.get(), 7);
        assert_eq!(berger.gradcalls.get(), 5);
        assert_eq!((res.nfev, res.ngev), (5, 5));
        assert_eq!(active_mask(&res), vec![false; 3]);
    }

    #[test]
    fn test_l_bfgs_b_numjac() {
        let berger = Berger::new();
        let res = lbfgsb(&berger.problem(), &Berger::x0(), &LbfgsbOptions::default())
            .expect("lbfgsb");
        berger.assert_optimal(&res.x);
        assert_eq!(berger.gradcalls.get(), 0);
        assert_eq!(res.ngev, 0);
    }

    #[test]
    fn test_bounded_rosenbrock() {
        // x0 <= 0.5 is active at the solution (0.5, 0.25).
        let bounds = Bounds::new([(Some(-2.0), Some(0.5)), (Some(-2.0), Some(2.0))]).expect("bounds");
        let problem = Problem::new(rosen).with_gradient(rosen_der).with_bounds(bounds);
        let res = lbfgsb(&problem, &array![-1.2, 1.0], &LbfgsbOptions::default()).expect("lbfgsb");
        assert!(res.success(), "{:?}", res.status);
        assert_abs_diff_eq!(res.x[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(res.x[1], 0.25, epsilon = 1e-3);
        assert_abs_diff_eq!(res.fun, 0.25, epsilon = 1e-5);
    }

    #[test]
    fn test_variable_held_at_bound() {
        let bounds = Bounds::new([(Some(0.0), None), (None, None)]).expect("bounds");
        let problem = Problem::new(|x: ArrayView1<f64>| (x[0] + 1.0).powi(2) + (x[1] - 1.0).powi(2))
            .with_gradient(|x: ArrayView1<f64>| array![2.0 * (x[0] + 1.0), 2.0 * (x[1] - 1.0)])
            .with_bounds(bounds);
        let res = lbfgsb(&problem, &array![0.0, 0.0], &LbfgsbOptions::default()).expect("lbfgsb");
        assert!(res.success(), "{:?}", res.status);
        assert_eq!(res.x[0], 0.0);
        assert_abs_diff_eq!(res.x[1], 1.0, epsilon = 1e-8);
        assert_eq!(active_mask(&res), vec![true, false]);
    }

    #[test]
    fn test_start_outside_box_is_projected() {
        let bounds = Bounds::new([(Some(-1.0), Some(1.0)), (Some(-1.0), Some(1.0))]).expect("bounds");
        let problem = Problem::new(|x: ArrayView1<f64>| (x[0] - 3.0).powi(2) + (x[1] - 3.0).powi(2))
            .with_bounds(bounds);
        let res = lbfgsb(&problem, &array![5.0, 5.0], &LbfgsbOptions::default()).expect("lbfgsb");
        assert!(res.success(), "{:?}", res.status);
        assert_eq!(res.x, array![1.0, 1.0]);
        assert_eq!(res.iterations, 0);
        assert_eq!(active_mask(&res), vec![true, true]);
    }

    #[test]
    fn test_iteration_budget_and_history() {
        let problem = Problem::new(rosen).with_gradient(rosen_der);
        let opts = LbfgsbOptions {
            base: MinimizeOptions {
                max_iter: Some(2),
                return_all: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let res = lbfgsb(&problem, &array![-1.2, 1.0], &opts).expect("lbfgsb");
        assert_eq!(res.status, Status::MaxIterations);
        assert_eq!(res.iterations, 2);
        assert_eq!(res.all_iterates.expect("iterates kept").len(), 3);
    }

    #[test]
    fn test_zero_memory_rejected() {
        let problem = Problem::new(rosen);
        let opts = LbfgsbOptions {
            m: 0,
            ..Default::default()
        };
        let err = lbfgsb(&problem, &array![0.0, 0.0], &opts).expect_err("m = 0");
        assert!(matches!(err, OptimizeError::InvalidParameter { .. }));
    }

    #[test]
    fn test_cauchy_point_crosses_breakpoint() {
        let bounds = Bounds::new([(None, Some(0.5)), (None, Some(2.0))]).expect("bounds");
        let cm = Memory::new(5).compact(2);
        let cp = cauchy_point(&array![0.0, 0.0], &array![-1.0, -1.0], &bounds, &cm)
            .expect("non-singular");
        assert_abs_diff_eq!(cp.xcp[0], 0.5, epsilon = 1e-15);
        assert_abs_diff_eq!(cp.xcp[1], 1.0, epsilon = 1e-15);
        assert!(cp.c.is_empty());
    }

    #[test]
    fn test_compact_matrix_satisfies_secant() {
        let mut memory = Memory::new(3);
        memory.push(array![1.0, 0.0, 0.5], array![2.0, 0.5, 1.0]);
        memory.push(array![0.0, 1.0, -0.5], array![0.5, 3.0, -1.0]);
        let cm = memory.compact(3);
        let s = memory.s.back().expect("pair").clone();
        let y = memory.y.back().expect("pair").clone();
        let mws = cm.apply_m(&cm.w.t().dot(&s)).expect("non-singular");
        let bs = &s * cm.theta - cm.w.dot(&mws);
        for i in 0..3 {
            assert_abs_diff_eq!(bs[i], y[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_degenerate_variable_keeps_membership() {
        let bounds = Bounds::new([(Some(0.0), None), (Some(0.0), None)]).expect("bounds");
        let xcp = array![0.0, 0.0];
        let g = array![0.0, 1.0];
        let mut prev = vec![true, true];
        assert_eq!(free_variables(&xcp, &g, &bounds, &mut prev), vec![0]);
        let mut prev = vec![false, true];
        assert!(free_variables(&xcp, &g, &bounds, &mut prev).is_empty());
    }
}
