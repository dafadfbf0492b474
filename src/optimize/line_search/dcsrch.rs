//! Moré–Thuente safeguarded line search (MINPACK-2 `dcsrch` / `dcstep`).
//!
//! The search is driven by reverse communication: the caller evaluates the
//! function value and directional derivative at the step handed out with
//! [`Task::Fg`] and feeds them back through [`Dcsrch::iterate`].

/// Why a search stopped without satisfying the Wolfe conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchWarning {
    /// Rounding errors prevent further progress.
    RoundingErrors,
    /// The bracket is narrower than `xtol`.
    XtolSatisfied,
    /// The step reached the upper limit with sufficient decrease.
    StpMax,
    /// The step reached the lower limit.
    StpMin,
    /// The caller's trial budget ran out.
    MaxIterations,
}

/// Invalid input detected when a search is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchError {
    StpBelowMin,
    StpAboveMax,
    /// The initial directional derivative is not negative.
    AscentDirection,
    NegativeTolerance,
    InvalidStepLimits,
}

/// Reverse-communication state of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Evaluate f and f' at the current step and call `iterate` again.
    Fg,
    Convergence,
    Warning(SearchWarning),
    Error(SearchError),
}

impl Task {
    pub fn is_fg(self) -> bool {
        matches!(self, Self::Fg)
    }
}

/// Best step so far (`stx`) and the other endpoint of the interval (`sty`)
/// with their function values and derivatives.
#[derive(Debug, Clone, Copy)]
struct Interval {
    stx: f64,
    fx: f64,
    gx: f64,
    sty: f64,
    fy: f64,
    gy: f64,
    brackt: bool,
}

/// Safeguarded cubic/quadratic line search state.
#[derive(Debug, Clone)]
pub struct Dcsrch {
    ftol: f64,
    gtol: f64,
    xtol: f64,
    stpmin: f64,
    stpmax: f64,
    stage: u8,
    finit: f64,
    ginit: f64,
    gtest: f64,
    interval: Interval,
    stmin: f64,
    stmax: f64,
    width: f64,
    width1: f64,
}

const P5: f64 = 0.5;
const P66: f64 = 0.66;
const XTRAPL: f64 = 1.1;
const XTRAPU: f64 = 4.0;

impl Dcsrch {
    /// `ftol` is the sufficient-decrease constant (c1), `gtol` the curvature
    /// constant (c2), `xtol` the relative bracket width tolerance.
    pub fn new(ftol: f64, gtol: f64, xtol: f64, stpmin: f64, stpmax: f64) -> Self {
        Self {
            ftol,
            gtol,
            xtol,
            stpmin,
            stpmax,
            stage: 1,
            finit: 0.0,
            ginit: 0.0,
            gtest: 0.0,
            interval: Interval {
                stx: 0.0,
                fx: 0.0,
                gx: 0.0,
                sty: 0.0,
                fy: 0.0,
                gy: 0.0,
                brackt: false,
            },
            stmin: 0.0,
            stmax: 0.0,
            width: 0.0,
            width1: 0.0,
        }
    }

    /// Begin a search at step `stp` given f(0) and f'(0).
    ///
    /// Returns [`Task::Fg`] (evaluate at `stp`) or an input error.
    pub fn start(&mut self, stp: f64, f: f64, g: f64) -> Task {
        let mut task = Task::Fg;
        if stp < self.stpmin {
            task = Task::Error(SearchError::StpBelowMin);
        }
        if stp > self.stpmax {
            task = Task::Error(SearchError::StpAboveMax);
        }
        if g >= 0.0 {
            task = Task::Error(SearchError::AscentDirection);
        }
        if self.ftol < 0.0 || self.gtol < 0.0 || self.xtol < 0.0 {
            task = Task::Error(SearchError::NegativeTolerance);
        }
        if self.stpmin < 0.0 || self.stpmax < self.stpmin {
            task = Task::Error(SearchError::InvalidStepLimits);
        }
        if let Task::Error(_) = task {
            return task;
        }

        self.stage = 1;
        self.finit = f;
        self.ginit = g;
        self.gtest = self.ftol * self.ginit;
        self.width = self.stpmax - self.stpmin;
        self.width1 = self.width / P5;
        self.interval = Interval {
            stx: 0.0,
            fx: f,
            gx: g,
            sty: 0.0,
            fy: f,
            gy: g,
            brackt: false,
        };
        self.stmin = 0.0;
        self.stmax = stp + XTRAPU * stp;
        Task::Fg
    }

    /// Feed f and f' at `*stp`; on [`Task::Fg`] `*stp` holds the next trial.
    pub fn iterate(&mut self, stp: &mut f64, f: f64, g: f64) -> Task {
        let ftest = self.finit + *stp * self.gtest;
        if self.stage == 1 && f <= ftest && g >= 0.0 {
            self.stage = 2;
        }

        let brackt = self.interval.brackt;
        let mut task = Task::Fg;
        if brackt && (*stp <= self.stmin || *stp >= self.stmax) {
            task = Task::Warning(SearchWarning::RoundingErrors);
        }
        if brackt && self.stmax - self.stmin <= self.xtol * self.stmax {
            task = Task::Warning(SearchWarning::XtolSatisfied);
        }
        if *stp == self.stpmax && f <= ftest && g <= self.gtest {
            task = Task::Warning(SearchWarning::StpMax);
        }
        if *stp == self.stpmin && (f > ftest || g >= self.gtest) {
            task = Task::Warning(SearchWarning::StpMin);
        }
        if f <= ftest && g.abs() <= self.gtol * (-self.ginit) {
            task = Task::Convergence;
        }
        if !task.is_fg() {
            return task;
        }

        // Until a step with sufficient decrease and nonnegative slope is
        // seen, steer by the modified function f(stp) - stp * gtest.
        let iv = self.interval;
        if self.stage == 1 && f <= iv.fx && f > ftest {
            let gtest = self.gtest;
            let mut m = Interval {
                stx: iv.stx,
                fx: iv.fx - iv.stx * gtest,
                gx: iv.gx - gtest,
                sty: iv.sty,
                fy: iv.fy - iv.sty * gtest,
                gy: iv.gy - gtest,
                brackt: iv.brackt,
            };
            let fm = f - *stp * gtest;
            let gm = g - gtest;
            *stp = dcstep(&mut m, *stp, fm, gm, self.stmin, self.stmax);
            self.interval = Interval {
                stx: m.stx,
                fx: m.fx + m.stx * gtest,
                gx: m.gx + gtest,
                sty: m.sty,
                fy: m.fy + m.sty * gtest,
                gy: m.gy + gtest,
                brackt: m.brackt,
            };
        } else {
            *stp = dcstep(&mut self.interval, *stp, f, g, self.stmin, self.stmax);
        }

        let iv = self.interval;
        if iv.brackt {
            // Force sufficient shrinkage of the bracket, bisecting otherwise.
            if (iv.sty - iv.stx).abs() >= P66 * self.width1 {
                *stp = iv.stx + P5 * (iv.sty - iv.stx);
            }
            self.width1 = self.width;
            self.width = (iv.sty - iv.stx).abs();
        }

        if iv.brackt {
            self.stmin = iv.stx.min(iv.sty);
            self.stmax = iv.stx.max(iv.sty);
        } else {
            self.stmin = *stp + XTRAPL * (*stp - iv.stx);
            self.stmax = *stp + XTRAPU * (*stp - iv.stx);
        }

        *stp = stp.max(self.stpmin);
        *stp = stp.min(self.stpmax);

        if iv.brackt
            && (*stp <= self.stmin
                || *stp >= self.stmax
                || self.stmax - self.stmin <= self.xtol * self.stmax)
        {
            *stp = iv.stx;
        }

        Task::Fg
    }
}

/// Compute a safeguarded step and update the interval that contains a step
/// satisfying the Wolfe conditions. Returns the new trial step.
fn dcstep(iv: &mut Interval, stp: f64, fp: f64, dp: f64, stpmin: f64, stpmax: f64) -> f64 {
    let Interval {
        stx,
        fx,
        gx: dx,
        sty,
        fy,
        gy: dy,
        ..
    } = *iv;
    let sgnd = dp * (dx / dx.abs());

    let stpf;
    if fp > fx {
        // Higher function value: the minimum is bracketed.
        let theta = 3.0 * (fx - fp) / (stp - stx) + dx + dp;
        let s = theta.abs().max(dx.abs()).max(dp.abs());
        let mut gamma = s * ((theta / s).powi(2) - (dx / s) * (dp / s)).sqrt();
        if stp < stx {
            gamma = -gamma;
        }
        let p = (gamma - dx) + theta;
        let q = ((gamma - dx) + gamma) + dp;
        let r = p / q;
        let stpc = stx + r * (stp - stx);
        let stpq = stx + ((dx / ((fx - fp) / (stp - stx) + dx)) / 2.0) * (stp - stx);
        stpf = if (stpc - stx).abs() < (stpq - stx).abs() {
            stpc
        } else {
            stpc + (stpq - stpc) / 2.0
        };
        iv.brackt = true;
    } else if sgnd < 0.0 {
        // Derivatives of opposite sign: the minimum is bracketed.
        let theta = 3.0 * (fx - fp) / (stp - stx) + dx + dp;
        let s = theta.abs().max(dx.abs()).max(dp.abs());
        let mut gamma = s * ((theta / s).powi(2) - (dx / s) * (dp / s)).sqrt();
        if stp > stx {
            gamma = -gamma;
        }
        let p = (gamma - dp) + theta;
        let q = ((gamma - dp) + gamma) + dx;
        let r = p / q;
        let stpc = stp + r * (stx - stp);
        let stpq = stp + (dp / (dp - dx)) * (stx - stp);
        stpf = if (stpc - stp).abs() > (stpq - stp).abs() {
            stpc
        } else {
            stpq
        };
        iv.brackt = true;
    } else if dp.abs() < dx.abs() {
        // Same sign, decreasing magnitude.
        let theta = 3.0 * (fx - fp) / (stp - stx) + dx + dp;
        let s = theta.abs().max(dx.abs()).max(dp.abs());
        let mut gamma = s * (0.0f64).max((theta / s).powi(2) - (dx / s) * (dp / s)).sqrt();
        if stp > stx {
            gamma = -gamma;
        }
        let p = (gamma - dp) + theta;
        let q = (gamma + (dx - dp)) + gamma;
        let r = p / q;
        let stpc = if r < 0.0 && gamma != 0.0 {
            stp + r * (stx - stp)
        } else if stp > stx {
            stpmax
        } else {
            stpmin
        };
        let stpq = stp + (dp / (dp - dx)) * (stx - stp);

        if iv.brackt {
            let mut s = if (stpc - stp).abs() < (stpq - stp).abs() {
                stpc
            } else {
                stpq
            };
            if stp > stx {
                s = (stp + P66 * (sty - stp)).min(s);
            } else {
                s = (stp + P66 * (sty - stp)).max(s);
            }
            stpf = s;
        } else {
            let s = if (stpc - stp).abs() > (stpq - stp).abs() {
                stpc
            } else {
                stpq
            };
            stpf = stpmin.max(stpmax.min(s));
        }
    } else if iv.brackt {
        // Same sign, non-decreasing magnitude, bracketed.
        let theta = 3.0 * (fp - fy) / (sty - stp) + dy + dp;
        let s = theta.abs().max(dy.abs()).max(dp.abs());
        let mut gamma = s * ((theta / s).powi(2) - (dy / s) * (dp / s)).sqrt();
        if stp > sty {
            gamma = -gamma;
        }
        let p = (gamma - dp) + theta;
        let q = ((gamma - dp) + gamma) + dy;
        let r = p / q;
        stpf = stp + r * (sty - stp);
    } else if stp > stx {
        stpf = stpmax;
    } else {
        stpf = stpmin;
    }

    if fp > fx {
        iv.sty = stp;
        iv.fy = fp;
        iv.gy = dp;
    } else {
        if sgnd < 0.0 {
            iv.sty = stx;
            iv.fy = fx;
            iv.gy = dx;
        }
        iv.stx = stp;
        iv.fx = fp;
        iv.gx = dp;
    }
    stpf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(f: impl Fn(f64) -> (f64, f64), stp0: f64, ftol: f64, gtol: f64) -> (f64, Task, usize) {
        let mut search = Dcsrch::new(ftol, gtol, 1e-14, 0.0, 1e10);
        let (f0, g0) = f(0.0);
        let mut stp = stp0;
        let mut task = search.start(stp, f0, g0);
        let mut evals = 0;
        while task.is_fg() && evals < 100 {
            let (fv, gv) = f(stp);
            evals += 1;
            task = search.iterate(&mut stp, fv, gv);
        }
        (stp, task, evals)
    }

    #[test]
    fn test_quadratic_converges() {
        // phi(a) = (a - 3)^2, phi'(0) = -6
        let phi = |a: f64| ((a - 3.0).powi(2), 2.0 * (a - 3.0));
        let (stp, task, _) = run(phi, 1.0, 1e-4, 0.1);
        assert_eq!(task, Task::Convergence);
        assert!((2.0 * (stp - 3.0)).abs() <= 0.1 * 6.0);
        assert!((stp - 3.0).powi(2) <= 9.0 + 1e-4 * stp * -6.0);
    }

    #[test]
    fn test_first_extrapolation_is_five_times_step() {
        // Linear decrease keeps extrapolating: second trial is stp + 4 * stp.
        let mut search = Dcsrch::new(1e-4, 0.9, 1e-14, 0.0, 1e10);
        let mut stp = 1.0;
        assert!(search.start(stp, 0.0, -1.0).is_fg());
        let task = search.iterate(&mut stp, -1.0, -1.0);
        assert!(task.is_fg());
        assert_eq!(stp, 5.0);
    }

    #[test]
    fn test_ascent_direction_rejected() {
        let mut search = Dcsrch::new(1e-4, 0.9, 1e-14, 0.0, 1e10);
        assert_eq!(
            search.start(1.0, 0.0, 1.0),
            Task::Error(SearchError::AscentDirection)
        );
    }

    #[test]
    fn test_step_limit_warning() {
        // Strictly decreasing objective capped at stpmax = 2.
        let mut search = Dcsrch::new(1e-4, 0.9, 1e-14, 0.0, 2.0);
        let mut stp = 1.0;
        let mut task = search.start(stp, 0.0, -1.0);
        let mut evals = 0;
        while task.is_fg() && evals < 20 {
            let f = -stp;
            task = search.iterate(&mut stp, f, -1.0);
            evals += 1;
        }
        assert_eq!(task, Task::Warning(SearchWarning::StpMax));
        assert_eq!(stp, 2.0);
    }
}
