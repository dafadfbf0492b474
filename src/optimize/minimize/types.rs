//! Options, status and result types shared by the multivariate minimizers.

use ndarray::{Array1, Array2, ArrayView1};
use tracing::{debug, info};

use crate::optimize::bounded::TncStatus;
use crate::optimize::error::{OptimizeError, OptimizeResult};
use crate::optimize::utils::{norm, norm_inf, norm_l1};

/// Termination status of a minimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Status {
    Success,
    MaxIterations,
    MaxEvaluations,
    /// Progress stopped because of rounding errors or a non-finite value.
    PrecisionLoss,
    LineSearchFailure,
}

impl Status {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::Success => "Optimization terminated successfully.",
            Self::MaxIterations => "Maximum number of iterations has been exceeded.",
            Self::MaxEvaluations => "Maximum number of function evaluations has been exceeded.",
            Self::PrecisionLoss => "Desired error not necessarily achieved due to precision loss.",
            Self::LineSearchFailure => "Line search failed to find an acceptable step.",
        }
    }
}

/// Vector norm used by gradient convergence tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Norm {
    L1,
    L2,
    #[default]
    Inf,
}

impl Norm {
    pub fn apply(self, v: ArrayView1<'_, f64>) -> f64 {
        match self {
            Self::L1 => norm_l1(v),
            Self::L2 => norm(v),
            Self::Inf => norm_inf(v),
        }
    }
}

/// Convergence criteria shared by all multivariate minimizers.
///
/// Every criterion is optional; `None` selects the method's default.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MinimizeOptions {
    /// Maximum number of outer iterations
    pub max_iter: Option<usize>,
    /// Maximum number of objective evaluations
    pub max_fev: Option<usize>,
    /// Smallest meaningful change in x
    pub x_tol: Option<f64>,
    /// Smallest meaningful change in the objective
    pub f_tol: Option<f64>,
    /// Gradient norm below which a point is accepted
    pub g_tol: Option<f64>,
    /// Log per-iteration progress and the termination summary at `info` level
    pub verbose: bool,
    /// Keep every iterate in [`MultiMinimizeResult::all_iterates`]
    pub return_all: bool,
}

impl MinimizeOptions {
    /// Reject negative or NaN tolerances.
    pub(crate) fn validate(&self) -> OptimizeResult<()> {
        for (name, value) in [
            ("x_tol", self.x_tol),
            ("f_tol", self.f_tol),
            ("g_tol", self.g_tol),
        ] {
            if let Some(v) = value {
                if v.is_nan() || v < 0.0 {
                    return Err(OptimizeError::invalid_parameter(
                        name,
                        format!("must be non-negative, got {v}"),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Outputs that only some methods produce.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MethodExtras {
    #[default]
    None,
    /// Final inverse Hessian approximation.
    Bfgs { inverse_hessian: Array2<f64> },
    /// Final direction set, one direction per row.
    Powell { directions: Array2<f64> },
    /// Final simplex (one vertex per row) and its objective values.
    NelderMead {
        simplex: Array2<f64>,
        values: Array1<f64>,
    },
    /// Variables held at a bound at the final point.
    LBfgsB { active: Vec<bool> },
    /// Detailed TNC return code.
    Tnc { status: TncStatus },
}

/// Result of a multivariate minimization.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MultiMinimizeResult {
    /// Final point.
    pub x: Array1<f64>,
    /// Objective value at `x`.
    pub fun: f64,
    /// Gradient at `x` for gradient-based methods.
    pub jac: Option<Array1<f64>>,
    /// Number of iterations.
    pub iterations: usize,
    /// Number of objective evaluations.
    pub nfev: usize,
    /// Number of gradient evaluations.
    pub ngev: usize,
    /// Number of Hessian or Hessian-vector product evaluations.
    pub nhev: usize,
    pub status: Status,
    pub extras: MethodExtras,
    /// Every iterate, when requested with `return_all`.
    pub all_iterates: Option<Vec<Array1<f64>>>,
}

impl MultiMinimizeResult {
    pub fn success(&self) -> bool {
        self.status.is_success()
    }

    pub fn message(&self) -> &'static str {
        match &self.extras {
            MethodExtras::Tnc { status } => status.message(),
            _ => self.status.message(),
        }
    }
}

/// Iterate history kept when `return_all` is set.
#[derive(Debug, Default)]
pub(crate) struct History(Option<Vec<Array1<f64>>>);

impl History {
    pub fn new(enabled: bool, x0: &Array1<f64>) -> Self {
        Self(enabled.then(|| vec![x0.clone()]))
    }

    pub fn push(&mut self, x: &Array1<f64>) {
        if let Some(all) = &mut self.0 {
            all.push(x.clone());
        }
    }

    pub fn into_inner(self) -> Option<Vec<Array1<f64>>> {
        self.0
    }
}

/// Emit the termination summary of a run.
pub(crate) fn log_termination(method: &str, result: &MultiMinimizeResult, verbose: bool) {
    if verbose {
        info!(
            method,
            status = ?result.status,
            fun = result.fun,
            iterations = result.iterations,
            nfev = result.nfev,
            ngev = result.ngev,
            "{}",
            result.message()
        );
    } else {
        debug!(
            method,
            status = ?result.status,
            fun = result.fun,
            iterations = result.iterations,
            nfev = result.nfev,
            ngev = result.ngev,
            "{}",
            result.message()
        );
    }
}

/// Emit per-iteration progress.
pub(crate) fn log_iteration(method: &str, iteration: usize, fun: f64, verbose: bool) {
    if verbose {
        info!(method, iteration, fun, "iteration");
    } else {
        debug!(method, iteration, fun, "iteration");
    }
}

/// Check that `x0` is non-empty.
pub(crate) fn check_x0(method: &str, x0: &Array1<f64>) -> OptimizeResult<()> {
    if x0.is_empty() {
        return Err(OptimizeError::InvalidInput {
            context: format!("{method}: empty initial guess"),
        });
    }
    Ok(())
}
