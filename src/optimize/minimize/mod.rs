//! Multivariate minimization.
//!
//! This module provides the unconstrained algorithms, the shared option and
//! result types, and [`minimize`], which dispatches over every method
//! including the bound-constrained ones.

mod bfgs;
mod conjugate_gradient;
mod nelder_mead;
mod newton_cg;
mod powell;
mod types;

pub use bfgs::{BfgsOptions, bfgs};
pub use conjugate_gradient::{CgOptions, conjugate_gradient};
pub use nelder_mead::{NelderMeadOptions, nelder_mead};
pub use newton_cg::{NewtonCgOptions, newton_cg};
pub use powell::{PowellOptions, powell};
pub use types::{MethodExtras, MinimizeOptions, MultiMinimizeResult, Norm, Status};
pub(crate) use types::{History, check_x0, log_iteration, log_termination};

use ndarray::Array1;

use crate::optimize::bounded::{LbfgsbOptions, TncOptions, lbfgsb, tnc};
use crate::optimize::error::OptimizeResult;
use crate::optimize::problem::Problem;

/// Minimization method together with its options.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Method {
    NelderMead(NelderMeadOptions),
    Powell(PowellOptions),
    ConjugateGradient(CgOptions),
    Bfgs(BfgsOptions),
    NewtonCg(NewtonCgOptions),
    LBfgsB(LbfgsbOptions),
    Tnc(TncOptions),
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NelderMead(_) => "nelder_mead",
            Self::Powell(_) => "powell",
            Self::ConjugateGradient(_) => "conjugate_gradient",
            Self::Bfgs(_) => "bfgs",
            Self::NewtonCg(_) => "newton_cg",
            Self::LBfgsB(_) => "lbfgsb",
            Self::Tnc(_) => "tnc",
        }
    }
}

/// Minimize `problem` from `x0` with the chosen method.
///
/// # Errors
/// Whatever the selected method returns.
pub fn minimize(
    problem: &Problem<'_>,
    x0: &Array1<f64>,
    method: &Method,
) -> OptimizeResult<MultiMinimizeResult> {
    tracing::debug!(method = method.name(), n = x0.len(), "minimize");
    match method {
        Method::NelderMead(opts) => nelder_mead(problem, x0, opts),
        Method::Powell(opts) => powell(problem, x0, opts),
        Method::ConjugateGradient(opts) => conjugate_gradient(problem, x0, opts),
        Method::Bfgs(opts) => bfgs(problem, x0, opts),
        Method::NewtonCg(opts) => newton_cg(problem, x0, opts),
        Method::LBfgsB(opts) => lbfgsb(problem, x0, opts),
        Method::Tnc(opts) => tnc(problem, x0, opts),
    }
}
