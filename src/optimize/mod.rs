//! Local minimization of smooth functions.
//!
//! # Modules
//!
//! - [`minimize`] - Multivariate minimizers and the [`minimize()`](minimize::minimize) dispatcher
//! - [`bounded`] - Bound-constrained L-BFGS-B and TNC
//! - [`scalar`] - Univariate minimization and bracketing
//! - [`line_search`] - Strong Wolfe line searches shared by the gradient methods
//!
//! # Quick Start
//!
//! ## Unconstrained
//!
//! ```
//! use localmin::optimize::minimize::{BfgsOptions, bfgs};
//! use localmin::optimize::test_functions::{rosen, rosen_der};
//! use localmin::optimize::Problem;
//! use ndarray::array;
//!
//! let problem = Problem::new(rosen).with_gradient(rosen_der);
//! let result = bfgs(&problem, &array![-1.2, 1.0], &BfgsOptions::default())?;
//! assert!(result.success());
//! assert!((result.x[0] - 1.0).abs() < 1e-4);
//! # Ok::<(), localmin::optimize::OptimizeError>(())
//! ```
//!
//! ## With bounds
//!
//! ```
//! use localmin::optimize::bounded::{LbfgsbOptions, lbfgsb};
//! use localmin::optimize::test_functions::{rosen, rosen_der};
//! use localmin::optimize::{Bounds, Problem};
//! use ndarray::array;
//!
//! let bounds = Bounds::new([(None, Some(0.5)), (None, Some(0.5))])?;
//! let problem = Problem::new(rosen).with_gradient(rosen_der).with_bounds(bounds);
//! let result = lbfgsb(&problem, &array![0.0, 0.0], &LbfgsbOptions::default())?;
//! assert!((result.x[0] - 0.5).abs() < 1e-4);
//! # Ok::<(), localmin::optimize::OptimizeError>(())
//! ```
//!
//! ## Scalar
//!
//! ```
//! use localmin::optimize::scalar::{Bracket, ScalarOptions, minimize_scalar_brent};
//!
//! let result = minimize_scalar_brent(
//!     |x: f64| (x - 2.0).powi(2),
//!     Bracket::Auto,
//!     &ScalarOptions::default(),
//! )?;
//! assert!((result.x - 2.0).abs() < 1e-6);
//! # Ok::<(), localmin::optimize::OptimizeError>(())
//! ```

pub mod bounded;
mod bounds;
pub mod error;
mod evaluator;
pub mod line_search;
pub mod minimize;
mod problem;
pub mod scalar;
pub mod test_functions;
pub(crate) mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use bounded::{LbfgsbOptions, TncOptions, TncStatus, lbfgsb, tnc, tnc_with_callback};
pub use bounds::Bounds;
pub use error::{CallbackError, OptimizeError, OptimizeResult};
pub use evaluator::FunctionEvaluator;
pub use minimize::{
    BfgsOptions, CgOptions, Method, MethodExtras, MinimizeOptions, MultiMinimizeResult,
    NelderMeadOptions, NewtonCgOptions, Norm, PowellOptions, Status, bfgs, conjugate_gradient,
    minimize, nelder_mead, newton_cg, powell,
};
pub use problem::{CallbackOutput, Derivatives, FiniteDiffStep, Problem};
pub use scalar::{
    BoundValue, Bracket, BracketResult, MinimizeResult, ScalarMethod, ScalarOptions, bracket, minimize_scalar,
    minimize_scalar_bounded, minimize_scalar_brent, minimize_scalar_golden,
};
