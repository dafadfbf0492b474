//! Scalar (1D) minimization.
//!
//! Brent and golden-section search work on a bracket `xa < xb < xc` with
//! `f(xb) < f(xa), f(xc)`, found automatically from two starting points when
//! not given. The bounded method searches a closed interval instead.

mod bracket;
mod minimization;

pub use bracket::{BracketResult, bracket};
pub use minimization::{minimize_scalar_bounded, minimize_scalar_brent, minimize_scalar_golden};
pub(crate) use minimization::brent_core;

use ndarray::Array1;

use crate::optimize::error::{OptimizeError, OptimizeResult};
use crate::optimize::minimize::Status;
use crate::optimize::problem::CallbackOutput;

/// Options for scalar minimization.
///
/// `None` selects the method's default: Brent uses a relative tolerance of
/// 1.48e-8 and 500 iterations, golden-section √ε and 5000 iterations, the
/// bounded method an absolute tolerance of 1e-5 and 500 evaluations.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScalarOptions {
    /// Maximum number of iterations (evaluations for the bounded method)
    pub max_iter: Option<usize>,
    /// Convergence tolerance on x
    pub tol: Option<f64>,
}

impl ScalarOptions {
    fn tol_or(&self, default: f64) -> OptimizeResult<f64> {
        let tol = self.tol.unwrap_or(default);
        if tol.is_nan() || tol < 0.0 {
            return Err(OptimizeError::invalid_parameter(
                "tol",
                format!("must be non-negative, got {tol}"),
            ));
        }
        Ok(tol)
    }
}

/// Result from a scalar minimization method.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MinimizeResult {
    /// The minimum point found
    pub x: f64,
    /// Function value at minimum
    pub f_min: f64,
    /// Number of iterations used
    pub iterations: usize,
    /// Number of function evaluations, bracketing included
    pub nfev: usize,
    pub status: Status,
}

/// Starting information for the bracketing methods.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Bracket {
    /// Search for a bracket starting from 0 and 1.
    #[default]
    Auto,
    /// Search for a bracket starting from two points.
    Pair(f64, f64),
    /// A ready bracket `(xa, xb, xc)`; `xa` and `xc` may be given in either order.
    Triple(f64, f64, f64),
}

/// An endpoint of a bounded search interval.
///
/// Accepts a scalar or a one-element array; any other length is rejected
/// when the search starts.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundValue(Vec<f64>);

impl BoundValue {
    pub(crate) fn scalar(&self, name: &str) -> OptimizeResult<f64> {
        match self.0.as_slice() {
            [v] => Ok(*v),
            other => Err(OptimizeError::InvalidInput {
                context: format!(
                    "minimize_scalar_bounded: {name} bound must be a scalar, got {} elements",
                    other.len()
                ),
            }),
        }
    }
}

impl From<f64> for BoundValue {
    fn from(v: f64) -> Self {
        Self(vec![v])
    }
}

impl From<&[f64]> for BoundValue {
    fn from(v: &[f64]) -> Self {
        Self(v.to_vec())
    }
}

impl<const N: usize> From<[f64; N]> for BoundValue {
    fn from(v: [f64; N]) -> Self {
        Self(v.to_vec())
    }
}

impl From<Vec<f64>> for BoundValue {
    fn from(v: Vec<f64>) -> Self {
        Self(v)
    }
}

impl From<Array1<f64>> for BoundValue {
    fn from(v: Array1<f64>) -> Self {
        Self(v.to_vec())
    }
}

/// Scalar minimization method with its inputs.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarMethod {
    Brent(Bracket),
    Golden(Bracket),
    Bounded { lower: f64, upper: f64 },
}

/// Minimize a scalar function with the chosen method.
///
/// # Errors
/// See [`minimize_scalar_brent`], [`minimize_scalar_golden`] and
/// [`minimize_scalar_bounded`].
pub fn minimize_scalar<F, R>(
    f: F,
    method: &ScalarMethod,
    options: &ScalarOptions,
) -> OptimizeResult<MinimizeResult>
where
    F: FnMut(f64) -> R,
    R: CallbackOutput<f64>,
{
    match method {
        ScalarMethod::Brent(b) => minimize_scalar_brent(f, *b, options),
        ScalarMethod::Golden(b) => minimize_scalar_golden(f, *b, options),
        ScalarMethod::Bounded { lower, upper } => {
            minimize_scalar_bounded(f, *lower, *upper, options)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn fun(x: f64) -> f64 {
        (x - 1.5).powi(2) - 0.8
    }

    #[test]
    fn test_bound_value_lengths() {
        assert_eq!(BoundValue::from(2.0).scalar("lower").expect("scalar"), 2.0);
        assert_eq!(
            BoundValue::from(vec![3.0]).scalar("lower").expect("one element"),
            3.0
        );
        assert!(BoundValue::from([0.0, 0.0]).scalar("lower").is_err());
        assert!(BoundValue::from(Vec::new()).scalar("upper").is_err());
    }

    #[test]
    fn test_dispatch() {
        let opts = ScalarOptions::default();
        for method in [
            ScalarMethod::Brent(Bracket::Auto),
            ScalarMethod::Golden(Bracket::Pair(-3.0, -2.0)),
            ScalarMethod::Bounded {
                lower: 1.0,
                upper: 5.0,
            },
        ] {
            let res = minimize_scalar(fun, &method, &opts).expect("minimization");
            assert_abs_diff_eq!(res.x, 1.5, epsilon = 1e-6);
            assert!(res.status.is_success());
        }
    }
}
