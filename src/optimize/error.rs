//! Error types for optimization operations.

use thiserror::Error;

/// Error type returned by user callbacks.
///
/// Any error raised by an objective, gradient or Hessian callback is boxed
/// into this type and carried unmodified as the `source` of
/// [`OptimizeError::Callback`].
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for optimization operations.
pub type OptimizeResult<T> = Result<T, OptimizeError>;

/// Errors that abort an optimization run.
///
/// Budget exhaustion, precision loss and line-search failure are not errors:
/// they are reported through the status of the returned result.
#[derive(Debug, Error)]
pub enum OptimizeError {
    /// A bracket search did not converge within its iteration cap.
    #[error("{context}: did not converge after {iterations} iterations (tolerance: {tolerance})")]
    DidNotConverge {
        iterations: usize,
        tolerance: f64,
        context: String,
    },

    /// Invalid interval provided (lower endpoint above upper endpoint).
    #[error("invalid interval [{a}, {b}] in {context}: bounds must satisfy lower <= upper")]
    InvalidInterval { a: f64, b: f64, context: String },

    /// A supplied bracket triplet does not enclose a minimum.
    #[error("invalid bracket in {context}")]
    InvalidBracket { context: String },

    /// Box bound with lower > upper, or a NaN bound.
    #[error("infeasible bounds for variable {index}: lower {lower} > upper {upper}")]
    InfeasibleBounds { index: usize, lower: f64, upper: f64 },

    /// Lengths of the point, gradient, bounds or simplex disagree.
    #[error("dimension mismatch in {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    /// Invalid parameter value.
    #[error("invalid parameter '{parameter}': {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Invalid input array size or content.
    #[error("invalid input in {context}")]
    InvalidInput { context: String },

    /// A user callback returned an error; the run was aborted.
    #[error("user callback failed")]
    Callback(#[source] CallbackError),
}

impl OptimizeError {
    pub(crate) fn invalid_parameter(parameter: &str, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn dimension_mismatch(context: &str, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            context: context.to_string(),
            expected,
            found,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_callback_error_keeps_source() {
        let inner: CallbackError = "boom".into();
        let err = OptimizeError::Callback(inner);
        let source = err.source().expect("callback error has a source");
        assert_eq!(source.to_string(), "boom");
    }

    #[test]
    fn test_display_messages() {
        let err = OptimizeError::InfeasibleBounds {
            index: 2,
            lower: 3.0,
            upper: 1.0,
        };
        assert_eq!(
            err.to_string(),
            "infeasible bounds for variable 2: lower 3 > upper 1"
        );

        let err = OptimizeError::dimension_mismatch("bounds", 3, 2);
        assert_eq!(
            err.to_string(),
            "dimension mismatch in bounds: expected 3, found 2"
        );
    }
}
