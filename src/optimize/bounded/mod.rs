//! Bound-constrained minimization.
//!
//! Both methods accept a [`Problem`](crate::optimize::Problem) with or
//! without [`Bounds`](crate::optimize::Bounds) and clip the initial guess
//! into the box. Without bounds they behave as unconstrained quasi-Newton
//! and truncated Newton methods.

mod lbfgsb;
mod tnc;

pub use lbfgsb::{LbfgsbOptions, lbfgsb};
pub use tnc::{TncOptions, TncStatus, tnc, tnc_with_callback};
