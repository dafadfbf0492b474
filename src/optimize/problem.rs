//! Problem definition: objective, optional derivatives and optional bounds.

use ndarray::{Array1, Array2, ArrayView1};

use super::bounds::Bounds;
use super::error::CallbackError;
use super::utils::EPS;

/// Conversion from a callback's return value into a fallible result.
///
/// Implemented for plain values (infallible callbacks) and for
/// `Result<_, E>` where `E` converts into a boxed error (fallible callbacks),
/// so both `|x| x.sum()` and `|x| -> Result<f64, MyError> { ... }` can be
/// used as objectives.
pub trait CallbackOutput<T> {
    fn into_callback_result(self) -> Result<T, CallbackError>;
}

macro_rules! impl_callback_output {
    ($($t:ty),*) => {
        $(
            impl CallbackOutput<$t> for $t {
                #[inline]
                fn into_callback_result(self) -> Result<$t, CallbackError> {
                    Ok(self)
                }
            }

            impl<E> CallbackOutput<$t> for Result<$t, E>
            where
                E: Into<CallbackError>,
            {
                #[inline]
                fn into_callback_result(self) -> Result<$t, CallbackError> {
                    self.map_err(Into::into)
                }
            }
        )*
    };
}

impl_callback_output!(f64, Array1<f64>, Array2<f64>);

pub type ObjectiveFn<'a> =
    Box<dyn Fn(ArrayView1<'_, f64>) -> Result<f64, CallbackError> + 'a>;
pub type GradientFn<'a> =
    Box<dyn Fn(ArrayView1<'_, f64>) -> Result<Array1<f64>, CallbackError> + 'a>;
pub type HessianFn<'a> =
    Box<dyn Fn(ArrayView1<'_, f64>) -> Result<Array2<f64>, CallbackError> + 'a>;
pub type HessianProductFn<'a> = Box<
    dyn Fn(ArrayView1<'_, f64>, ArrayView1<'_, f64>) -> Result<Array1<f64>, CallbackError> + 'a,
>;

/// Derivative information supplied with an objective.
///
/// Second-order information always comes with a gradient, and an explicit
/// Hessian and a Hessian-vector product are mutually exclusive.
#[derive(Default)]
pub enum Derivatives<'a> {
    /// Gradients are approximated by forward differences.
    #[default]
    None,
    /// Analytic gradient.
    Gradient(GradientFn<'a>),
    /// Analytic gradient and dense Hessian.
    Hessian(GradientFn<'a>, HessianFn<'a>),
    /// Analytic gradient and Hessian-vector product.
    HessianProduct(GradientFn<'a>, HessianProductFn<'a>),
}

impl<'a> Derivatives<'a> {
    pub(crate) fn gradient(&self) -> Option<&GradientFn<'a>> {
        match self {
            Self::None => None,
            Self::Gradient(g) | Self::Hessian(g, _) | Self::HessianProduct(g, _) => Some(g),
        }
    }
}

impl std::fmt::Debug for Derivatives<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::Gradient(_) => "Gradient",
            Self::Hessian(..) => "Hessian",
            Self::HessianProduct(..) => "HessianProduct",
        };
        f.write_str(name)
    }
}

/// Step used by forward-difference gradients.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FiniteDiffStep {
    /// Same absolute step for every component.
    Scalar(f64),
    /// One absolute step per component.
    PerComponent(Array1<f64>),
}

impl Default for FiniteDiffStep {
    fn default() -> Self {
        Self::Scalar(EPS.sqrt())
    }
}

impl FiniteDiffStep {
    #[inline]
    pub(crate) fn get(&self, i: usize) -> f64 {
        match self {
            Self::Scalar(h) => *h,
            Self::PerComponent(h) => h[i],
        }
    }
}

/// A minimization problem.
///
/// ```
/// use localmin::optimize::Problem;
/// use ndarray::ArrayView1;
///
/// let problem = Problem::new(|x: ArrayView1<f64>| x.dot(&x))
///     .with_gradient(|x: ArrayView1<f64>| x.mapv(|v| 2.0 * v));
/// assert!(problem.has_gradient());
/// ```
pub struct Problem<'a> {
    pub(crate) objective: ObjectiveFn<'a>,
    pub(crate) derivatives: Derivatives<'a>,
    pub(crate) bounds: Option<Bounds>,
    pub(crate) fd_step: FiniteDiffStep,
}

impl<'a> Problem<'a> {
    /// Create a problem from an objective with no derivative information.
    pub fn new<F, R>(objective: F) -> Self
    where
        F: Fn(ArrayView1<'_, f64>) -> R + 'a,
        R: CallbackOutput<f64>,
    {
        Self {
            objective: Box::new(move |x| objective(x).into_callback_result()),
            derivatives: Derivatives::None,
            bounds: None,
            fd_step: FiniteDiffStep::default(),
        }
    }

    /// Attach an analytic gradient. Replaces any previously attached derivatives.
    pub fn with_gradient<G, R>(mut self, gradient: G) -> Self
    where
        G: Fn(ArrayView1<'_, f64>) -> R + 'a,
        R: CallbackOutput<Array1<f64>>,
    {
        self.derivatives = Derivatives::Gradient(boxed_gradient(gradient));
        self
    }

    /// Attach an analytic gradient and dense Hessian.
    pub fn with_hessian<G, RG, H, RH>(mut self, gradient: G, hessian: H) -> Self
    where
        G: Fn(ArrayView1<'_, f64>) -> RG + 'a,
        RG: CallbackOutput<Array1<f64>>,
        H: Fn(ArrayView1<'_, f64>) -> RH + 'a,
        RH: CallbackOutput<Array2<f64>>,
    {
        self.derivatives = Derivatives::Hessian(
            boxed_gradient(gradient),
            Box::new(move |x| hessian(x).into_callback_result()),
        );
        self
    }

    /// Attach an analytic gradient and a Hessian-vector product `(x, p) -> H(x) p`.
    pub fn with_hessian_product<G, RG, P, RP>(mut self, gradient: G, hessp: P) -> Self
    where
        G: Fn(ArrayView1<'_, f64>) -> RG + 'a,
        RG: CallbackOutput<Array1<f64>>,
        P: Fn(ArrayView1<'_, f64>, ArrayView1<'_, f64>) -> RP + 'a,
        RP: CallbackOutput<Array1<f64>>,
    {
        self.derivatives = Derivatives::HessianProduct(
            boxed_gradient(gradient),
            Box::new(move |x, p| hessp(x, p).into_callback_result()),
        );
        self
    }

    /// Replace the derivative information wholesale.
    pub fn with_derivatives(mut self, derivatives: Derivatives<'a>) -> Self {
        self.derivatives = derivatives;
        self
    }

    /// Attach box bounds. Only the bound-constrained methods honor them.
    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// Set the forward-difference step used when no gradient is attached.
    pub fn with_finite_diff_step(mut self, step: FiniteDiffStep) -> Self {
        self.fd_step = step;
        self
    }

    pub fn has_gradient(&self) -> bool {
        self.derivatives.gradient().is_some()
    }

    pub fn derivatives(&self) -> &Derivatives<'a> {
        &self.derivatives
    }

    pub fn bounds(&self) -> Option<&Bounds> {
        self.bounds.as_ref()
    }
}

impl std::fmt::Debug for Problem<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Problem")
            .field("derivatives", &self.derivatives)
            .field("bounds", &self.bounds)
            .field("fd_step", &self.fd_step)
            .finish_non_exhaustive()
    }
}

fn boxed_gradient<'a, G, R>(gradient: G) -> GradientFn<'a>
where
    G: Fn(ArrayView1<'_, f64>) -> R + 'a,
    R: CallbackOutput<Array1<f64>>,
{
    Box::new(move |x| gradient(x).into_callback_result())
}

