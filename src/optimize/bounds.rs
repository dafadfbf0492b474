//! Box bounds for bound-constrained minimizers.

use ndarray::{Array1, ArrayView1, Zip};

use super::error::{OptimizeError, OptimizeResult};

/// Per-variable box bounds `lower[i] <= x[i] <= upper[i]`.
///
/// A missing side is stored as the corresponding infinity. Construction
/// validates feasibility, so a `Bounds` value always satisfies
/// `lower <= upper` with no NaN entries.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bounds {
    lower: Array1<f64>,
    upper: Array1<f64>,
}

impl Bounds {
    /// Build bounds from optional `(lower, upper)` pairs.
    ///
    /// # Errors
    /// * `InfeasibleBounds` if any pair has lower > upper or a NaN side
    pub fn new<I>(pairs: I) -> OptimizeResult<Self>
    where
        I: IntoIterator<Item = (Option<f64>, Option<f64>)>,
    {
        let (lower, upper): (Vec<f64>, Vec<f64>) = pairs
            .into_iter()
            .map(|(l, u)| (l.unwrap_or(f64::NEG_INFINITY), u.unwrap_or(f64::INFINITY)))
            .unzip();
        Self::from_arrays(Array1::from(lower), Array1::from(upper))
    }

    /// Build bounds from explicit lower and upper arrays (use infinities for
    /// unbounded sides).
    ///
    /// # Errors
    /// * `DimensionMismatch` if the arrays differ in length
    /// * `InfeasibleBounds` if any pair has lower > upper or a NaN side
    pub fn from_arrays(lower: Array1<f64>, upper: Array1<f64>) -> OptimizeResult<Self> {
        if lower.len() != upper.len() {
            return Err(OptimizeError::dimension_mismatch(
                "bounds",
                lower.len(),
                upper.len(),
            ));
        }
        for (index, (&l, &u)) in lower.iter().zip(upper.iter()).enumerate() {
            if l.is_nan() || u.is_nan() || l > u {
                return Err(OptimizeError::InfeasibleBounds {
                    index,
                    lower: l,
                    upper: u,
                });
            }
        }
        Ok(Self { lower, upper })
    }

    /// Bounds with no constraint on any of `n` variables.
    pub fn unbounded(n: usize) -> Self {
        Self {
            lower: Array1::from_elem(n, f64::NEG_INFINITY),
            upper: Array1::from_elem(n, f64::INFINITY),
        }
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.lower.len()
    }

    /// Whether there are zero variables.
    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn lower(&self) -> ArrayView1<'_, f64> {
        self.lower.view()
    }

    pub fn upper(&self) -> ArrayView1<'_, f64> {
        self.upper.view()
    }

    /// Whether variable `i` has at least one finite bound.
    pub fn is_bounded(&self, i: usize) -> bool {
        self.lower[i].is_finite() || self.upper[i].is_finite()
    }

    /// Clip `x` into the box.
    pub fn project(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        Zip::from(x)
            .and(&self.lower)
            .and(&self.upper)
            .map_collect(|&xi, &l, &u| xi.max(l).min(u))
    }

    /// Whether every component of `x` lies inside the box.
    pub fn contains(&self, x: ArrayView1<'_, f64>) -> bool {
        x.iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .all(|(&xi, (&l, &u))| xi >= l && xi <= u)
    }

    /// Check that the bounds match a problem of dimension `n`.
    pub(crate) fn check_len(&self, n: usize) -> OptimizeResult<()> {
        if self.len() != n {
            return Err(OptimizeError::dimension_mismatch("bounds", n, self.len()));
        }
        Ok(())
    }
}
