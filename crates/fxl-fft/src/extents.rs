use std::fmt::{Display, Formatter};
use std::ops::Index;

use serde::{Deserialize, Serialize};

use crate::error::{FftError, FftResult};

/// Per-dimension sizes of an operand.
///
/// Ordering is fixed across the whole crate: slowest-varying dimension first,
/// the last dimension is the fastest-varying (row-major). Backends that expect
/// the opposite order get a reversed copy when their plan request is built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct Extents(Vec<usize>);

impl Extents {
    /// Validate and wrap `dims`. Rank must be at least one and every entry positive.
    pub fn new(dims: impl Into<Vec<usize>>) -> FftResult<Self> {
        let dims = dims.into();
        if dims.is_empty() {
            return Err(FftError::InvalidRank {
                rank: 0,
                max: usize::MAX,
            });
        }
        if let Some(dim) = dims.iter().position(|&extent| extent == 0) {
            return Err(FftError::ZeroExtent { dim });
        }
        Ok(Self(dims))
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Extent of the fastest-varying dimension.
    #[must_use]
    pub fn last(&self) -> usize {
        self.0[self.0.len() - 1]
    }

    /// Product of all extents. Unchecked; validate against a size ceiling first.
    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.0.iter().product()
    }

    #[must_use]
    pub fn checked_num_elements(&self) -> Option<usize> {
        self.0
            .iter()
            .try_fold(1usize, |acc, &next| acc.checked_mul(next))
    }

    /// Number of rows, i.e. the product of every dimension except the last.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.0[..self.0.len() - 1].iter().product()
    }

    /// The packed (Hermitian half-spectrum) shape: last dimension becomes `n/2 + 1`.
    #[must_use]
    pub fn packed(&self) -> Self {
        self.with_last(self.last() / 2 + 1)
    }

    #[must_use]
    pub fn with_last(&self, last: usize) -> Self {
        let mut dims = self.0.clone();
        let idx = dims.len() - 1;
        dims[idx] = last.max(1);
        Self(dims)
    }

    /// Copy in fastest-varying-first order, for backends that expect it.
    #[must_use]
    pub fn reversed(&self) -> Vec<usize> {
        self.0.iter().rev().copied().collect()
    }

    /// Row-major iterator over every index in these extents.
    #[must_use]
    pub fn indices(&self) -> IndexIter<'_> {
        IndexIter {
            extents: &self.0,
            next: Some(vec![0; self.0.len()]),
        }
    }
}

impl Index<usize> for Extents {
    type Output = usize;

    fn index(&self, dim: usize) -> &usize {
        &self.0[dim]
    }
}

impl TryFrom<Vec<usize>> for Extents {
    type Error = FftError;

    fn try_from(dims: Vec<usize>) -> FftResult<Self> {
        Self::new(dims)
    }
}

impl From<Extents> for Vec<usize> {
    fn from(extents: Extents) -> Self {
        extents.0
    }
}

impl Display for Extents {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, extent) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{extent}")?;
        }
        write!(f, ")")
    }
}

/// Odometer over an extents range, last dimension fastest.
#[derive(Debug, Clone)]
pub struct IndexIter<'a> {
    extents: &'a [usize],
    next: Option<Vec<usize>>,
}

impl Iterator for IndexIter<'_> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let current = self.next.take()?;
        let mut advanced = current.clone();
        for dim in (0..self.extents.len()).rev() {
            advanced[dim] += 1;
            if advanced[dim] < self.extents[dim] {
                self.next = Some(advanced);
                return Some(current);
            }
            advanced[dim] = 0;
        }
        Some(current)
    }
}
