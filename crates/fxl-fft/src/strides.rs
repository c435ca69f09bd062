use serde::{Deserialize, Serialize};

use crate::error::{FftError, FftResult};
use crate::extents::Extents;

/// Per-dimension element strides, slowest dimension first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Strides(Vec<usize>);

impl Strides {
    /// Row-major strides: `strides[last] == 1`, `strides[i-1] = strides[i] * extents[i]`.
    #[must_use]
    pub fn contiguous(extents: &Extents) -> Self {
        Self::with_row_length(extents, extents.last())
    }

    /// Strides of a buffer whose last dimension occupies `row_len` elements
    /// even though only `extents.last()` of them are meaningful.
    #[must_use]
    pub fn padded(extents: &Extents, row_len: usize) -> Self {
        Self::with_row_length(extents, row_len.max(extents.last()))
    }

    fn with_row_length(extents: &Extents, row_len: usize) -> Self {
        let rank = extents.rank();
        let mut strides = vec![1usize; rank];
        if rank > 1 {
            strides[rank - 2] = row_len;
            for dim in (0..rank - 2).rev() {
                strides[dim] = strides[dim + 1].saturating_mul(extents[dim + 1]);
            }
        }
        Self(strides)
    }

    /// Caller-supplied strides. Only the rank is checked here; overlap is
    /// checked separately by [`Strides::validate_non_overlapping`].
    pub fn from_user(values: impl Into<Vec<usize>>, extents: &Extents) -> FftResult<Self> {
        let values = values.into();
        if values.len() != extents.rank() {
            return Err(FftError::RankMismatch {
                expected: extents.rank(),
                actual: values.len(),
            });
        }
        Ok(Self(values))
    }

    #[must_use]
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// `Σ idx[i] * strides[i]`.
    #[must_use]
    pub fn flatten(&self, idx: &[usize]) -> usize {
        idx.iter()
            .zip(&self.0)
            .map(|(&index, &stride)| index * stride)
            .sum()
    }

    /// Number of elements between the first and one past the last addressed element.
    #[must_use]
    pub fn span(&self, extents: &Extents) -> usize {
        extents
            .dims()
            .iter()
            .zip(&self.0)
            .map(|(&extent, &stride)| (extent - 1).saturating_mul(stride))
            .fold(1usize, usize::saturating_add)
    }

    /// Reject strides under which two distinct indices map to the same offset.
    ///
    /// Dimensions are visited from the smallest stride up; each stride must
    /// clear the span of every dimension visited before it.
    pub fn validate_non_overlapping(&self, extents: &Extents) -> FftResult<()> {
        let mut order: Vec<usize> = (0..self.0.len())
            .filter(|&dim| extents[dim] > 1)
            .collect();
        order.sort_by_key(|&dim| self.0[dim]);

        let mut reach = 0usize;
        for dim in order {
            let stride = self.0[dim];
            let minimum = reach + 1;
            if stride < minimum {
                return Err(FftError::InvalidStrides {
                    dim,
                    stride,
                    minimum,
                });
            }
            reach = reach.saturating_add((extents[dim] - 1).saturating_mul(stride));
        }
        Ok(())
    }
}

/// How element offsets are derived for an operand.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StrideModel {
    #[default]
    Contiguous,
    Strided(Strides),
}

impl StrideModel {
    #[must_use]
    pub fn derive(extents: &Extents) -> Strides {
        Strides::contiguous(extents)
    }

    #[must_use]
    pub fn strides(&self, extents: &Extents) -> Strides {
        match self {
            Self::Contiguous => Strides::contiguous(extents),
            Self::Strided(strides) => strides.clone(),
        }
    }

    #[must_use]
    pub fn flatten(&self, idx: &[usize], extents: &Extents) -> usize {
        match self {
            Self::Contiguous => flatten_contiguous(idx, extents.dims()),
            Self::Strided(strides) => strides.flatten(idx),
        }
    }

    /// Minimum buffer length, in elements, addressed by this model.
    #[must_use]
    pub fn required_elements(&self, extents: &Extents) -> usize {
        match self {
            Self::Contiguous => extents.num_elements(),
            Self::Strided(strides) => strides.span(extents),
        }
    }
}

/// Row-major offset via Horner's scheme, without materializing strides.
#[must_use]
pub fn flatten_contiguous(idx: &[usize], extents: &[usize]) -> usize {
    idx.iter()
        .zip(extents)
        .fold(0usize, |acc, (&index, &extent)| acc * extent + index)
}

#[cfg(test)]
mod tests {
    use super::{StrideModel, Strides, flatten_contiguous};
    use crate::{Extents, FftError};

    fn extents(dims: &[usize]) -> Extents {
        Extents::new(dims.to_vec()).expect("valid extents")
    }

    #[test]
    fn contiguous_strides_end_in_one() {
        let strides = Strides::contiguous(&extents(&[4, 5, 6]));
        assert_eq!(strides.as_slice(), &[30, 6, 1]);
        assert_eq!(Strides::contiguous(&extents(&[7])).as_slice(), &[1]);
    }

    #[test]
    fn padded_strides_use_row_length() {
        let strides = Strides::padded(&extents(&[8, 8]), 10);
        assert_eq!(strides.as_slice(), &[10, 1]);
        let strides = Strides::padded(&extents(&[2, 3, 4]), 6);
        assert_eq!(strides.as_slice(), &[18, 6, 1]);
    }

    #[test]
    fn horner_matches_strided_flatten() {
        let ext = extents(&[3, 4, 5]);
        let model = StrideModel::Strided(Strides::contiguous(&ext));
        for idx in ext.indices() {
            assert_eq!(
                flatten_contiguous(&idx, ext.dims()),
                model.flatten(&idx, &ext)
            );
        }
    }

    #[test]
    fn user_strides_rank_is_checked() {
        let err = Strides::from_user(vec![1], &extents(&[2, 2])).expect_err("rank mismatch");
        assert_eq!(
            err,
            FftError::RankMismatch {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn overlapping_strides_are_detected() {
        let ext = extents(&[4, 4]);
        let overlapping = Strides::from_user(vec![2, 1], &ext).expect("rank ok");
        assert_eq!(
            overlapping.validate_non_overlapping(&ext),
            Err(FftError::InvalidStrides {
                dim: 0,
                stride: 2,
                minimum: 4
            })
        );
        let column_major = Strides::from_user(vec![1, 4], &ext).expect("rank ok");
        assert!(column_major.validate_non_overlapping(&ext).is_ok());
    }

    #[test]
    fn span_covers_last_addressed_element() {
        let ext = extents(&[3, 4]);
        let strides = Strides::from_user(vec![10, 2], &ext).expect("rank ok");
        assert_eq!(strides.span(&ext), 2 * 10 + 3 * 2 + 1);
        assert_eq!(
            StrideModel::Contiguous.required_elements(&ext),
            ext.num_elements()
        );
    }
}
