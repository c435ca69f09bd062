//! Full/packed extent negotiation between the operands of a transform.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::descriptor::{TransformDescriptor, TransformKind};
use crate::element::{ElementKind, Precision};
use crate::error::{FftError, FftResult};
use crate::extents::Extents;
use crate::strides::Strides;

/// Padding of the real view of an in-place real/complex buffer.
///
/// `logical_last` is the number of meaningful real elements per row and
/// `padded_last_stride` the number of real elements a row occupies, which is
/// exactly enough to hold `packed[last]` complex values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InPlacePadding {
    pub logical_last: usize,
    pub padded_last_stride: usize,
    pub real_strides: Strides,
}

/// Result of negotiating a descriptor against its operands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiatedLayout {
    pub descriptor: TransformDescriptor,
    pub full_extents: Extents,
    pub packed_extents: Extents,
    pub input_extents: Extents,
    pub output_extents: Extents,
    pub in_place: Option<InPlacePadding>,
}

impl NegotiatedLayout {
    #[must_use]
    pub fn input_kind(&self) -> ElementKind {
        self.descriptor.input_kind()
    }

    #[must_use]
    pub fn output_kind(&self) -> ElementKind {
        self.descriptor.output_kind()
    }

    /// Number of rows (all dimensions but the last) of the full shape.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.full_extents.num_rows()
    }
}

/// Derive and validate the full and packed extents of a transform.
///
/// `input` and `output` are the operands' declared extents. For in-place
/// real transforms the single operand declares the packed shape and the full
/// shape must come from `full_hint`. For out-of-place C2R the full shape comes
/// from `output`, falling back to `full_hint`.
pub fn negotiate(
    descriptor: &TransformDescriptor,
    input: &Extents,
    output: Option<&Extents>,
    full_hint: Option<&Extents>,
) -> FftResult<NegotiatedLayout> {
    let rank = descriptor.rank();
    check_rank(rank, input)?;
    if let Some(output) = output {
        check_rank(rank, output)?;
    }
    if let Some(hint) = full_hint {
        check_rank(rank, hint)?;
    }
    if descriptor.is_in_place() && output.is_some() {
        return Err(FftError::InvalidDescriptor {
            detail: "in-place transforms take a single operand",
        });
    }

    let layout = match (descriptor.kind(), descriptor.is_in_place()) {
        (TransformKind::C2C, _) => {
            if let Some(output) = output {
                check_equal(input, output)?;
            }
            if let Some(hint) = full_hint {
                check_equal(input, hint)?;
            }
            NegotiatedLayout {
                descriptor: *descriptor,
                full_extents: input.clone(),
                packed_extents: input.clone(),
                input_extents: input.clone(),
                output_extents: input.clone(),
                in_place: None,
            }
        }
        (TransformKind::R2C, false) => {
            if let Some(hint) = full_hint {
                check_equal(input, hint)?;
            }
            let packed = input.packed();
            if let Some(output) = output {
                check_equal(&packed, output)?;
            }
            NegotiatedLayout {
                descriptor: *descriptor,
                full_extents: input.clone(),
                packed_extents: packed.clone(),
                input_extents: input.clone(),
                output_extents: packed,
                in_place: None,
            }
        }
        (TransformKind::C2R, false) => {
            let full = match (output, full_hint) {
                (Some(output), Some(hint)) => {
                    check_equal(output, hint)?;
                    output.clone()
                }
                (Some(full), None) | (None, Some(full)) => full.clone(),
                (None, None) => {
                    return Err(FftError::AmbiguousFullExtent {
                        packed: input.dims().to_vec(),
                    });
                }
            };
            check_packed_against_full(input, &full)?;
            NegotiatedLayout {
                descriptor: *descriptor,
                full_extents: full.clone(),
                packed_extents: input.clone(),
                input_extents: input.clone(),
                output_extents: full,
                in_place: None,
            }
        }
        (TransformKind::R2C | TransformKind::C2R, true) => {
            let full = full_hint.ok_or_else(|| FftError::AmbiguousFullExtent {
                packed: input.dims().to_vec(),
            })?;
            check_packed_against_full(input, full)?;
            let padding = in_place_padding(full, input, descriptor.precision())?;
            let (input_extents, output_extents) = match descriptor.kind() {
                TransformKind::R2C => (full.clone(), input.clone()),
                _ => (input.clone(), full.clone()),
            };
            NegotiatedLayout {
                descriptor: *descriptor,
                full_extents: full.clone(),
                packed_extents: input.clone(),
                input_extents,
                output_extents,
                in_place: Some(padding),
            }
        }
    };

    debug!(
        kind = descriptor.kind().name(),
        in_place = descriptor.is_in_place(),
        full = %layout.full_extents,
        packed = %layout.packed_extents,
        "negotiated transform layout"
    );
    Ok(layout)
}

/// Padding of the real view when `full` and `packed` share one buffer.
///
/// Fails with [`FftError::SizeTooLarge`] when a padded row is not addressable.
pub fn in_place_padding(
    full: &Extents,
    packed: &Extents,
    precision: Precision,
) -> FftResult<InPlacePadding> {
    let padded_last_stride =
        packed
            .last()
            .checked_mul(2)
            .ok_or_else(|| FftError::SizeTooLarge {
                bytes: 2 * packed.last() as u128 * precision.scalar_bytes() as u128,
                limit: usize::MAX as u64,
            })?;
    Ok(InPlacePadding {
        logical_last: full.last(),
        padded_last_stride,
        real_strides: Strides::padded(full, padded_last_stride),
    })
}

fn check_rank(expected: usize, extents: &Extents) -> FftResult<()> {
    if extents.rank() != expected {
        return Err(FftError::RankMismatch {
            expected,
            actual: extents.rank(),
        });
    }
    Ok(())
}

fn check_equal(expected: &Extents, actual: &Extents) -> FftResult<()> {
    for dim in 0..expected.rank() {
        if expected[dim] != actual[dim] {
            return Err(FftError::DimensionMismatch {
                dim,
                expected: expected[dim],
                actual: actual[dim],
            });
        }
    }
    Ok(())
}

/// Leading dimensions must match exactly; the last must satisfy `packed = full/2 + 1`.
fn check_packed_against_full(packed: &Extents, full: &Extents) -> FftResult<()> {
    let last = packed.rank() - 1;
    for dim in 0..last {
        if packed[dim] != full[dim] {
            return Err(FftError::DimensionMismatch {
                dim,
                expected: packed[dim],
                actual: full[dim],
            });
        }
    }
    if packed[last] != full[last] / 2 + 1 {
        // Report the smallest full length the packed width admits.
        return Err(FftError::DimensionMismatch {
            dim: last,
            expected: (packed[last] - 1).saturating_mul(2).max(1),
            actual: full[last],
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::negotiate;
    use crate::{Direction, Extents, FftError, Precision, TransformDescriptor};

    fn extents(dims: &[usize]) -> Extents {
        Extents::new(dims.to_vec()).expect("valid extents")
    }

    #[test]
    fn r2c_packs_last_dimension() {
        let desc = TransformDescriptor::r2c(2, Precision::Double).expect("valid");
        let layout = negotiate(&desc, &extents(&[16, 10]), Some(&extents(&[16, 6])), None)
            .expect("negotiation should succeed");
        assert_eq!(layout.full_extents.dims(), &[16, 10]);
        assert_eq!(layout.packed_extents.dims(), &[16, 6]);
        assert!(layout.in_place.is_none());
    }

    #[test]
    fn r2c_full_sized_output_is_a_mismatch() {
        let desc = TransformDescriptor::r2c(2, Precision::Single).expect("valid");
        let err = negotiate(&desc, &extents(&[64, 64]), Some(&extents(&[64, 64])), None)
            .expect_err("full-sized output must be rejected");
        assert_eq!(
            err,
            FftError::DimensionMismatch {
                dim: 1,
                expected: 33,
                actual: 64
            }
        );
    }

    #[test]
    fn r2c_leading_dimension_mismatch_names_dimension() {
        let desc = TransformDescriptor::r2c(3, Precision::Double).expect("valid");
        let err = negotiate(
            &desc,
            &extents(&[4, 6, 8]),
            Some(&extents(&[4, 7, 5])),
            None,
        )
        .expect_err("mismatch");
        assert_eq!(
            err,
            FftError::DimensionMismatch {
                dim: 1,
                expected: 6,
                actual: 7
            }
        );
    }

    #[test]
    fn c2r_takes_full_extents_from_output_or_hint() {
        let desc = TransformDescriptor::c2r(2, Precision::Double).expect("valid");
        let packed = extents(&[8, 5]);
        let from_output =
            negotiate(&desc, &packed, Some(&extents(&[8, 9])), None).expect("odd width");
        assert_eq!(from_output.full_extents.dims(), &[8, 9]);
        let from_hint = negotiate(&desc, &packed, None, Some(&extents(&[8, 8]))).expect("hint");
        assert_eq!(from_hint.full_extents.dims(), &[8, 8]);
        let err = negotiate(&desc, &packed, None, None).expect_err("ambiguous");
        assert_eq!(
            err,
            FftError::AmbiguousFullExtent {
                packed: vec![8, 5]
            }
        );
    }

    #[test]
    fn c2r_output_must_halve_to_input() {
        let desc = TransformDescriptor::c2r(1, Precision::Double).expect("valid");
        let err = negotiate(&desc, &extents(&[5]), Some(&extents(&[12])), None)
            .expect_err("12/2+1 != 5");
        assert_eq!(
            err,
            FftError::DimensionMismatch {
                dim: 0,
                expected: 8,
                actual: 12
            }
        );
        let err = negotiate(&desc, &extents(&[5]), Some(&extents(&[13])), None)
            .expect_err("13/2+1 != 5");
        assert_eq!(
            err,
            FftError::DimensionMismatch {
                dim: 0,
                expected: 8,
                actual: 13
            }
        );
    }

    #[test]
    fn in_place_padding_overflow_is_size_too_large() {
        let full = extents(&[usize::MAX]);
        let desc = TransformDescriptor::r2c(1, Precision::Double)
            .expect("valid")
            .in_place();
        let err = negotiate(&desc, &full.packed(), None, Some(&full)).expect_err("overflow");
        assert!(matches!(err, FftError::SizeTooLarge { .. }), "{err:?}");

        let c2r = TransformDescriptor::c2r(1, Precision::Single)
            .expect("valid")
            .in_place();
        assert!(matches!(
            negotiate(&c2r, &full.packed(), None, Some(&full)),
            Err(FftError::SizeTooLarge { .. })
        ));
    }

    #[test]
    fn in_place_r2c_pads_last_stride() {
        let desc = TransformDescriptor::r2c(2, Precision::Single)
            .expect("valid")
            .in_place();
        let layout = negotiate(&desc, &extents(&[8, 5]), None, Some(&extents(&[8, 8])))
            .expect("in-place negotiation");
        let padding = layout.in_place.expect("padding present");
        assert_eq!(padding.logical_last, 8);
        assert_eq!(padding.padded_last_stride, 10);
        assert_eq!(padding.real_strides.as_slice(), &[10, 1]);
        assert_eq!(layout.input_extents.dims(), &[8, 8]);
        assert_eq!(layout.output_extents.dims(), &[8, 5]);
    }

    #[test]
    fn in_place_real_transform_without_hint_is_ambiguous() {
        let desc = TransformDescriptor::c2r(1, Precision::Single)
            .expect("valid")
            .in_place();
        assert!(matches!(
            negotiate(&desc, &extents(&[5]), None, None),
            Err(FftError::AmbiguousFullExtent { .. })
        ));
    }

    #[test]
    fn c2c_requires_identical_extents() {
        let desc = TransformDescriptor::c2c(Direction::Inverse, 2, Precision::Double)
            .expect("valid");
        assert!(negotiate(&desc, &extents(&[4, 4]), Some(&extents(&[4, 4])), None).is_ok());
        assert_eq!(
            negotiate(&desc, &extents(&[4, 4]), Some(&extents(&[4, 3])), None),
            Err(FftError::DimensionMismatch {
                dim: 1,
                expected: 4,
                actual: 3
            })
        );
        assert_eq!(
            negotiate(&desc, &extents(&[4]), None, None),
            Err(FftError::RankMismatch {
                expected: 2,
                actual: 1
            })
        );
    }
}
