//! Byte counts, staging decisions and the size ceiling.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::descriptor::TransformKind;
use crate::device::PitchedCopy;
use crate::element::{ElementKind, Residency, StorageLayout};
use crate::error::{FftError, FftResult};
use crate::extents::Extents;
use crate::negotiate::NegotiatedLayout;
use crate::operand::Operand;

/// Largest byte count a backend can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SizeLimits {
    pub max_bytes: u64,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self::host()
    }
}

impl SizeLimits {
    #[must_use]
    pub const fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    #[must_use]
    pub const fn host() -> Self {
        Self::new(u64::MAX)
    }

    /// 32-bit addressable sizes, as native device libraries require.
    #[must_use]
    pub const fn device() -> Self {
        Self::new(u32::MAX as u64)
    }

    /// Accept `bytes` if it fits under the ceiling.
    pub fn check(&self, bytes: u128) -> FftResult<usize> {
        if bytes > u128::from(self.max_bytes) {
            return Err(FftError::SizeTooLarge {
                bytes,
                limit: self.max_bytes,
            });
        }
        usize::try_from(bytes).map_err(|_| FftError::SizeTooLarge {
            bytes,
            limit: self.max_bytes,
        })
    }
}

/// `num_elements * element_size`, rejected above the ceiling or on overflow.
pub fn size_of(extents: &Extents, kind: ElementKind, limits: &SizeLimits) -> FftResult<usize> {
    let bytes = extents
        .dims()
        .iter()
        .try_fold(kind.size_bytes() as u128, |acc, &extent| {
            acc.checked_mul(extent as u128)
        })
        .unwrap_or(u128::MAX);
    limits.check(bytes)
}

/// Bytes of one buffer serving both the padded real view and the packed
/// complex view of `layout`.
pub fn in_place_bytes(layout: &NegotiatedLayout, limits: &SizeLimits) -> FftResult<usize> {
    let precision = layout.descriptor.precision();
    let complex = size_of(
        &layout.packed_extents,
        ElementKind::complex(precision),
        limits,
    )?;
    if !layout.descriptor.is_real() {
        return Ok(complex);
    }
    let packed_last = layout.packed_extents.last();
    let padded_row = packed_last
        .checked_mul(2)
        .ok_or_else(|| FftError::SizeTooLarge {
            bytes: 2 * packed_last as u128 * precision.scalar_bytes() as u128,
            limit: limits.max_bytes,
        })?;
    let real_view = size_of(
        &layout.full_extents.with_last(padded_row),
        ElementKind::real(precision),
        limits,
    )?;
    Ok(complex.max(real_view))
}

/// Why an operand cannot be handed to the backend as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StagingReason {
    Residency,
    Layout,
    Strides,
}

/// Where one side of a transform reads or writes during execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    /// The operand's own buffer.
    Direct,
    /// An orchestrator-owned staging buffer of `bytes`.
    Staged { bytes: usize, reason: StagingReason },
    /// The buffer of the other side, or the combined buffer.
    Shared,
}

/// What the sizer needs to know about an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandProfile {
    pub residency: Residency,
    pub layout: StorageLayout,
    pub dense: bool,
}

impl OperandProfile {
    /// Profile of `operand`. A padded buffer is directly usable by an
    /// in-place transform in either view.
    #[must_use]
    pub fn of(operand: &Operand, in_place: bool) -> Self {
        Self {
            residency: operand.residency(),
            layout: operand.layout(),
            dense: operand.is_dense() || (in_place && operand.is_padded()),
        }
    }
}

/// One device buffer shared by input and output, with the pitched copies
/// needed to move the real side in and out of its padded rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedBuffer {
    pub bytes: usize,
    pub pitched_in: Option<PitchedCopy>,
    pub pitched_out: Option<PitchedCopy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub target: Residency,
    pub input_bytes: usize,
    pub output_bytes: usize,
    pub input: Placement,
    pub output: Placement,
    pub combined: Option<CombinedBuffer>,
}

impl AllocationPlan {
    /// Bytes held in orchestrator-owned buffers.
    #[must_use]
    pub fn staged_bytes(&self) -> usize {
        let staged = |placement: Placement| match placement {
            Placement::Staged { bytes, .. } => bytes,
            Placement::Direct | Placement::Shared => 0,
        };
        staged(self.input) + staged(self.output) + self.combined.map_or(0, |c| c.bytes)
    }

    /// True when the backend runs in place, on one buffer.
    #[must_use]
    pub fn executes_in_place(&self) -> bool {
        self.combined.is_some() || self.output == Placement::Shared
    }
}

/// Sizes staging for a target residency under a size ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySizer {
    limits: SizeLimits,
    target: Residency,
    inplace_for_host: bool,
}

impl MemorySizer {
    #[must_use]
    pub const fn new(limits: SizeLimits, target: Residency) -> Self {
        Self {
            limits,
            target,
            inplace_for_host: false,
        }
    }

    /// Let out-of-place host operands share one device buffer and run in place.
    #[must_use]
    pub const fn with_inplace_for_host(mut self, inplace_for_host: bool) -> Self {
        self.inplace_for_host = inplace_for_host;
        self
    }

    #[must_use]
    pub const fn limits(&self) -> &SizeLimits {
        &self.limits
    }

    /// Whether input and output will share one combined device buffer.
    #[must_use]
    pub fn uses_combined(
        &self,
        layout: &NegotiatedLayout,
        input: &OperandProfile,
        output: Option<&OperandProfile>,
    ) -> bool {
        self.inplace_for_host
            && self.target == Residency::Device
            && !layout.descriptor.is_in_place()
            && input.residency == Residency::Host
            && output.is_some_and(|profile| profile.residency == Residency::Host)
    }

    /// Decide staging for both sides and size every buffer.
    pub fn plan(
        &self,
        layout: &NegotiatedLayout,
        input: &OperandProfile,
        output: Option<&OperandProfile>,
    ) -> FftResult<AllocationPlan> {
        let descriptor = &layout.descriptor;
        let (input_bytes, output_bytes) = if descriptor.is_in_place() {
            let bytes = in_place_bytes(layout, &self.limits)?;
            (bytes, bytes)
        } else {
            (
                size_of(&layout.input_extents, layout.input_kind(), &self.limits)?,
                size_of(&layout.output_extents, layout.output_kind(), &self.limits)?,
            )
        };

        let plan = if self.uses_combined(layout, input, output) {
            let bytes = input_bytes
                .max(output_bytes)
                .max(in_place_bytes(layout, &self.limits)?);
            let (pitched_in, pitched_out) = self.pitched_copies(layout);
            AllocationPlan {
                target: self.target,
                input_bytes,
                output_bytes,
                input: Placement::Shared,
                output: Placement::Shared,
                combined: Some(CombinedBuffer {
                    bytes,
                    pitched_in,
                    pitched_out,
                }),
            }
        } else {
            let output_placement = match (descriptor.is_in_place(), output) {
                (true, _) | (false, None) => Placement::Shared,
                (false, Some(profile)) => self.placement(profile, output_bytes),
            };
            AllocationPlan {
                target: self.target,
                input_bytes,
                output_bytes,
                input: self.placement(input, input_bytes),
                output: output_placement,
                combined: None,
            }
        };

        debug!(
            target_residency = ?plan.target,
            input_bytes = plan.input_bytes,
            output_bytes = plan.output_bytes,
            staged_bytes = plan.staged_bytes(),
            "sized transform buffers"
        );
        Ok(plan)
    }

    fn placement(&self, profile: &OperandProfile, bytes: usize) -> Placement {
        let reason = if profile.residency != self.target {
            StagingReason::Residency
        } else if profile.layout == StorageLayout::SoA {
            StagingReason::Layout
        } else if !profile.dense {
            StagingReason::Strides
        } else {
            return Placement::Direct;
        };
        Placement::Staged { bytes, reason }
    }

    /// Pitched copies between dense real rows and padded complex rows.
    fn pitched_copies(&self, layout: &NegotiatedLayout) -> (Option<PitchedCopy>, Option<PitchedCopy>) {
        let precision = layout.descriptor.precision();
        let real_row = layout.full_extents.last() * ElementKind::real(precision).size_bytes();
        let complex_row = layout.packed_extents.last() * ElementKind::complex(precision).size_bytes();
        let height = layout.rows();
        match layout.descriptor.kind() {
            TransformKind::R2C => (
                Some(PitchedCopy {
                    width: real_row,
                    height,
                    src_pitch: real_row,
                    dst_pitch: complex_row,
                }),
                None,
            ),
            TransformKind::C2R => (
                None,
                Some(PitchedCopy {
                    width: real_row,
                    height,
                    src_pitch: complex_row,
                    dst_pitch: real_row,
                }),
            ),
            TransformKind::C2C => (None, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        MemorySizer, OperandProfile, Placement, SizeLimits, StagingReason, in_place_bytes, size_of,
    };
    use crate::{
        Direction, ElementKind, Extents, FftError, Precision, Residency, StorageLayout,
        TransformDescriptor, negotiate,
    };

    fn extents(dims: &[usize]) -> Extents {
        Extents::new(dims.to_vec()).expect("valid extents")
    }

    fn host_dense() -> OperandProfile {
        OperandProfile {
            residency: Residency::Host,
            layout: StorageLayout::AoS,
            dense: true,
        }
    }

    #[test]
    fn ceiling_is_inclusive() {
        let limits = SizeLimits::new(100);
        let kind = ElementKind::real(Precision::Single);
        assert_eq!(size_of(&extents(&[25]), kind, &limits), Ok(100));
        assert_eq!(
            size_of(&extents(&[26]), kind, &limits),
            Err(FftError::SizeTooLarge {
                bytes: 104,
                limit: 100
            })
        );
    }

    #[test]
    fn overflow_is_size_too_large() {
        let kind = ElementKind::complex(Precision::Double);
        let huge = extents(&[usize::MAX, usize::MAX, 4]);
        assert!(matches!(
            size_of(&huge, kind, &SizeLimits::host()),
            Err(FftError::SizeTooLarge { .. })
        ));
    }

    #[test]
    fn combined_buffer_of_unaddressable_rows_is_size_too_large() {
        let desc = TransformDescriptor::r2c(1, Precision::Double).expect("valid");
        let layout = negotiate(&desc, &extents(&[usize::MAX]), None, None).expect("out of place");
        assert!(matches!(
            in_place_bytes(&layout, &SizeLimits::host()),
            Err(FftError::SizeTooLarge { .. })
        ));
    }

    #[test]
    fn device_ceiling_is_u32_max() {
        assert_eq!(SizeLimits::device().max_bytes, u64::from(u32::MAX));
        let kind = ElementKind::complex(Precision::Double);
        assert!(size_of(&extents(&[1 << 14, 1 << 14]), kind, &SizeLimits::device()).is_err());
    }

    #[test]
    fn in_place_r2c_sizes_padded_buffer() {
        let desc = TransformDescriptor::r2c(2, Precision::Single)
            .expect("valid")
            .in_place();
        let layout =
            negotiate(&desc, &extents(&[8, 5]), None, Some(&extents(&[8, 8]))).expect("valid");
        let plan = MemorySizer::new(SizeLimits::host(), Residency::Host)
            .plan(&layout, &host_dense(), None)
            .expect("fits");
        assert_eq!(plan.input_bytes, 8 * 10 * 4);
        assert_eq!(plan.input, Placement::Direct);
        assert_eq!(plan.output, Placement::Shared);
        assert!(plan.executes_in_place());
    }

    #[test]
    fn host_operands_are_staged_for_a_device() {
        let desc = TransformDescriptor::c2c(Direction::Forward, 1, Precision::Double)
            .expect("valid");
        let layout = negotiate(&desc, &extents(&[16]), Some(&extents(&[16])), None).expect("ok");
        let soa = OperandProfile {
            layout: StorageLayout::SoA,
            ..host_dense()
        };
        let plan = MemorySizer::new(SizeLimits::device(), Residency::Device)
            .plan(&layout, &soa, Some(&host_dense()))
            .expect("fits");
        assert_eq!(
            plan.input,
            Placement::Staged {
                bytes: 256,
                reason: StagingReason::Residency
            }
        );
        assert_eq!(plan.staged_bytes(), 512);

        let host_plan = MemorySizer::new(SizeLimits::host(), Residency::Host)
            .plan(&layout, &soa, Some(&host_dense()))
            .expect("fits");
        assert_eq!(
            host_plan.input,
            Placement::Staged {
                bytes: 256,
                reason: StagingReason::Layout
            }
        );
        assert_eq!(host_plan.output, Placement::Direct);
    }

    #[test]
    fn inplace_for_host_combines_buffers_with_pitched_copy() {
        let desc = TransformDescriptor::r2c(2, Precision::Single).expect("valid");
        let layout = negotiate(&desc, &extents(&[4, 6]), Some(&extents(&[4, 4])), None)
            .expect("valid");
        let plan = MemorySizer::new(SizeLimits::device(), Residency::Device)
            .with_inplace_for_host(true)
            .plan(&layout, &host_dense(), Some(&host_dense()))
            .expect("fits");
        let combined = plan.combined.expect("combined buffer");
        assert_eq!(plan.input_bytes, 4 * 6 * 4);
        assert_eq!(plan.output_bytes, 4 * 4 * 8);
        assert_eq!(combined.bytes, 128);
        let pitched = combined.pitched_in.expect("real side is pitched");
        assert_eq!(pitched.width, 24);
        assert_eq!(pitched.height, 4);
        assert_eq!(pitched.dst_pitch, 32);
        assert!(combined.pitched_out.is_none());
        assert_eq!(plan.staged_bytes(), 128);
    }
}
