//! Execution backend interface.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::descriptor::{Direction, TransformKind};
use crate::device::DeviceBufferId;
use crate::element::{ElementKind, Residency};
use crate::error::BackendError;
use crate::negotiate::NegotiatedLayout;
use crate::operand::HostData;
use crate::sizing::SizeLimits;

/// Opaque plan id issued by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanHandle(pub u64);

/// Dimension order a backend expects in plan requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExtentOrder {
    /// Row-major, the crate's canonical order.
    #[default]
    SlowestFirst,
    FastestFirst,
}

impl ExtentOrder {
    /// Reorder canonical (slowest-first) extents for the backend.
    #[must_use]
    pub fn arrange(self, canonical: &[usize]) -> Vec<usize> {
        match self {
            Self::SlowestFirst => canonical.to_vec(),
            Self::FastestFirst => canonical.iter().rev().copied().collect(),
        }
    }

    /// Inverse of [`ExtentOrder::arrange`].
    #[must_use]
    pub fn canonical(self, arranged: &[usize]) -> Vec<usize> {
        self.arrange(arranged)
    }
}

/// Everything a backend needs to build a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub kind: TransformKind,
    pub rank: usize,
    /// Full (logical) extents in the backend's order.
    pub extents: Vec<usize>,
    pub order: ExtentOrder,
    pub input_kind: ElementKind,
    pub output_kind: ElementKind,
    pub direction: Direction,
    pub in_place: bool,
}

impl PlanRequest {
    #[must_use]
    pub fn new(layout: &NegotiatedLayout, order: ExtentOrder, in_place: bool) -> Self {
        Self {
            kind: layout.descriptor.kind(),
            rank: layout.descriptor.rank(),
            extents: order.arrange(layout.full_extents.dims()),
            order,
            input_kind: layout.input_kind(),
            output_kind: layout.output_kind(),
            direction: layout.descriptor.direction(),
            in_place,
        }
    }

    /// Full extents back in slowest-first order.
    #[must_use]
    pub fn canonical_extents(&self) -> Vec<usize> {
        self.order.canonical(&self.extents)
    }
}

/// Buffers handed to [`TransformBackend::execute`].
///
/// A host execution without an output buffer runs in place; a device
/// execution runs in place when both ids are equal.
#[derive(Debug)]
pub enum ExecIo<'a> {
    Host {
        input: &'a mut HostData,
        output: Option<&'a mut HostData>,
    },
    Device {
        input: DeviceBufferId,
        output: DeviceBufferId,
    },
}

/// A transform library: plans and executes transforms on fixed extents.
pub trait TransformBackend: Send + Debug {
    fn name(&self) -> &'static str;

    /// Where the buffers passed to [`TransformBackend::execute`] must live.
    fn residency(&self) -> Residency;

    fn extent_order(&self) -> ExtentOrder {
        ExtentOrder::SlowestFirst
    }

    fn size_limits(&self) -> SizeLimits {
        SizeLimits::host()
    }

    /// Key of the process-wide initialize-once gate shared by every
    /// instance of the same library.
    fn library_id(&self) -> &'static str {
        self.name()
    }

    /// One-time library initialization. Runs at most once per process and
    /// `library_id`, however many contexts are created.
    fn initialize_library(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Called once when the owning context is dropped.
    fn teardown(&mut self) {}

    fn create_plan(&mut self, request: &PlanRequest) -> Result<PlanHandle, BackendError>;

    fn execute(&mut self, plan: PlanHandle, io: ExecIo<'_>) -> Result<(), BackendError>;

    fn destroy_plan(&mut self, plan: PlanHandle);
}

#[cfg(test)]
mod tests {
    use super::{ExtentOrder, PlanRequest};
    use crate::{Extents, Precision, TransformDescriptor, negotiate};

    #[test]
    fn fastest_first_reverses_only_at_the_request() {
        let desc = TransformDescriptor::r2c(3, Precision::Single).expect("valid");
        let full = Extents::new([2, 4, 8]).expect("valid");
        let layout = negotiate(&desc, &full, None, None).expect("valid");
        let request = PlanRequest::new(&layout, ExtentOrder::FastestFirst, false);
        assert_eq!(request.extents, vec![8, 4, 2]);
        assert_eq!(request.canonical_extents(), vec![2, 4, 8]);
        assert_eq!(layout.full_extents.dims(), &[2, 4, 8]);

        let row_major = PlanRequest::new(&layout, ExtentOrder::SlowestFirst, true);
        assert_eq!(row_major.extents, vec![2, 4, 8]);
        assert!(row_major.in_place);
    }
}
