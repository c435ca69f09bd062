#![forbid(unsafe_code)]

//! Layout negotiation and orchestration for multi-dimensional FFT operands.
//!
//! | module | concern |
//! |--------|---------|
//! | `extents` | slowest-first extent vectors, packed shapes |
//! | `strides` | contiguous, padded and user strides, index flattening |
//! | `accessor` | element read/write capability over any storage |
//! | `negotiate` | full/packed extents, per-dimension checks, in-place padding |
//! | `sizing` | byte counts, staging decisions, size ceiling |
//! | `orchestrator` | bind, plan, allocate, run, teardown |
//! | `context` | shared backend handle, plan cache, traces |
//! | `host`, `mirror` | reference backends on `rustfft` |

pub mod accessor;
pub mod backend;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod element;
pub mod error;
pub mod extents;
pub mod helpers;
pub mod host;
mod kernel;
pub mod mirror;
pub mod negotiate;
pub mod operand;
pub mod orchestrator;
pub mod plan;
pub mod sizing;
pub mod strides;

use serde::{Deserialize, Serialize};

pub use accessor::{Accessor, AccessorMut, FileSource, SliceView, copy_with};
pub use backend::{ExecIo, ExtentOrder, PlanHandle, PlanRequest, TransformBackend};
pub use context::{BackendContext, ContextConfig, library_initialized};
pub use descriptor::{Direction, MAX_RANK, TransformDescriptor, TransformKind};
pub use device::{DeviceBuffer, DeviceBufferId, DeviceMemory, PitchedCopy};
pub use element::{Domain, ElementKind, Precision, Residency, StorageLayout};
pub use error::{BackendError, FftError, FftResult};
pub use extents::Extents;
pub use fxl_runtime::{RuntimeMode, TraceOutcome, TransformTrace};
pub use helpers::{intensity, normalization_scale, packed_len};
pub use host::HostBackend;
pub use mirror::{DeviceEvent, HostMirrorDevice, MirrorDeviceBackend};
pub use negotiate::{InPlacePadding, NegotiatedLayout, negotiate};
pub use operand::{Complex64, HostData, Operand, OperandRole};
pub use orchestrator::{RunReport, Transform, TransformOptions, TransformState, run};
pub use plan::{CacheAdmissionPolicy, PlanCacheConfig, PlanFingerprint, PlanKey};
pub use sizing::{
    AllocationPlan, CombinedBuffer, MemorySizer, Placement, SizeLimits, StagingReason, size_of,
};
pub use strides::{StrideModel, Strides};

/// Output scaling applied after execution.
///
/// Native FFT libraries do not normalize, so `Unscaled` is the default;
/// the other modes follow the NumPy conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Normalization {
    #[default]
    Unscaled,
    /// `1/n` on the inverse transform.
    Backward,
    /// `1/n` on the forward transform.
    Forward,
    /// `1/sqrt(n)` both ways.
    Ortho,
}
