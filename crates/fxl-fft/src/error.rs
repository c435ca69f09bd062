use thiserror::Error;

use crate::element::ElementKind;
use crate::operand::OperandRole;
use crate::orchestrator::TransformState;

pub type FftResult<T> = Result<T, FftError>;

/// Failures raised by negotiation, sizing and orchestration.
///
/// Setup errors (everything except [`FftError::Execution`]) are raised before
/// any backend work happens and are never downgraded to a best-effort shape.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FftError {
    #[error("invalid rank {rank}: expected 1..={max}")]
    InvalidRank { rank: usize, max: usize },
    #[error("dimension {dim} has a zero extent")]
    ZeroExtent { dim: usize },
    #[error("rank mismatch: expected {expected} dimensions, got {actual}")]
    RankMismatch { expected: usize, actual: usize },
    #[error("dimension {dim}: extents mismatch (expected {expected}, got {actual})")]
    DimensionMismatch {
        dim: usize,
        expected: usize,
        actual: usize,
    },
    #[error("dimension {dim}: window of {extent} at offset {offset} exceeds base extent {base}")]
    SliceOutOfRange {
        dim: usize,
        offset: usize,
        extent: usize,
        base: usize,
    },
    #[error("cannot infer full extents from packed extents {packed:?}; supply them explicitly")]
    AmbiguousFullExtent { packed: Vec<usize> },
    #[error("size too large: {bytes} bytes exceeds the backend limit of {limit} bytes")]
    SizeTooLarge { bytes: u128, limit: u64 },
    #[error("{role} operand claims device residency but exposes no device buffer")]
    NoDevicePointer { role: OperandRole },
    #[error("plan creation failed on `{backend}`: {message}")]
    PlanCreation { backend: String, message: String },
    #[error("execution failed on `{backend}`: {message}")]
    Execution { backend: String, message: String },
    #[error("allocation of {bytes} bytes on `{device}` failed: {message}")]
    Allocation {
        device: String,
        bytes: usize,
        message: String,
    },
    #[error("invalid descriptor: {detail}")]
    InvalidDescriptor { detail: &'static str },
    #[error("dimension {dim}: stride {stride} overlaps, at least {minimum} required")]
    InvalidStrides {
        dim: usize,
        stride: usize,
        minimum: usize,
    },
    #[error("{role} buffer too small: {required} scalars required, {available} available")]
    BufferTooSmall {
        role: OperandRole,
        required: usize,
        available: usize,
    },
    #[error("{role} operand holds {actual} elements, transform requires {expected}")]
    ElementMismatch {
        role: OperandRole,
        expected: ElementKind,
        actual: ElementKind,
    },
    #[error("{role} operand changed residency or layout after binding")]
    OperandChanged { role: OperandRole },
    #[error("operation `{operation}` not allowed in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: TransformState,
    },
    #[error("non-finite host input rejected")]
    NonFiniteInput,
    #[error("unsupported: {detail}")]
    Unsupported { detail: &'static str },
}

impl FftError {
    /// True for errors that can only arise before a plan exists.
    #[must_use]
    pub fn is_setup_error(&self) -> bool {
        !matches!(self, Self::Execution { .. })
    }
}

/// Diagnostic reported by an external backend or device collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
