//! Transform operands: host planes or a device buffer, plus shape metadata.

use std::fmt::{Display, Formatter};

use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::accessor::{
    Accessor, AccessorMut, FileAccessor, FileSource, FunctorAccessor, OperandAccessor, copy_with,
};
use crate::device::{DeviceBuffer, DeviceBufferId};
use crate::element::{Domain, ElementKind, Precision, Residency, StorageLayout};
use crate::error::{FftError, FftResult};
use crate::extents::Extents;
use crate::strides::Strides;

pub type Complex64 = Complex<f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperandRole {
    Input,
    Output,
}

impl Display for OperandRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// One host plane of scalars.
#[derive(Debug, Clone, PartialEq)]
pub enum HostData {
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl HostData {
    #[must_use]
    pub fn zeros(precision: Precision, len: usize) -> Self {
        match precision {
            Precision::Single => Self::F32(vec![0.0; len]),
            Precision::Double => Self::F64(vec![0.0; len]),
        }
    }

    #[must_use]
    pub fn precision(&self) -> Precision {
        match self {
            Self::F32(_) => Precision::Single,
            Self::F64(_) => Precision::Double,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::F32(values) => values.len(),
            Self::F64(values) => values.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> f64 {
        match self {
            Self::F32(values) => f64::from(values[index]),
            Self::F64(values) => values[index],
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn set(&mut self, index: usize, value: f64) {
        match self {
            Self::F32(values) => values[index] = value as f32,
            Self::F64(values) => values[index] = value,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::F32(values) => bytemuck::cast_slice(values),
            Self::F64(values) => bytemuck::cast_slice(values),
        }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Self::F32(values) => bytemuck::cast_slice_mut(values),
            Self::F64(values) => bytemuck::cast_slice_mut(values),
        }
    }

    /// Rebuild a plane from raw bytes. Trailing bytes that do not form a whole scalar are dropped.
    #[must_use]
    pub fn from_bytes(precision: Precision, bytes: &[u8]) -> Self {
        let whole = bytes.len() - bytes.len() % precision.scalar_bytes();
        match precision {
            Precision::Single => Self::F32(bytemuck::pod_collect_to_vec(&bytes[..whole])),
            Precision::Double => Self::F64(bytemuck::pod_collect_to_vec(&bytes[..whole])),
        }
    }

    #[must_use]
    pub fn all_finite(&self) -> bool {
        match self {
            Self::F32(values) => values.iter().all(|value| value.is_finite()),
            Self::F64(values) => values.iter().all(|value| value.is_finite()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Buffer {
    Host(Vec<HostData>),
    Device(Option<DeviceBuffer>),
}

/// Snapshot of everything about an operand a bound transform depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OperandSignature {
    residency: Residency,
    layout: StorageLayout,
    precision: Precision,
    extents: Extents,
    padded: bool,
    plane_lens: Vec<usize>,
    device: Option<DeviceBuffer>,
}

/// A transform operand.
///
/// Declared extents describe the element view the operand currently holds.
/// A padded operand shares one buffer between a real view over its full
/// extents (rows padded to `2 * packed[last]` scalars) and a complex view over
/// its packed extents; its declared extents are always the packed shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    extents: Extents,
    full_extents: Option<Extents>,
    element: ElementKind,
    layout: StorageLayout,
    strides: Option<Strides>,
    padded: bool,
    buffer: Buffer,
}

impl Operand {
    /// Zero-filled contiguous interleaved host operand.
    #[must_use]
    pub fn zeros(extents: Extents, element: ElementKind) -> Self {
        let scalars = extents.num_elements() * element.scalars();
        Self {
            extents,
            full_extents: None,
            element,
            layout: StorageLayout::AoS,
            strides: None,
            padded: false,
            buffer: Buffer::Host(vec![HostData::zeros(element.precision, scalars)]),
        }
    }

    pub fn real(extents: Extents, values: Vec<f64>) -> FftResult<Self> {
        Self::from_plane(extents, Domain::Real, HostData::F64(values))
    }

    pub fn real_f32(extents: Extents, values: Vec<f32>) -> FftResult<Self> {
        Self::from_plane(extents, Domain::Real, HostData::F32(values))
    }

    pub fn complex(extents: Extents, values: &[Complex64]) -> FftResult<Self> {
        let scalars = values.iter().flat_map(|z| [z.re, z.im]).collect();
        Self::from_plane(extents, Domain::Complex, HostData::F64(scalars))
    }

    pub fn complex_f32(extents: Extents, values: &[Complex<f32>]) -> FftResult<Self> {
        let scalars = values.iter().flat_map(|z| [z.re, z.im]).collect();
        Self::from_plane(extents, Domain::Complex, HostData::F32(scalars))
    }

    fn from_plane(extents: Extents, domain: Domain, plane: HostData) -> FftResult<Self> {
        let operand = Self {
            extents,
            full_extents: None,
            element: ElementKind {
                precision: plane.precision(),
                domain,
            },
            layout: StorageLayout::AoS,
            strides: None,
            padded: false,
            buffer: Buffer::Host(vec![plane]),
        };
        operand.check_capacity(OperandRole::Input)?;
        Ok(operand)
    }

    /// Complex operand with separate real and imaginary planes.
    pub fn split_complex(extents: Extents, re: HostData, im: HostData) -> FftResult<Self> {
        if re.precision() != im.precision() {
            return Err(FftError::Unsupported {
                detail: "real and imaginary planes must share a precision",
            });
        }
        let operand = Self {
            extents,
            full_extents: None,
            element: ElementKind::complex(re.precision()),
            layout: StorageLayout::SoA,
            strides: None,
            padded: false,
            buffer: Buffer::Host(vec![re, im]),
        };
        operand.check_capacity(OperandRole::Input)?;
        Ok(operand)
    }

    /// Interleaved operand addressed through caller-supplied element strides.
    pub fn strided(
        extents: Extents,
        domain: Domain,
        strides: Strides,
        plane: HostData,
    ) -> FftResult<Self> {
        if strides.as_slice().len() != extents.rank() {
            return Err(FftError::RankMismatch {
                expected: extents.rank(),
                actual: strides.as_slice().len(),
            });
        }
        let operand = Self {
            extents,
            full_extents: None,
            element: ElementKind {
                precision: plane.precision(),
                domain,
            },
            layout: StorageLayout::Strided,
            strides: Some(strides),
            padded: false,
            buffer: Buffer::Host(vec![plane]),
        };
        operand.check_capacity(OperandRole::Input)?;
        Ok(operand)
    }

    /// Zeroed padded buffer for an in-place real-to-complex transform,
    /// currently viewed as real data over `full`.
    pub fn in_place_real(full: &Extents, precision: Precision) -> FftResult<Self> {
        Self::padded_buffer(full, ElementKind::real(precision))
    }

    /// Zeroed padded buffer for an in-place complex-to-real transform,
    /// currently viewed as packed complex data.
    pub fn in_place_complex(full: &Extents, precision: Precision) -> FftResult<Self> {
        Self::padded_buffer(full, ElementKind::complex(precision))
    }

    fn padded_buffer(full: &Extents, element: ElementKind) -> FftResult<Self> {
        let packed = full.packed();
        let scalars = packed
            .checked_num_elements()
            .and_then(|count| count.checked_mul(2))
            .ok_or_else(|| FftError::SizeTooLarge {
                bytes: packed
                    .dims()
                    .iter()
                    .fold(2 * element.precision.scalar_bytes() as u128, |acc, &extent| {
                        acc.saturating_mul(extent as u128)
                    }),
                limit: usize::MAX as u64,
            })?;
        Ok(Self {
            extents: packed,
            full_extents: Some(full.clone()),
            element,
            layout: StorageLayout::AoS,
            strides: None,
            padded: true,
            buffer: Buffer::Host(vec![HostData::zeros(element.precision, scalars)]),
        })
    }

    /// Operand resident on a device. `buffer` is `None` when the caller has
    /// not attached one yet; its byte size is checked against the negotiated
    /// shape when a transform binds the operand.
    #[must_use]
    pub fn device(extents: Extents, element: ElementKind, buffer: Option<DeviceBuffer>) -> Self {
        Self {
            extents,
            full_extents: None,
            element,
            layout: StorageLayout::AoS,
            strides: None,
            padded: false,
            buffer: Buffer::Device(buffer),
        }
    }

    /// Record the full (unpacked) extents of this operand.
    #[must_use]
    pub fn with_full_extents(mut self, full: Extents) -> Self {
        self.full_extents = Some(full);
        self
    }

    #[must_use]
    pub fn extents(&self) -> &Extents {
        &self.extents
    }

    #[must_use]
    pub fn full_extents(&self) -> Option<&Extents> {
        self.full_extents.as_ref()
    }

    pub(crate) fn set_full_extents(&mut self, full: &Extents) {
        if self.full_extents.as_ref() != Some(full) {
            self.full_extents = Some(full.clone());
        }
    }

    #[must_use]
    pub fn element(&self) -> ElementKind {
        self.element
    }

    #[must_use]
    pub fn layout(&self) -> StorageLayout {
        self.layout
    }

    #[must_use]
    pub fn residency(&self) -> Residency {
        match self.buffer {
            Buffer::Host(_) => Residency::Host,
            Buffer::Device(_) => Residency::Device,
        }
    }

    #[must_use]
    pub fn is_padded(&self) -> bool {
        self.padded
    }

    #[must_use]
    pub fn device_buffer(&self) -> Option<DeviceBuffer> {
        match self.buffer {
            Buffer::Host(_) => None,
            Buffer::Device(buffer) => buffer,
        }
    }

    #[must_use]
    pub fn device_handle(&self) -> Option<DeviceBufferId> {
        self.device_buffer().map(|buffer| buffer.id)
    }

    #[must_use]
    pub fn planes(&self) -> Option<&[HostData]> {
        match &self.buffer {
            Buffer::Host(planes) => Some(planes),
            Buffer::Device(_) => None,
        }
    }

    pub fn planes_mut(&mut self) -> Option<&mut [HostData]> {
        match &mut self.buffer {
            Buffer::Host(planes) => Some(planes),
            Buffer::Device(_) => None,
        }
    }

    /// Extents of the current element view: the full shape for the real view
    /// of a padded buffer, the declared extents otherwise.
    #[must_use]
    pub fn logical_extents(&self) -> Extents {
        match (&self.full_extents, self.padded, self.element.domain) {
            (Some(full), true, Domain::Real) => full.clone(),
            _ => self.extents.clone(),
        }
    }

    /// Element strides of the current view into the buffer.
    #[must_use]
    pub fn physical_strides(&self) -> Strides {
        if let Some(strides) = &self.strides {
            return strides.clone();
        }
        let logical = self.logical_extents();
        if self.padded && self.element.domain == Domain::Real {
            Strides::padded(&logical, self.extents.last().saturating_mul(2))
        } else {
            Strides::contiguous(&logical)
        }
    }

    /// True when elements are interleaved and packed back to back, the only
    /// form backends consume directly.
    #[must_use]
    pub fn is_dense(&self) -> bool {
        self.layout != StorageLayout::SoA
            && self.physical_strides() == Strides::contiguous(&self.logical_extents())
    }

    /// Scalars each host plane must hold for the current view.
    #[must_use]
    pub fn required_scalars(&self) -> usize {
        let span = self.physical_strides().span(&self.logical_extents());
        match self.layout {
            StorageLayout::SoA => span,
            StorageLayout::AoS | StorageLayout::Strided => span * self.element.scalars(),
        }
    }

    pub(crate) fn check_capacity(&self, role: OperandRole) -> FftResult<()> {
        let Some(planes) = self.planes() else {
            return Ok(());
        };
        let required = self.required_scalars();
        let expected_planes = match self.layout {
            StorageLayout::SoA => 2,
            StorageLayout::AoS | StorageLayout::Strided => 1,
        };
        let available = if planes.len() < expected_planes {
            0
        } else {
            planes[..expected_planes]
                .iter()
                .map(HostData::len)
                .min()
                .unwrap_or(0)
        };
        if available < required {
            return Err(FftError::BufferTooSmall {
                role,
                required,
                available,
            });
        }
        Ok(())
    }

    /// Accessor over the host planes, `None` for device operands.
    #[must_use]
    pub fn accessor(&self) -> Option<OperandAccessor> {
        self.planes()?;
        Some(OperandAccessor::new(
            self.layout,
            self.element.domain,
            self.physical_strides(),
        ))
    }

    /// Value at `idx` of the current view.
    #[must_use]
    pub fn get(&self, idx: &[usize]) -> Option<Complex64> {
        let accessor = self.accessor()?;
        Some(accessor.read(idx, self.planes()?))
    }

    /// Every value of the current view in row-major order.
    #[must_use]
    pub fn values(&self) -> Option<Vec<Complex64>> {
        let accessor = self.accessor()?;
        let planes = self.planes()?;
        Some(
            self.logical_extents()
                .indices()
                .map(|idx| accessor.read(&idx, planes))
                .collect(),
        )
    }

    /// Real parts of [`Operand::values`].
    #[must_use]
    pub fn real_values(&self) -> Option<Vec<f64>> {
        Some(self.values()?.into_iter().map(|z| z.re).collect())
    }

    /// Populate the operand from a function of the index.
    pub fn fill_with<F>(&mut self, generator: F) -> FftResult<()>
    where
        F: Fn(&[usize]) -> Complex64,
    {
        let accessor = self.host_accessor()?;
        let extents = self.logical_extents();
        let planes = self.host_planes_mut()?;
        copy_with(&extents, &FunctorAccessor, &generator, &accessor, planes);
        Ok(())
    }

    /// Copy a file collaborator's data into this host operand.
    pub fn load_from<S: FileSource + ?Sized>(&mut self, source: &S) -> FftResult<()> {
        if !source.is_open() {
            return Err(FftError::Unsupported {
                detail: "file source is not open",
            });
        }
        let extents = self.logical_extents();
        let file_extents = source.extents();
        if file_extents.rank() != extents.rank() {
            return Err(FftError::RankMismatch {
                expected: extents.rank(),
                actual: file_extents.rank(),
            });
        }
        for dim in 0..extents.rank() {
            if file_extents[dim] != extents[dim] {
                return Err(FftError::DimensionMismatch {
                    dim,
                    expected: extents[dim],
                    actual: file_extents[dim],
                });
            }
        }
        let accessor = self.host_accessor()?;
        let planes = self.host_planes_mut()?;
        copy_with(&extents, &FileAccessor, source, &accessor, planes);
        Ok(())
    }

    /// Switch a padded host operand, or a device operand, between its real
    /// and complex views.
    pub fn view_as(&mut self, domain: Domain) -> FftResult<()> {
        if !self.padded && self.residency() == Residency::Host {
            return Err(FftError::Unsupported {
                detail: "only padded in-place buffers can change element view",
            });
        }
        self.element.domain = domain;
        Ok(())
    }

    /// Contiguous interleaved host copy of the current view.
    pub(crate) fn dense_copy(&self) -> FftResult<Self> {
        let mut dense = Self::zeros(self.logical_extents(), self.element);
        self.copy_into(&mut dense)?;
        Ok(dense)
    }

    /// Element-wise copy of the current view into `target`, which must have
    /// the same logical extents.
    pub(crate) fn copy_into(&self, target: &mut Self) -> FftResult<()> {
        let reader = self.host_accessor()?;
        let writer = target.host_accessor()?;
        let extents = self.logical_extents();
        let planes = self.planes().ok_or(FftError::Unsupported {
            detail: "device operands cannot be read on the host",
        })?;
        let target_planes = target.host_planes_mut()?;
        copy_with(&extents, &reader, planes, &writer, target_planes);
        Ok(())
    }

    /// Multiply every element of the current view by `factor`.
    pub(crate) fn scale(&mut self, factor: f64) -> FftResult<()> {
        let accessor = self.host_accessor()?;
        let extents = self.logical_extents();
        let planes = self.host_planes_mut()?;
        for idx in extents.indices() {
            let value = accessor.read(&idx, planes);
            accessor.write(&idx, planes, value * factor);
        }
        Ok(())
    }

    pub(crate) fn all_finite(&self) -> bool {
        self.values()
            .is_none_or(|values| values.iter().all(|z| z.re.is_finite() && z.im.is_finite()))
    }

    pub(crate) fn signature(&self) -> OperandSignature {
        OperandSignature {
            residency: self.residency(),
            layout: self.layout,
            precision: self.element.precision,
            extents: self.extents.clone(),
            padded: self.padded,
            plane_lens: self
                .planes()
                .map(|planes| planes.iter().map(HostData::len).collect())
                .unwrap_or_default(),
            device: self.device_buffer(),
        }
    }

    fn host_accessor(&self) -> FftResult<OperandAccessor> {
        self.accessor().ok_or(FftError::Unsupported {
            detail: "device operands cannot be accessed on the host",
        })
    }

    fn host_planes_mut(&mut self) -> FftResult<&mut [HostData]> {
        self.planes_mut().ok_or(FftError::Unsupported {
            detail: "device operands cannot be accessed on the host",
        })
    }
}
