//! Device memory collaborator interface.

use std::fmt::{Debug, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// Opaque id of a buffer owned by a [`DeviceMemory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceBufferId(pub u64);

impl Display for DeviceBufferId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "dev#{}", self.0)
    }
}

/// A device allocation and its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBuffer {
    pub id: DeviceBufferId,
    pub bytes: usize,
}

/// 2-D copy of `height` rows of `width` bytes between buffers whose rows
/// start every `src_pitch` and `dst_pitch` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitchedCopy {
    pub width: usize,
    pub height: usize,
    pub src_pitch: usize,
    pub dst_pitch: usize,
}

impl PitchedCopy {
    /// Bytes the source must hold.
    #[must_use]
    pub fn src_extent(&self) -> usize {
        self.extent(self.src_pitch)
    }

    /// Bytes the destination must hold.
    #[must_use]
    pub fn dst_extent(&self) -> usize {
        self.extent(self.dst_pitch)
    }

    fn extent(&self, pitch: usize) -> usize {
        match self.height {
            0 => 0,
            rows => (rows - 1) * pitch + self.width,
        }
    }

    /// Row-by-row copy between two host byte slices.
    pub fn apply(&self, dst: &mut [u8], src: &[u8]) -> Result<(), BackendError> {
        if self.width > self.src_pitch || self.width > self.dst_pitch {
            return Err(BackendError::new("pitched copy width exceeds pitch"));
        }
        if src.len() < self.src_extent() || dst.len() < self.dst_extent() {
            return Err(BackendError::new(format!(
                "pitched copy out of bounds: src {} of {}, dst {} of {}",
                self.src_extent(),
                src.len(),
                self.dst_extent(),
                dst.len()
            )));
        }
        for row in 0..self.height {
            let from = row * self.src_pitch;
            let to = row * self.dst_pitch;
            dst[to..to + self.width].copy_from_slice(&src[from..from + self.width]);
        }
        Ok(())
    }
}

/// Device memory operations used by the orchestrator.
///
/// Implementations may be asynchronous; callers must [`synchronize`] before
/// reading results that a device-side operation produced.
///
/// [`synchronize`]: DeviceMemory::synchronize
pub trait DeviceMemory: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn allocate(&self, bytes: usize) -> Result<DeviceBufferId, BackendError>;

    fn free(&self, buffer: DeviceBufferId) -> Result<(), BackendError>;

    fn copy_host_to_device(&self, dst: DeviceBufferId, src: &[u8]) -> Result<(), BackendError>;

    fn copy_device_to_host(&self, dst: &mut [u8], src: DeviceBufferId) -> Result<(), BackendError>;

    fn copy_device_to_device(
        &self,
        dst: DeviceBufferId,
        src: DeviceBufferId,
        bytes: usize,
    ) -> Result<(), BackendError>;

    fn copy_host_to_device_pitched(
        &self,
        dst: DeviceBufferId,
        src: &[u8],
        copy: PitchedCopy,
    ) -> Result<(), BackendError>;

    fn copy_device_to_host_pitched(
        &self,
        dst: &mut [u8],
        src: DeviceBufferId,
        copy: PitchedCopy,
    ) -> Result<(), BackendError>;

    fn synchronize(&self) -> Result<(), BackendError>;

    /// True if copies and kernels may still be in flight when a call returns.
    fn is_async(&self) -> bool {
        false
    }
}
