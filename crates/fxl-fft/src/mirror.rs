//! Device collaborators that keep "device" memory in host RAM.
//!
//! [`HostMirrorDevice`] behaves like a device library with explicit buffers
//! and logs every operation; [`MirrorDeviceBackend`] executes plans on those
//! buffers with the fastest-first extent order and 32-bit size ceiling of a
//! native device library.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{ExecIo, ExtentOrder, PlanHandle, PlanRequest, TransformBackend};
use crate::device::{DeviceBufferId, DeviceMemory, PitchedCopy};
use crate::element::Residency;
use crate::error::BackendError;
use crate::kernel::{HostKernel, KernelPlan};
use crate::operand::HostData;
use crate::sizing::SizeLimits;

/// One logged device operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEvent {
    Allocate { buffer: DeviceBufferId, bytes: usize },
    Free { buffer: DeviceBufferId },
    HostToDevice { buffer: DeviceBufferId, bytes: usize, pitched: bool },
    DeviceToHost { buffer: DeviceBufferId, bytes: usize, pitched: bool },
    DeviceToDevice { dst: DeviceBufferId, src: DeviceBufferId, bytes: usize },
    Synchronize,
    DestroyPlan { plan: PlanHandle },
}

#[derive(Debug, Default)]
struct MirrorState {
    next_id: u64,
    buffers: HashMap<DeviceBufferId, Vec<u8>>,
    events: Vec<DeviceEvent>,
}

#[derive(Debug, Default)]
pub struct HostMirrorDevice {
    state: Mutex<MirrorState>,
    asynchronous: bool,
}

impl HostMirrorDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report copies and kernels as asynchronous, so callers must synchronize.
    #[must_use]
    pub fn with_async(mut self, asynchronous: bool) -> Self {
        self.asynchronous = asynchronous;
        self
    }

    /// Every operation logged so far, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.lock().map(|state| state.events.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.lock().map(|state| state.buffers.len()).unwrap_or(0)
    }

    /// Bytes currently held by `buffer`, without logging a copy.
    pub fn snapshot(&self, buffer: DeviceBufferId) -> Result<Vec<u8>, BackendError> {
        let state = self.lock()?;
        state
            .buffers
            .get(&buffer)
            .cloned()
            .ok_or_else(|| unknown(buffer))
    }

    /// Overwrite the start of `buffer` with `bytes`, without logging a copy.
    pub fn store(&self, buffer: DeviceBufferId, bytes: &[u8]) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        let target = state.buffers.get_mut(&buffer).ok_or_else(|| unknown(buffer))?;
        copy_prefix(target, bytes)
    }

    pub(crate) fn record(&self, event: DeviceEvent) {
        if let Ok(mut state) = self.lock() {
            state.events.push(event);
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MirrorState>, BackendError> {
        self.state
            .lock()
            .map_err(|_| BackendError::new("mirror device state poisoned"))
    }
}

fn unknown(buffer: DeviceBufferId) -> BackendError {
    BackendError::new(format!("unknown device buffer {buffer}"))
}

fn copy_prefix(target: &mut [u8], bytes: &[u8]) -> Result<(), BackendError> {
    if bytes.len() > target.len() {
        return Err(BackendError::new(format!(
            "copy of {} bytes into a buffer of {}",
            bytes.len(),
            target.len()
        )));
    }
    target[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

impl DeviceMemory for HostMirrorDevice {
    fn name(&self) -> &str {
        "host-mirror"
    }

    fn allocate(&self, bytes: usize) -> Result<DeviceBufferId, BackendError> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let buffer = DeviceBufferId(state.next_id);
        state.buffers.insert(buffer, vec![0; bytes]);
        state.events.push(DeviceEvent::Allocate { buffer, bytes });
        Ok(buffer)
    }

    fn free(&self, buffer: DeviceBufferId) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        state.buffers.remove(&buffer).ok_or_else(|| unknown(buffer))?;
        state.events.push(DeviceEvent::Free { buffer });
        Ok(())
    }

    fn copy_host_to_device(&self, dst: DeviceBufferId, src: &[u8]) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        let target = state.buffers.get_mut(&dst).ok_or_else(|| unknown(dst))?;
        copy_prefix(target, src)?;
        state.events.push(DeviceEvent::HostToDevice {
            buffer: dst,
            bytes: src.len(),
            pitched: false,
        });
        Ok(())
    }

    fn copy_device_to_host(&self, dst: &mut [u8], src: DeviceBufferId) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        let source = state.buffers.get(&src).ok_or_else(|| unknown(src))?;
        if dst.len() > source.len() {
            return Err(BackendError::new(format!(
                "copy of {} bytes out of a buffer of {}",
                dst.len(),
                source.len()
            )));
        }
        dst.copy_from_slice(&source[..dst.len()]);
        state.events.push(DeviceEvent::DeviceToHost {
            buffer: src,
            bytes: dst.len(),
            pitched: false,
        });
        Ok(())
    }

    fn copy_device_to_device(
        &self,
        dst: DeviceBufferId,
        src: DeviceBufferId,
        bytes: usize,
    ) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        let source = state.buffers.get(&src).ok_or_else(|| unknown(src))?;
        if bytes > source.len() {
            return Err(BackendError::new(format!(
                "copy of {bytes} bytes out of a buffer of {}",
                source.len()
            )));
        }
        let chunk = source[..bytes].to_vec();
        let target = state.buffers.get_mut(&dst).ok_or_else(|| unknown(dst))?;
        copy_prefix(target, &chunk)?;
        state
            .events
            .push(DeviceEvent::DeviceToDevice { dst, src, bytes });
        Ok(())
    }

    fn copy_host_to_device_pitched(
        &self,
        dst: DeviceBufferId,
        src: &[u8],
        copy: PitchedCopy,
    ) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        let target = state.buffers.get_mut(&dst).ok_or_else(|| unknown(dst))?;
        copy.apply(target, src)?;
        state.events.push(DeviceEvent::HostToDevice {
            buffer: dst,
            bytes: copy.width * copy.height,
            pitched: true,
        });
        Ok(())
    }

    fn copy_device_to_host_pitched(
        &self,
        dst: &mut [u8],
        src: DeviceBufferId,
        copy: PitchedCopy,
    ) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        let source = state.buffers.get(&src).ok_or_else(|| unknown(src))?;
        copy.apply(dst, source)?;
        state.events.push(DeviceEvent::DeviceToHost {
            buffer: src,
            bytes: copy.width * copy.height,
            pitched: true,
        });
        Ok(())
    }

    fn synchronize(&self) -> Result<(), BackendError> {
        self.lock()?.events.push(DeviceEvent::Synchronize);
        Ok(())
    }

    fn is_async(&self) -> bool {
        self.asynchronous
    }
}

/// Device-style backend executing on [`HostMirrorDevice`] buffers.
#[derive(Debug)]
pub struct MirrorDeviceBackend {
    device: Arc<HostMirrorDevice>,
    kernel: HostKernel,
    plans: HashMap<PlanHandle, KernelPlan>,
    next_plan: u64,
}

impl MirrorDeviceBackend {
    #[must_use]
    pub fn new(device: Arc<HostMirrorDevice>) -> Self {
        Self {
            device,
            kernel: HostKernel::default(),
            plans: HashMap::new(),
            next_plan: 0,
        }
    }

    #[must_use]
    pub fn device(&self) -> &Arc<HostMirrorDevice> {
        &self.device
    }
}

impl TransformBackend for MirrorDeviceBackend {
    fn name(&self) -> &'static str {
        "mirror-device"
    }

    fn residency(&self) -> Residency {
        Residency::Device
    }

    fn extent_order(&self) -> ExtentOrder {
        ExtentOrder::FastestFirst
    }

    fn size_limits(&self) -> SizeLimits {
        SizeLimits::device()
    }

    fn create_plan(&mut self, request: &PlanRequest) -> Result<PlanHandle, BackendError> {
        if request.order != ExtentOrder::FastestFirst {
            return Err(BackendError::new("mirror device expects fastest-first extents"));
        }
        let plan = KernelPlan::from_request(request)?;
        self.next_plan += 1;
        let handle = PlanHandle(self.next_plan);
        debug!(plan = handle.0, extents = ?request.extents, "mirror device plan created");
        self.plans.insert(handle, plan);
        Ok(handle)
    }

    fn execute(&mut self, plan: PlanHandle, io: ExecIo<'_>) -> Result<(), BackendError> {
        let Some(kernel_plan) = self.plans.get(&plan) else {
            return Err(BackendError::new(format!("unknown plan handle {}", plan.0)));
        };
        let ExecIo::Device { input, output } = io else {
            return Err(BackendError::new("mirror device executes on device buffers only"));
        };
        if kernel_plan.in_place != (input == output) {
            return Err(BackendError::new("buffer count does not match plan placement"));
        }
        let precision = kernel_plan.precision;
        let mut source = HostData::from_bytes(precision, &self.device.snapshot(input)?);
        if input == output {
            self.kernel.execute(kernel_plan, &mut source, None)?;
            self.device.store(input, source.as_bytes())
        } else {
            let mut target = HostData::from_bytes(precision, &self.device.snapshot(output)?);
            self.kernel.execute(kernel_plan, &mut source, Some(&mut target))?;
            self.device.store(output, target.as_bytes())
        }
    }

    fn destroy_plan(&mut self, plan: PlanHandle) {
        if self.plans.remove(&plan).is_some() {
            self.device.record(DeviceEvent::DestroyPlan { plan });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{DeviceEvent, HostMirrorDevice, MirrorDeviceBackend};
    use crate::backend::{ExecIo, ExtentOrder, PlanRequest, TransformBackend};
    use crate::device::{DeviceMemory, PitchedCopy};
    use crate::{Direction, Extents, Precision, TransformDescriptor, negotiate};

    #[test]
    fn buffers_copy_and_log_in_order() {
        let device = HostMirrorDevice::new();
        let a = device.allocate(8).expect("allocate");
        let b = device.allocate(8).expect("allocate");
        device
            .copy_host_to_device(a, &[1, 2, 3, 4, 5, 6, 7, 8])
            .expect("h2d");
        device.copy_device_to_device(b, a, 4).expect("d2d");
        let mut out = [0u8; 8];
        device.copy_device_to_host(&mut out, b).expect("d2h");
        assert_eq!(out, [1, 2, 3, 4, 0, 0, 0, 0]);
        device.free(a).expect("free");
        assert_eq!(device.live_buffers(), 1);
        let events = device.events();
        assert_eq!(events[0], DeviceEvent::Allocate { buffer: a, bytes: 8 });
        assert_eq!(
            events[3],
            DeviceEvent::DeviceToDevice {
                dst: b,
                src: a,
                bytes: 4
            }
        );
        assert_eq!(events.last(), Some(&DeviceEvent::Free { buffer: a }));
        assert!(device.free(a).is_err());
    }

    #[test]
    fn pitched_round_trip_restores_rows() {
        let device = HostMirrorDevice::new();
        let buffer = device.allocate(12).expect("allocate");
        let rows_in = PitchedCopy {
            width: 4,
            height: 2,
            src_pitch: 4,
            dst_pitch: 6,
        };
        device
            .copy_host_to_device_pitched(buffer, &[1, 2, 3, 4, 5, 6, 7, 8], rows_in)
            .expect("h2d pitched");
        assert_eq!(
            device.snapshot(buffer).expect("known buffer"),
            vec![1, 2, 3, 4, 0, 0, 5, 6, 7, 8, 0, 0]
        );
        let rows_out = PitchedCopy {
            width: 4,
            height: 2,
            src_pitch: 6,
            dst_pitch: 4,
        };
        let mut out = [0u8; 8];
        device
            .copy_device_to_host_pitched(&mut out, buffer, rows_out)
            .expect("d2h pitched");
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn backend_rejects_row_major_requests_and_logs_plan_destruction() {
        let device = Arc::new(HostMirrorDevice::new());
        let mut backend = MirrorDeviceBackend::new(Arc::clone(&device));
        let desc = TransformDescriptor::c2c(Direction::Forward, 2, Precision::Double)
            .expect("valid");
        let layout = negotiate(&desc, &Extents::new([2, 4]).expect("valid"), None, None)
            .expect("valid");
        assert!(
            backend
                .create_plan(&PlanRequest::new(&layout, ExtentOrder::SlowestFirst, false))
                .is_err()
        );
        let plan = backend
            .create_plan(&PlanRequest::new(&layout, ExtentOrder::FastestFirst, true))
            .expect("plan");
        let buffer = device.allocate(2 * 4 * 16).expect("allocate");
        backend
            .execute(
                plan,
                ExecIo::Device {
                    input: buffer,
                    output: buffer,
                },
            )
            .expect("zeros transform to zeros");
        backend.destroy_plan(plan);
        assert_eq!(
            device.events().last(),
            Some(&DeviceEvent::DestroyPlan { plan })
        );
    }
}
