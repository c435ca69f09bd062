//! Transform lifecycle: negotiate, plan, allocate, execute, destroy.
//!
//! ```text
//! Unconfigured -bind-> Negotiated -plan-> Planned -allocate-> Ready <-run-> Executing
//!                                            \                  |
//!                                             +---> Destroyed <-+ teardown
//! ```

use std::sync::Arc;
use std::time::Instant;

use fxl_runtime::{RuntimeMode, TraceOutcome, TransformTrace, next_operation_id};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::Normalization;
use crate::backend::{ExecIo, PlanHandle, PlanRequest};
use crate::context::BackendContext;
use crate::descriptor::TransformDescriptor;
use crate::device::{DeviceBuffer, DeviceBufferId, DeviceMemory, PitchedCopy};
use crate::element::{Residency, StorageLayout};
use crate::error::{BackendError, FftError, FftResult};
use crate::helpers::normalization_scale;
use crate::negotiate::{NegotiatedLayout, negotiate};
use crate::operand::{HostData, Operand, OperandRole, OperandSignature};
use crate::plan::PlanKey;
use crate::sizing::{
    AllocationPlan, MemorySizer, OperandProfile, Placement, SizeLimits, in_place_bytes, size_of,
};

/// Lifecycle state of a [`Transform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransformState {
    Unconfigured,
    Negotiated,
    Planned,
    Ready,
    Executing,
    Destroyed,
}

/// Per-transform options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformOptions {
    pub mode: RuntimeMode,
    pub normalization: Normalization,
    /// Run out-of-place host operands in place on one combined device buffer.
    pub inplace_for_host: bool,
    /// Overrides the context's size ceiling.
    pub size_limits: Option<SizeLimits>,
    /// Reject non-finite host input even in strict mode.
    pub check_finite: bool,
}

impl TransformOptions {
    #[must_use]
    pub fn with_mode(mut self, mode: RuntimeMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    #[must_use]
    pub fn with_inplace_for_host(mut self, inplace_for_host: bool) -> Self {
        self.inplace_for_host = inplace_for_host;
        self
    }

    #[must_use]
    pub fn with_size_limits(mut self, size_limits: SizeLimits) -> Self {
        self.size_limits = Some(size_limits);
        self
    }

    #[must_use]
    pub fn with_check_finite(mut self, check_finite: bool) -> Self {
        self.check_finite = check_finite;
        self
    }
}

/// Outcome of one successful [`Transform::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub operation_id: String,
    pub staged_bytes: usize,
    /// Results still sit on an asynchronous device; call
    /// [`BackendContext::synchronize`] before reading them.
    pub requires_sync: bool,
    pub plan_cache_hit: bool,
}

#[derive(Debug)]
enum Staging {
    Host(Operand),
    Device(DeviceBuffer),
}

impl Staging {
    fn device_buffer(&self) -> Option<DeviceBuffer> {
        match self {
            Self::Device(buffer) => Some(*buffer),
            Self::Host(_) => None,
        }
    }
}

/// One configured transform bound to a context and a pair of operand shapes.
#[derive(Debug)]
pub struct Transform {
    context: BackendContext,
    descriptor: TransformDescriptor,
    options: TransformOptions,
    state: TransformState,
    layout: Option<NegotiatedLayout>,
    input_profile: Option<OperandProfile>,
    output_profile: Option<OperandProfile>,
    input_signature: Option<OperandSignature>,
    output_signature: Option<OperandSignature>,
    plan: Option<PlanHandle>,
    plan_cache_hit: bool,
    allocation: Option<AllocationPlan>,
    input_staging: Option<Staging>,
    output_staging: Option<Staging>,
    combined: Option<DeviceBuffer>,
}

impl Transform {
    #[must_use]
    pub fn new(
        context: &BackendContext,
        descriptor: TransformDescriptor,
        options: TransformOptions,
    ) -> Self {
        Self {
            context: context.clone(),
            descriptor,
            options,
            state: TransformState::Unconfigured,
            layout: None,
            input_profile: None,
            output_profile: None,
            input_signature: None,
            output_signature: None,
            plan: None,
            plan_cache_hit: false,
            allocation: None,
            input_staging: None,
            output_staging: None,
            combined: None,
        }
    }

    /// `new`, `bind`, `plan` and `allocate` in one step.
    pub fn configure(
        context: &BackendContext,
        descriptor: TransformDescriptor,
        options: TransformOptions,
        input: &Operand,
        output: Option<&Operand>,
    ) -> FftResult<Self> {
        let mut transform = Self::new(context, descriptor, options);
        transform.bind(input, output)?;
        transform.plan()?;
        transform.allocate()?;
        Ok(transform)
    }

    #[must_use]
    pub fn state(&self) -> TransformState {
        self.state
    }

    #[must_use]
    pub fn descriptor(&self) -> &TransformDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn options(&self) -> &TransformOptions {
        &self.options
    }

    #[must_use]
    pub fn layout(&self) -> Option<&NegotiatedLayout> {
        self.layout.as_ref()
    }

    #[must_use]
    pub fn allocation(&self) -> Option<&AllocationPlan> {
        self.allocation.as_ref()
    }

    /// Negotiate extents against the operands and check that they can be
    /// used. A failed bind leaves the transform unconfigured.
    pub fn bind(&mut self, input: &Operand, output: Option<&Operand>) -> FftResult<&NegotiatedLayout> {
        self.expect_state("bind", TransformState::Unconfigured)?;
        let in_place = self.descriptor.is_in_place();
        if in_place && output.is_some() {
            return Err(FftError::InvalidDescriptor {
                detail: "in-place transforms take a single operand",
            });
        }
        if !in_place && output.is_none() {
            return Err(FftError::InvalidDescriptor {
                detail: "out-of-place transforms need an output operand",
            });
        }
        if in_place {
            self.check_in_place_operand(input)?;
        }

        let input_extents = if in_place {
            input.extents().clone()
        } else {
            input.logical_extents()
        };
        let output_extents = output.map(Operand::logical_extents);
        let layout = negotiate(
            &self.descriptor,
            &input_extents,
            output_extents.as_ref(),
            input.full_extents(),
        )?;

        self.check_operand(OperandRole::Input, input, &layout)?;
        if let Some(output) = output {
            self.check_operand(OperandRole::Output, output, &layout)?;
        }

        self.input_profile = Some(OperandProfile::of(input, in_place));
        self.output_profile = output.map(|operand| OperandProfile::of(operand, in_place));
        self.input_signature = Some(input.signature());
        self.output_signature = output.map(Operand::signature);
        self.state = TransformState::Negotiated;
        debug!(
            kind = self.descriptor.kind().name(),
            full = %layout.full_extents,
            backend = self.context.backend_name(),
            "transform bound"
        );
        Ok(self.layout.insert(layout))
    }

    /// Create the backend plan over the negotiated full extents.
    pub fn plan(&mut self) -> FftResult<()> {
        self.expect_state("plan", TransformState::Negotiated)?;
        let (layout, input_profile) = match (&self.layout, self.input_profile) {
            (Some(layout), Some(profile)) => (layout, profile),
            _ => return Err(self.invalid_state("plan")),
        };
        let executes_in_place = self.descriptor.is_in_place()
            || self
                .sizer()
                .uses_combined(layout, &input_profile, self.output_profile.as_ref());
        let request = PlanRequest::new(layout, self.context.extent_order(), executes_in_place);
        let key = PlanKey::new(layout, executes_in_place, self.context.backend_name());

        let created = match self.context.backend() {
            Ok(mut backend) => backend.create_plan(&request).map_err(|err| err.message),
            Err(err) => Err(err.to_string()),
        };
        match created {
            Ok(handle) => {
                self.plan_cache_hit = self.context.touch_plan_cache(&key);
                debug!(
                    plan = handle.0,
                    extents = ?request.extents,
                    in_place = executes_in_place,
                    cache_hit = self.plan_cache_hit,
                    "plan created"
                );
                self.plan = Some(handle);
                self.state = TransformState::Planned;
                Ok(())
            }
            Err(message) => {
                warn!(backend = self.context.backend_name(), %message, "plan creation failed");
                self.release();
                Err(FftError::PlanCreation {
                    backend: self.context.backend_name().to_string(),
                    message,
                })
            }
        }
    }

    /// Size every buffer and allocate staging. On failure partial
    /// allocations are freed and the transform is destroyed.
    pub fn allocate(&mut self) -> FftResult<&AllocationPlan> {
        self.expect_state("allocate", TransformState::Planned)?;
        let sized = match (&self.layout, self.input_profile) {
            (Some(layout), Some(profile)) => {
                self.sizer()
                    .plan(layout, &profile, self.output_profile.as_ref())
            }
            _ => Err(self.invalid_state("allocate")),
        };
        let allocation = match sized.and_then(|plan| self.allocate_staging(&plan).map(|()| plan)) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(error = %err, "transform allocation failed");
                self.release();
                return Err(err);
            }
        };
        self.state = TransformState::Ready;
        Ok(self.allocation.insert(allocation))
    }

    /// Execute the transform on operands with the shapes given to `bind`.
    ///
    /// Errors leave staging intact and the transform `Ready`.
    #[instrument(level = "debug", skip_all, fields(kind = self.descriptor.kind().name()))]
    pub fn run(&mut self, input: &mut Operand, output: Option<&mut Operand>) -> FftResult<RunReport> {
        self.expect_state("run", TransformState::Ready)?;
        self.check_signatures(input, output.as_deref())?;

        let operation_id = next_operation_id();
        let started = Instant::now();
        self.state = TransformState::Executing;
        let result = self.execute(input, output);
        self.state = TransformState::Ready;
        let timing_ns = started.elapsed().as_nanos();

        let staged_bytes = self.allocation.map_or(0, |plan| plan.staged_bytes());
        if let Some(layout) = &self.layout {
            self.context.record_trace(TransformTrace {
                operation_id: operation_id.clone(),
                kind: self.descriptor.kind().name().to_string(),
                direction: self.descriptor.direction().name().to_string(),
                in_place: self.descriptor.is_in_place(),
                full_extents: layout.full_extents.dims().to_vec(),
                packed_extents: layout.packed_extents.dims().to_vec(),
                backend: self.context.backend_name().to_string(),
                staged_bytes,
                plan_cache_hit: self.plan_cache_hit,
                mode: self.options.mode,
                timing_ns,
                outcome: match &result {
                    Ok(_) => TraceOutcome::Completed,
                    Err(err) => TraceOutcome::Failed {
                        message: err.to_string(),
                    },
                },
            });
        }

        match result {
            Ok(requires_sync) => {
                debug!(%operation_id, staged_bytes, requires_sync, timing_ns, "transform executed");
                Ok(RunReport {
                    operation_id,
                    staged_bytes,
                    requires_sync,
                    plan_cache_hit: self.plan_cache_hit,
                })
            }
            Err(err) => {
                warn!(%operation_id, error = %err, "transform execution failed");
                Err(err)
            }
        }
    }

    /// Free staging buffers, then destroy the plan. Idempotent.
    pub fn teardown(&mut self) {
        if self.state != TransformState::Destroyed {
            self.release();
        }
    }

    fn release(&mut self) {
        let buffers: Vec<DeviceBuffer> = [
            self.input_staging.take().and_then(|staging| staging.device_buffer()),
            self.output_staging.take().and_then(|staging| staging.device_buffer()),
            self.combined.take(),
        ]
        .into_iter()
        .flatten()
        .collect();
        if let Some(device) = self.context.device() {
            for buffer in buffers {
                if let Err(err) = device.free(buffer.id) {
                    warn!(buffer = %buffer.id, message = %err.message, "staging free failed");
                }
            }
        }
        if let Some(plan) = self.plan.take() {
            match self.context.backend() {
                Ok(mut backend) => backend.destroy_plan(plan),
                Err(err) => warn!(plan = plan.0, error = %err, "plan leaked"),
            }
        }
        self.state = TransformState::Destroyed;
        debug!(backend = self.context.backend_name(), "transform destroyed");
    }

    fn sizer(&self) -> MemorySizer {
        let limits = self
            .options
            .size_limits
            .unwrap_or_else(|| self.context.size_limits());
        MemorySizer::new(limits, self.context.residency())
            .with_inplace_for_host(self.options.inplace_for_host)
    }

    fn expect_state(&self, operation: &'static str, expected: TransformState) -> FftResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    fn invalid_state(&self, operation: &'static str) -> FftError {
        FftError::InvalidState {
            operation,
            state: self.state,
        }
    }

    fn check_in_place_operand(&self, operand: &Operand) -> FftResult<()> {
        if operand.residency() == Residency::Device {
            return Ok(());
        }
        if operand.layout() != StorageLayout::AoS {
            return Err(FftError::Unsupported {
                detail: "in-place transforms need an interleaved contiguous buffer",
            });
        }
        if self.descriptor.is_real() && !operand.is_padded() {
            return Err(FftError::Unsupported {
                detail: "in-place real transforms need a padded buffer",
            });
        }
        Ok(())
    }

    fn check_operand(
        &self,
        role: OperandRole,
        operand: &Operand,
        layout: &NegotiatedLayout,
    ) -> FftResult<()> {
        let expected = match role {
            OperandRole::Input => layout.input_kind(),
            OperandRole::Output => layout.output_kind(),
        };
        if operand.element() != expected {
            return Err(FftError::ElementMismatch {
                role,
                expected,
                actual: operand.element(),
            });
        }
        if operand.residency() == Residency::Device {
            let Some(buffer) = operand.device_buffer() else {
                return Err(FftError::NoDevicePointer { role });
            };
            if self.context.residency() == Residency::Host {
                return Err(FftError::Unsupported {
                    detail: "host backends cannot address device-resident operands",
                });
            }
            let result_on_device = role == OperandRole::Output || self.descriptor.is_in_place();
            if result_on_device && self.options.normalization != Normalization::Unscaled {
                return Err(FftError::Unsupported {
                    detail: "normalization applies to host-visible outputs only",
                });
            }
            return self.check_device_capacity(role, buffer, layout);
        }
        if self.options.mode.is_hardened() && operand.layout() == StorageLayout::Strided {
            operand
                .physical_strides()
                .validate_non_overlapping(&operand.logical_extents())?;
        }
        operand.check_capacity(role)
    }

    /// A caller-owned device buffer must hold the negotiated shape: the
    /// larger of both views for in-place transforms.
    fn check_device_capacity(
        &self,
        role: OperandRole,
        buffer: DeviceBuffer,
        layout: &NegotiatedLayout,
    ) -> FftResult<()> {
        let sizer = self.sizer();
        let (extents, kind) = match role {
            OperandRole::Input => (&layout.input_extents, layout.input_kind()),
            OperandRole::Output => (&layout.output_extents, layout.output_kind()),
        };
        let required = if self.descriptor.is_in_place() {
            in_place_bytes(layout, sizer.limits())?
        } else {
            size_of(extents, kind, sizer.limits())?
        };
        if buffer.bytes < required {
            let scalar = kind.precision.scalar_bytes();
            return Err(FftError::BufferTooSmall {
                role,
                required: required / scalar,
                available: buffer.bytes / scalar,
            });
        }
        Ok(())
    }

    fn check_signatures(&self, input: &Operand, output: Option<&Operand>) -> FftResult<()> {
        if self.input_signature.as_ref() != Some(&input.signature()) {
            return Err(FftError::OperandChanged {
                role: OperandRole::Input,
            });
        }
        match (&self.output_signature, output) {
            (Some(bound), Some(output)) if *bound == output.signature() => {}
            (None, None) => {}
            (None, Some(_)) => {
                return Err(FftError::InvalidDescriptor {
                    detail: "in-place transforms take a single operand",
                });
            }
            _ => {
                return Err(FftError::OperandChanged {
                    role: OperandRole::Output,
                });
            }
        }
        let Some(layout) = &self.layout else {
            return Err(self.invalid_state("run"));
        };
        if input.element() != layout.input_kind() {
            return Err(FftError::ElementMismatch {
                role: OperandRole::Input,
                expected: layout.input_kind(),
                actual: input.element(),
            });
        }
        Ok(())
    }

    fn allocate_staging(&mut self, plan: &AllocationPlan) -> FftResult<()> {
        let Some(layout) = &self.layout else {
            return Err(self.invalid_state("allocate"));
        };
        match plan.target {
            Residency::Host => {
                if self.descriptor.is_in_place() && plan.input != Placement::Direct {
                    return Err(FftError::Unsupported {
                        detail: "in-place host transforms cannot stage their operand",
                    });
                }
                if let Placement::Staged { .. } = plan.input {
                    self.input_staging = Some(Staging::Host(Operand::zeros(
                        layout.input_extents.clone(),
                        layout.input_kind(),
                    )));
                }
                if let Placement::Staged { .. } = plan.output {
                    self.output_staging = Some(Staging::Host(Operand::zeros(
                        layout.output_extents.clone(),
                        layout.output_kind(),
                    )));
                }
            }
            Residency::Device => {
                let device = self.device()?;
                if let Some(combined) = plan.combined {
                    self.combined = Some(allocate_device(device.as_ref(), combined.bytes)?);
                }
                if let Placement::Staged { bytes, .. } = plan.input {
                    let buffer = allocate_device(device.as_ref(), bytes)?;
                    self.input_staging = Some(Staging::Device(buffer));
                }
                if let Placement::Staged { bytes, .. } = plan.output {
                    let buffer = allocate_device(device.as_ref(), bytes)?;
                    self.output_staging = Some(Staging::Device(buffer));
                }
            }
        }
        Ok(())
    }

    fn device(&self) -> FftResult<Arc<dyn DeviceMemory>> {
        self.context
            .device()
            .cloned()
            .ok_or(FftError::Unsupported {
                detail: "context has no device memory",
            })
    }

    /// Returns whether results remain on an asynchronous device.
    fn execute(&mut self, input: &mut Operand, mut output: Option<&mut Operand>) -> FftResult<bool> {
        let (Some(layout), Some(allocation), Some(plan)) =
            (self.layout.clone(), self.allocation, self.plan)
        else {
            return Err(self.invalid_state("run"));
        };

        input.set_full_extents(&layout.full_extents);
        if let Some(output) = output.as_deref_mut() {
            output.set_full_extents(&layout.full_extents);
        }
        let check_finite = self.options.check_finite || self.options.mode.is_hardened();
        if check_finite && input.residency() == Residency::Host && !input.all_finite() {
            return Err(FftError::NonFiniteInput);
        }

        let requires_sync = match allocation.target {
            Residency::Host => {
                self.execute_host(plan, input, output.as_deref_mut())?;
                false
            }
            Residency::Device => {
                self.execute_device(plan, &allocation, input, output.as_deref_mut())?
            }
        };

        let scale = normalization_scale(
            self.options.normalization,
            layout.full_extents.num_elements(),
            self.descriptor.direction(),
        );
        let result = if self.descriptor.is_in_place() {
            if self.descriptor.is_real() {
                input.view_as(layout.output_kind().domain)?;
                input.check_capacity(OperandRole::Output)?;
            }
            input
        } else {
            output.ok_or(FftError::InvalidDescriptor {
                detail: "out-of-place transforms need an output operand",
            })?
        };
        if (scale - 1.0).abs() > f64::EPSILON && result.residency() == Residency::Host {
            result.scale(scale)?;
        }
        Ok(requires_sync)
    }

    fn execute_host(
        &mut self,
        plan: PlanHandle,
        input: &mut Operand,
        output: Option<&mut Operand>,
    ) -> FftResult<()> {
        let backend_name = self.context.backend_name();
        let mut backend = self.context.backend()?;
        let failed = |err: BackendError| FftError::Execution {
            backend: backend_name.to_string(),
            message: err.message,
        };

        if self.descriptor.is_in_place() {
            let plane = first_plane_mut(input)?;
            return backend
                .execute(
                    plan,
                    ExecIo::Host {
                        input: plane,
                        output: None,
                    },
                )
                .map_err(failed);
        }

        let output = output.ok_or(FftError::InvalidDescriptor {
            detail: "out-of-place transforms need an output operand",
        })?;
        if let Some(Staging::Host(stage)) = &mut self.input_staging {
            input.copy_into(stage)?;
        }
        let source = match &mut self.input_staging {
            Some(Staging::Host(stage)) => first_plane_mut(stage)?,
            _ => first_plane_mut(input)?,
        };
        let target = match &mut self.output_staging {
            Some(Staging::Host(stage)) => first_plane_mut(stage)?,
            _ => first_plane_mut(output)?,
        };
        backend
            .execute(
                plan,
                ExecIo::Host {
                    input: source,
                    output: Some(target),
                },
            )
            .map_err(failed)?;
        if let Some(Staging::Host(stage)) = &self.output_staging {
            stage.copy_into(output)?;
        }
        Ok(())
    }

    fn execute_device(
        &mut self,
        plan: PlanHandle,
        allocation: &AllocationPlan,
        input: &mut Operand,
        output: Option<&mut Operand>,
    ) -> FftResult<bool> {
        let device = self.device()?;
        let device = device.as_ref();
        let backend_name = self.context.backend_name();
        let failed = |err: BackendError| FftError::Execution {
            backend: backend_name.to_string(),
            message: err.message,
        };
        let in_place = self.descriptor.is_in_place();

        if let (Some(buffer), Some(combined)) = (self.combined, allocation.combined) {
            let output = output.ok_or(FftError::InvalidDescriptor {
                detail: "out-of-place transforms need an output operand",
            })?;
            let bytes = upload_bytes(input, allocation.input_bytes, false)?;
            let uploaded = match combined.pitched_in {
                Some(copy) => device.copy_host_to_device_pitched(buffer.id, &bytes, copy),
                None => device.copy_host_to_device(buffer.id, &bytes),
            };
            uploaded.map_err(failed)?;
            self.context
                .backend()?
                .execute(
                    plan,
                    ExecIo::Device {
                        input: buffer.id,
                        output: buffer.id,
                    },
                )
                .map_err(failed)?;
            if device.is_async() {
                device.synchronize().map_err(failed)?;
            }
            download(
                device,
                buffer.id,
                output,
                allocation.output_bytes,
                combined.pitched_out,
            )
            .map_err(|err| reattribute(err, backend_name))?;
            return Ok(false);
        }

        let input_id = match (&self.input_staging, input.device_handle()) {
            (Some(Staging::Device(buffer)), _) => {
                let bytes = upload_bytes(input, allocation.input_bytes, in_place)?;
                device
                    .copy_host_to_device(buffer.id, &bytes)
                    .map_err(failed)?;
                buffer.id
            }
            (_, Some(id)) => id,
            _ => {
                return Err(FftError::NoDevicePointer {
                    role: OperandRole::Input,
                });
            }
        };
        let output_id = if in_place {
            input_id
        } else {
            match (
                &self.output_staging,
                output.as_deref().and_then(Operand::device_handle),
            ) {
                (Some(Staging::Device(buffer)), _) => buffer.id,
                (_, Some(id)) => id,
                _ => {
                    return Err(FftError::NoDevicePointer {
                        role: OperandRole::Output,
                    });
                }
            }
        };

        self.context
            .backend()?
            .execute(
                plan,
                ExecIo::Device {
                    input: input_id,
                    output: output_id,
                },
            )
            .map_err(failed)?;

        let staged_result = if in_place {
            self.input_staging
                .as_ref()
                .and_then(Staging::device_buffer)
                .map(|buffer| (buffer, input))
        } else {
            self.output_staging
                .as_ref()
                .and_then(Staging::device_buffer)
                .zip(output)
        };
        let Some((buffer, target)) = staged_result else {
            return Ok(device.is_async());
        };
        if device.is_async() {
            device.synchronize().map_err(failed)?;
        }
        if in_place {
            let plane = first_plane_mut(target)?.as_bytes_mut();
            let len = plane.len().min(buffer.bytes);
            device
                .copy_device_to_host(&mut plane[..len], buffer.id)
                .map_err(failed)?;
        } else {
            download(device, buffer.id, target, allocation.output_bytes, None)
                .map_err(|err| reattribute(err, backend_name))?;
        }
        Ok(false)
    }
}

impl Drop for Transform {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Configure a transform for `input`/`output`, run it once and tear it down.
pub fn run(
    context: &BackendContext,
    descriptor: TransformDescriptor,
    options: TransformOptions,
    input: &mut Operand,
    output: Option<&mut Operand>,
) -> FftResult<RunReport> {
    let mut transform = Transform::configure(context, descriptor, options, input, output.as_deref())?;
    transform.run(input, output)
}

fn allocate_device(device: &dyn DeviceMemory, bytes: usize) -> FftResult<DeviceBuffer> {
    let id = device.allocate(bytes).map_err(|err| FftError::Allocation {
        device: device.name().to_string(),
        bytes,
        message: err.message,
    })?;
    debug!(buffer = %id, bytes, device = device.name(), "staging buffer allocated");
    Ok(DeviceBuffer { id, bytes })
}

fn first_plane_mut(operand: &mut Operand) -> FftResult<&mut HostData> {
    operand
        .planes_mut()
        .and_then(|planes| planes.first_mut())
        .ok_or(FftError::Unsupported {
            detail: "operand has no host plane",
        })
}

/// Bytes to send to the device: the whole buffer for an in-place operand,
/// otherwise the dense interleaved form of the current view.
fn upload_bytes(operand: &Operand, bytes: usize, whole_buffer: bool) -> FftResult<Vec<u8>> {
    let dense;
    let source = if whole_buffer || operand.is_dense() {
        operand
    } else {
        dense = operand.dense_copy()?;
        &dense
    };
    let plane = source
        .planes()
        .and_then(|planes| planes.first())
        .ok_or(FftError::Unsupported {
            detail: "operand has no host plane",
        })?
        .as_bytes();
    Ok(plane[..plane.len().min(bytes)].to_vec())
}

/// Copy `bytes` of results from `src` into a host operand, through a dense
/// intermediate when the operand is not dense.
fn download(
    device: &dyn DeviceMemory,
    src: DeviceBufferId,
    target: &mut Operand,
    bytes: usize,
    pitched: Option<PitchedCopy>,
) -> Result<(), FftError> {
    let copy_out = |dst: &mut [u8]| -> Result<(), BackendError> {
        let len = dst.len().min(bytes);
        match pitched {
            Some(copy) => device.copy_device_to_host_pitched(&mut dst[..len], src, copy),
            None => device.copy_device_to_host(&mut dst[..len], src),
        }
    };
    if target.is_dense() {
        let plane = first_plane_mut(target)?;
        return copy_out(plane.as_bytes_mut()).map_err(unattributed);
    }
    let mut dense = Operand::zeros(target.logical_extents(), target.element());
    copy_out(first_plane_mut(&mut dense)?.as_bytes_mut()).map_err(unattributed)?;
    dense.copy_into(target)
}

fn unattributed(err: BackendError) -> FftError {
    FftError::Execution {
        backend: String::new(),
        message: err.message,
    }
}

fn reattribute(err: FftError, backend: &str) -> FftError {
    match err {
        FftError::Execution { message, .. } => FftError::Execution {
            backend: backend.to_string(),
            message,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Transform, TransformOptions, TransformState, run};
    use crate::backend::{ExecIo, PlanHandle, PlanRequest, TransformBackend};
    use crate::error::BackendError;
    use crate::mirror::DeviceEvent;
    use crate::{
        BackendContext, Complex64, ContextConfig, Direction, ElementKind, Extents, FftError,
        HostMirrorDevice, Normalization, Operand, Precision, Residency, TransformDescriptor,
    };

    fn extents(dims: &[usize]) -> Extents {
        Extents::new(dims.to_vec()).expect("valid extents")
    }

    #[derive(Debug)]
    struct RefusingBackend;

    impl TransformBackend for RefusingBackend {
        fn name(&self) -> &'static str {
            "refusing"
        }

        fn residency(&self) -> Residency {
            Residency::Host
        }

        fn create_plan(&mut self, _request: &PlanRequest) -> Result<PlanHandle, BackendError> {
            Err(BackendError::new("no plans today"))
        }

        fn execute(&mut self, _plan: PlanHandle, _io: ExecIo<'_>) -> Result<(), BackendError> {
            Err(BackendError::new("unreachable"))
        }

        fn destroy_plan(&mut self, _plan: PlanHandle) {}
    }

    #[test]
    fn lifecycle_walks_through_every_state() {
        let context = BackendContext::host().expect("host context");
        let desc = TransformDescriptor::c2c(Direction::Forward, 1, Precision::Double)
            .expect("valid");
        let mut input = Operand::complex(extents(&[4]), &[Complex64::new(1.0, 0.0); 4])
            .expect("sized");
        let mut output = Operand::zeros(extents(&[4]), ElementKind::complex(Precision::Double));

        let mut transform = Transform::new(&context, desc, TransformOptions::default());
        assert_eq!(transform.state(), TransformState::Unconfigured);
        assert!(matches!(
            transform.plan(),
            Err(FftError::InvalidState {
                operation: "plan",
                state: TransformState::Unconfigured
            })
        ));
        transform.bind(&input, Some(&output)).expect("bind");
        assert_eq!(transform.state(), TransformState::Negotiated);
        transform.plan().expect("plan");
        assert_eq!(transform.state(), TransformState::Planned);
        transform.allocate().expect("allocate");
        assert_eq!(transform.state(), TransformState::Ready);
        transform.run(&mut input, Some(&mut output)).expect("run");
        assert_eq!(transform.state(), TransformState::Ready);
        assert_eq!(output.get(&[0]), Some(Complex64::new(4.0, 0.0)));
        transform.teardown();
        assert_eq!(transform.state(), TransformState::Destroyed);
        transform.teardown();
    }

    #[test]
    fn failed_bind_stays_unconfigured() {
        let context = BackendContext::host().expect("host context");
        let desc = TransformDescriptor::r2c(2, Precision::Double).expect("valid");
        let input = Operand::zeros(extents(&[64, 64]), ElementKind::real(Precision::Double));
        let output = Operand::zeros(extents(&[64, 64]), ElementKind::complex(Precision::Double));
        let mut transform = Transform::new(&context, desc, TransformOptions::default());
        let err = transform.bind(&input, Some(&output)).expect_err("mismatch");
        assert_eq!(
            err,
            FftError::DimensionMismatch {
                dim: 1,
                expected: 33,
                actual: 64
            }
        );
        assert_eq!(transform.state(), TransformState::Unconfigured);
    }

    #[test]
    fn plan_failure_destroys_transform() {
        let context = BackendContext::new(
            Box::new(RefusingBackend),
            None,
            ContextConfig::default(),
        )
        .expect("context");
        let desc = TransformDescriptor::c2c(Direction::Forward, 1, Precision::Single)
            .expect("valid");
        let input = Operand::zeros(extents(&[8]), ElementKind::complex(Precision::Single));
        let output = input.clone();
        let err = Transform::configure(&context, desc, TransformOptions::default(), &input, Some(&output))
            .expect_err("refused");
        assert!(matches!(err, FftError::PlanCreation { ref backend, .. } if backend == "refusing"));
        assert!(err.is_setup_error());
        assert_eq!(context.plan_cache_len(), 0);

        let mut retry = Transform::new(&context, desc, TransformOptions::default());
        retry.bind(&input, Some(&output)).expect("bind");
        assert!(retry.plan().is_err());
        assert_eq!(retry.state(), TransformState::Destroyed);
        assert_eq!(context.plan_cache_len(), 0);
    }

    #[test]
    fn changed_operand_is_rejected_and_transform_stays_ready() {
        let context = BackendContext::host().expect("host context");
        let desc = TransformDescriptor::c2c(Direction::Forward, 1, Precision::Double)
            .expect("valid");
        let input = Operand::zeros(extents(&[4]), ElementKind::complex(Precision::Double));
        let output = input.clone();
        let mut transform =
            Transform::configure(&context, desc, TransformOptions::default(), &input, Some(&output))
                .expect("configured");
        let mut bigger = Operand::zeros(extents(&[8]), ElementKind::complex(Precision::Double));
        let mut out = output.clone();
        assert_eq!(
            transform.run(&mut bigger, Some(&mut out)),
            Err(FftError::OperandChanged {
                role: crate::OperandRole::Input
            })
        );
        assert_eq!(transform.state(), TransformState::Ready);
    }

    #[test]
    fn hardened_mode_rejects_non_finite_input_and_records_failure() {
        let context = BackendContext::host().expect("host context");
        let desc = TransformDescriptor::r2c(1, Precision::Double).expect("valid");
        let mut input = Operand::real(extents(&[4]), vec![1.0, f64::NAN, 0.0, 0.0]).expect("sized");
        let mut output = Operand::zeros(extents(&[3]), ElementKind::complex(Precision::Double));
        let options = TransformOptions::default().with_mode(fxl_runtime::RuntimeMode::Hardened);
        let err = run(&context, desc, options, &mut input, Some(&mut output))
            .expect_err("nan input");
        assert_eq!(err, FftError::NonFiniteInput);
        let traces = context.take_traces();
        assert_eq!(traces.len(), 1);
        assert!(!traces[0].outcome.is_completed());
    }

    #[test]
    fn normalization_is_refused_for_device_outputs() {
        let device = Arc::new(HostMirrorDevice::new());
        let context = BackendContext::mirror_device(Arc::clone(&device)).expect("context");
        let desc = TransformDescriptor::c2c(Direction::Inverse, 1, Precision::Single)
            .expect("valid");
        let input = Operand::zeros(extents(&[8]), ElementKind::complex(Precision::Single));
        let output = Operand::device(
            extents(&[8]),
            ElementKind::complex(Precision::Single),
            Some(crate::DeviceBuffer {
                id: crate::DeviceBufferId(99),
                bytes: 8 * 8,
            }),
        );
        let options = TransformOptions::default().with_normalization(Normalization::Backward);
        assert!(matches!(
            Transform::configure(&context, desc, options, &input, Some(&output)),
            Err(FftError::Unsupported { .. })
        ));
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn teardown_frees_staging_before_destroying_plan() {
        let device = Arc::new(HostMirrorDevice::new());
        let context = BackendContext::mirror_device(Arc::clone(&device)).expect("context");
        let desc = TransformDescriptor::c2c(Direction::Forward, 1, Precision::Double)
            .expect("valid");
        let input = Operand::zeros(extents(&[4]), ElementKind::complex(Precision::Double));
        let output = input.clone();
        let transform =
            Transform::configure(&context, desc, TransformOptions::default(), &input, Some(&output))
                .expect("configured");
        assert_eq!(device.live_buffers(), 2);
        drop(transform);
        assert_eq!(device.live_buffers(), 0);
        let events = device.events();
        let last_free = events
            .iter()
            .rposition(|event| matches!(event, DeviceEvent::Free { .. }))
            .expect("frees logged");
        let destroy = events
            .iter()
            .position(|event| matches!(event, DeviceEvent::DestroyPlan { .. }))
            .expect("plan destroyed");
        assert!(last_free < destroy);
    }
}
