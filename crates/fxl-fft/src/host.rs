use std::collections::HashMap;

use tracing::debug;

use crate::backend::{ExecIo, PlanHandle, PlanRequest, TransformBackend};
use crate::element::Residency;
use crate::error::BackendError;
use crate::kernel::{HostKernel, KernelPlan};

/// Host backend on `rustfft`: unnormalized C2C/R2C/C2R of rank 1 to 3 over
/// dense interleaved buffers, or padded buffers for in-place real plans.
#[derive(Debug, Default)]
pub struct HostBackend {
    kernel: HostKernel,
    plans: HashMap<PlanHandle, KernelPlan>,
    next_plan: u64,
}

impl HostBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Plans currently alive.
    #[must_use]
    pub fn live_plans(&self) -> usize {
        self.plans.len()
    }
}

impl TransformBackend for HostBackend {
    fn name(&self) -> &'static str {
        "rustfft-host"
    }

    fn residency(&self) -> Residency {
        Residency::Host
    }

    fn create_plan(&mut self, request: &PlanRequest) -> Result<PlanHandle, BackendError> {
        let plan = KernelPlan::from_request(request)?;
        self.next_plan += 1;
        let handle = PlanHandle(self.next_plan);
        debug!(plan = handle.0, kind = plan.kind.name(), extents = ?plan.full, "host plan created");
        self.plans.insert(handle, plan);
        Ok(handle)
    }

    fn execute(&mut self, plan: PlanHandle, io: ExecIo<'_>) -> Result<(), BackendError> {
        let Some(kernel_plan) = self.plans.get(&plan) else {
            return Err(BackendError::new(format!("unknown plan handle {}", plan.0)));
        };
        match io {
            ExecIo::Host { input, output } => {
                if kernel_plan.in_place != output.is_none() {
                    return Err(BackendError::new("buffer count does not match plan placement"));
                }
                self.kernel.execute(kernel_plan, input, output)
            }
            ExecIo::Device { .. } => Err(BackendError::new(
                "host backend cannot address device buffers",
            )),
        }
    }

    fn destroy_plan(&mut self, plan: PlanHandle) {
        if self.plans.remove(&plan).is_some() {
            debug!(plan = plan.0, "host plan destroyed");
        }
    }
}
