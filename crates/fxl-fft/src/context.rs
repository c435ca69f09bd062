//! Explicitly constructed, reference-counted backend context.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use fxl_runtime::{TraceLedger, TransformTrace};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{ExtentOrder, TransformBackend};
use crate::device::DeviceMemory;
use crate::element::Residency;
use crate::error::{FftError, FftResult};
use crate::host::HostBackend;
use crate::mirror::{HostMirrorDevice, MirrorDeviceBackend};
use crate::plan::{PlanCache, PlanCacheConfig, PlanKey};
use crate::sizing::SizeLimits;

type InitGate = Arc<OnceLock<Result<(), String>>>;

static INIT_GATES: OnceLock<Mutex<HashMap<&'static str, InitGate>>> = OnceLock::new();

/// Run `backend`'s library initialization once per process and library id.
/// Concurrent callers for the same library block until the first finishes
/// and all observe its result.
fn ensure_library_initialized(backend: &dyn TransformBackend) -> FftResult<()> {
    let library = backend.library_id();
    let gate = {
        let mut gates = INIT_GATES
            .get_or_init(|| Mutex::new(HashMap::new()))
            .lock()
            .map_err(|_| FftError::PlanCreation {
                backend: backend.name().to_string(),
                message: "initialization gate poisoned".to_string(),
            })?;
        Arc::clone(gates.entry(library).or_default())
    };
    gate.get_or_init(|| {
        debug!(library, "initializing backend library");
        backend.initialize_library().map_err(|err| err.message)
    })
    .clone()
    .map_err(|message| FftError::PlanCreation {
        backend: backend.name().to_string(),
        message,
    })
}

/// True once `library` has been initialized in this process, successfully or not.
#[must_use]
pub fn library_initialized(library: &str) -> bool {
    INIT_GATES
        .get()
        .and_then(|gates| gates.lock().ok())
        .is_some_and(|gates| gates.get(library).is_some_and(|gate| gate.get().is_some()))
}

/// Context-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    pub plan_cache: PlanCacheConfig,
    pub trace_capacity: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            plan_cache: PlanCacheConfig::default(),
            trace_capacity: 256,
        }
    }
}

impl ContextConfig {
    #[must_use]
    pub fn with_plan_cache(mut self, plan_cache: PlanCacheConfig) -> Self {
        self.plan_cache = plan_cache;
        self
    }

    #[must_use]
    pub fn with_trace_capacity(mut self, trace_capacity: usize) -> Self {
        self.trace_capacity = trace_capacity;
        self
    }
}

#[derive(Debug)]
struct ContextInner {
    backend: Mutex<Box<dyn TransformBackend>>,
    name: &'static str,
    residency: Residency,
    extent_order: ExtentOrder,
    size_limits: SizeLimits,
    device: Option<Arc<dyn DeviceMemory>>,
    plan_cache: Mutex<PlanCache>,
    traces: Mutex<TraceLedger>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        match self.backend.get_mut() {
            Ok(backend) => backend.teardown(),
            Err(poisoned) => poisoned.into_inner().teardown(),
        }
        debug!(backend = self.name, "backend context torn down");
    }
}

/// Shared handle to a backend, its device memory, plan cache and trace ledger.
///
/// Cloning is cheap; the backend is torn down when the last clone drops.
#[derive(Debug, Clone)]
pub struct BackendContext {
    inner: Arc<ContextInner>,
}

impl BackendContext {
    /// Wrap `backend`. Device-resident backends need the device memory their
    /// buffers live in.
    pub fn new(
        backend: Box<dyn TransformBackend>,
        device: Option<Arc<dyn DeviceMemory>>,
        config: ContextConfig,
    ) -> FftResult<Self> {
        if backend.residency() == Residency::Device && device.is_none() {
            return Err(FftError::Unsupported {
                detail: "device backends require a device memory collaborator",
            });
        }
        ensure_library_initialized(backend.as_ref())?;
        let inner = ContextInner {
            name: backend.name(),
            residency: backend.residency(),
            extent_order: backend.extent_order(),
            size_limits: backend.size_limits(),
            backend: Mutex::new(backend),
            device,
            plan_cache: Mutex::new(PlanCache::new(config.plan_cache)),
            traces: Mutex::new(TraceLedger::new(config.trace_capacity)),
        };
        debug!(backend = inner.name, residency = ?inner.residency, "backend context created");
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Context over the `rustfft` host backend.
    pub fn host() -> FftResult<Self> {
        Self::new(Box::new(HostBackend::new()), None, ContextConfig::default())
    }

    /// Context over a mirror device and its backend.
    pub fn mirror_device(device: Arc<HostMirrorDevice>) -> FftResult<Self> {
        let backend = MirrorDeviceBackend::new(Arc::clone(&device));
        Self::new(Box::new(backend), Some(device), ContextConfig::default())
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.inner.name
    }

    #[must_use]
    pub fn residency(&self) -> Residency {
        self.inner.residency
    }

    #[must_use]
    pub fn extent_order(&self) -> ExtentOrder {
        self.inner.extent_order
    }

    #[must_use]
    pub fn size_limits(&self) -> SizeLimits {
        self.inner.size_limits
    }

    #[must_use]
    pub fn device(&self) -> Option<&Arc<dyn DeviceMemory>> {
        self.inner.device.as_ref()
    }

    /// Wait for outstanding device work. A no-op for host contexts.
    pub fn synchronize(&self) -> FftResult<()> {
        let Some(device) = &self.inner.device else {
            return Ok(());
        };
        device.synchronize().map_err(|err| FftError::Execution {
            backend: self.inner.name.to_string(),
            message: err.message,
        })
    }

    /// Number of live handles to this context.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Snapshot of the recorded traces, oldest first.
    #[must_use]
    pub fn traces(&self) -> Vec<TransformTrace> {
        self.inner
            .traces
            .lock()
            .map(|ledger| ledger.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove and return every recorded trace.
    pub fn take_traces(&self) -> Vec<TransformTrace> {
        self.inner
            .traces
            .lock()
            .map(|mut ledger| ledger.drain())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn plan_cache_len(&self) -> usize {
        self.inner.plan_cache.lock().map_or(0, |cache| cache.len())
    }

    pub(crate) fn record_trace(&self, trace: TransformTrace) {
        match self.inner.traces.lock() {
            Ok(mut ledger) => ledger.record(trace),
            Err(_) => warn!(operation_id = %trace.operation_id, "trace ledger poisoned, trace dropped"),
        }
    }

    pub(crate) fn touch_plan_cache(&self, key: &PlanKey) -> bool {
        self.inner
            .plan_cache
            .lock()
            .is_ok_and(|mut cache| cache.touch(key))
    }

    pub(crate) fn backend(&self) -> FftResult<MutexGuard<'_, Box<dyn TransformBackend>>> {
        self.inner.backend.lock().map_err(|_| FftError::Execution {
            backend: self.inner.name.to_string(),
            message: "backend lock poisoned".to_string(),
        })
    }
}
