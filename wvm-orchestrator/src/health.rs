//! Health probing: the validation pipeline as a post-start probe.

use std::collections::HashMap;
use std::sync::Arc;

use wvm_config::ValidationExpectations;
use wvm_core::error::Result;
use wvm_guest::transport::TransportConfig;
use wvm_guest::validate::{run_validation, HypervisorQuery, Verdict};
use wvm_provider::LifecycleBackend;

use crate::plan::OrchestrationPlan;

/// One yes/no convergence question about a started VM.
///
/// Injected into the orchestrator explicitly; the outcome is recorded as a
/// separate signal and never downgrades a running VM.
pub trait HealthProbe: Send + Sync {
    fn probe(&self, vm: &str) -> bool;
}

/// "Is the VM active" answered by the lifecycle backend.
pub struct BackendHypervisor(pub Arc<dyn LifecycleBackend>);

impl HypervisorQuery for BackendHypervisor {
    fn is_active(&self, vm: &str) -> Result<bool> {
        Ok(self.0.get_status(vm)?.is_running())
    }
}

/// Health probe that runs the full validation pipeline and passes only on
/// an unqualified `Pass` verdict. `Pending` is not a pass: the orchestrator
/// keeps polling until convergence finishes or retries run out.
pub struct ValidationHealthProbe {
    backend: Arc<dyn LifecycleBackend>,
    transport_config: TransportConfig,
    expectations: HashMap<String, ValidationExpectations>,
}

impl ValidationHealthProbe {
    pub fn new(backend: Arc<dyn LifecycleBackend>, transport_config: TransportConfig) -> Self {
        Self {
            backend,
            transport_config,
            expectations: HashMap::new(),
        }
    }

    /// Collect per-VM expectations out of a built plan.
    pub fn from_plan(
        plan: &OrchestrationPlan,
        backend: Arc<dyn LifecycleBackend>,
        transport_config: TransportConfig,
    ) -> Self {
        let mut probe = Self::new(backend, transport_config);
        for (name, vm) in &plan.vms {
            if let Some(expectations) = &vm.expectations {
                probe
                    .expectations
                    .insert(name.clone(), expectations.clone());
            }
        }
        probe
    }
}

impl HealthProbe for ValidationHealthProbe {
    fn probe(&self, vm: &str) -> bool {
        let expectations = self
            .expectations
            .get(vm)
            .cloned()
            .unwrap_or_default();
        let hypervisor = BackendHypervisor(Arc::clone(&self.backend));
        let report = run_validation(&hypervisor, vm, &expectations, &self.transport_config);
        report.log_summary();
        report.verdict == Verdict::Pass
    }
}
