//! Multi-VM operations: leveled start/stop, partial-failure aggregation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use indexmap::IndexSet;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use wvm_config::HealthCheckSpec;
use wvm_core::error::{Result, WvmError};
use wvm_guest::transport::{transport_for_vm, GuestTransport, TransportConfig};
use wvm_provider::{BackendState, LifecycleBackend, LifecycleObserver, LifecycleOp};
use wvm_provision::with_rollback;

use crate::health::HealthProbe;
use crate::plan::{OrchestratedVm, OrchestrationPlan, VmState};

/// Outcome of one multi-VM operation.
///
/// `success` is exactly "no per-VM error was recorded": the operation never
/// aborts as a whole, so operators see which VMs failed and which unrelated
/// VMs proceeded regardless.
#[derive(Debug, Clone)]
pub struct OrchestrationResult {
    pub success: bool,
    pub states: BTreeMap<String, VmState>,
    pub errors: BTreeMap<String, String>,
    pub duration: Duration,
}

impl OrchestrationResult {
    fn new(
        states: BTreeMap<String, VmState>,
        errors: BTreeMap<String, String>,
        duration: Duration,
    ) -> Self {
        Self {
            success: errors.is_empty(),
            states,
            errors,
            duration,
        }
    }
}

/// Builds guest transports for pass-through `exec`.
pub trait TransportFactory: Send + Sync {
    fn transport_for(&self, vm: &str) -> Result<Box<dyn GuestTransport>>;
}

/// Factory running the real selection protocol per VM.
pub struct DefaultTransportFactory(pub TransportConfig);

impl TransportFactory for DefaultTransportFactory {
    fn transport_for(&self, vm: &str) -> Result<Box<dyn GuestTransport>> {
        transport_for_vm(vm, &self.0)
    }
}

/// Merged live/orchestration view of one VM, for `status`/`ps`.
#[derive(Debug, Clone)]
pub struct VmRuntimeStatus {
    pub name: String,
    pub state: VmState,
    pub backend_state: Option<BackendState>,
    pub ip: Option<String>,
    pub health_check_passed: Option<bool>,
}

/// Drives one plan against one lifecycle backend.
pub struct Orchestrator {
    plan: OrchestrationPlan,
    backend: Arc<dyn LifecycleBackend>,
    probe: Option<Box<dyn HealthProbe>>,
    transports: Option<Box<dyn TransportFactory>>,
    observers: Vec<Arc<dyn LifecycleObserver>>,
    states: Mutex<BTreeMap<String, VmState>>,
    health: Mutex<BTreeMap<String, bool>>,
}

impl Orchestrator {
    pub fn new(plan: OrchestrationPlan, backend: Arc<dyn LifecycleBackend>) -> Self {
        Self {
            plan,
            backend,
            probe: None,
            transports: None,
            observers: Vec::new(),
            states: Mutex::new(BTreeMap::new()),
            health: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_health_probe(mut self, probe: Box<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_transport_factory(mut self, factory: Box<dyn TransportFactory>) -> Self {
        self.transports = Some(factory);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn plan(&self) -> &OrchestrationPlan {
        &self.plan
    }

    fn notify_pre(&self, op: LifecycleOp, vm: &str) {
        for observer in &self.observers {
            observer.on_pre_op(op, vm);
        }
    }

    fn notify_post(&self, op: LifecycleOp, vm: &str, success: bool) {
        for observer in &self.observers {
            observer.on_post_op(op, vm, success);
        }
    }

    /// Start the requested VMs plus everything they transitively depend on.
    pub fn up(&self, subset: Option<&[&str]>) -> Result<OrchestrationResult> {
        let started_at = Instant::now();
        let selected = self.plan.with_dependencies(subset)?;
        let (states, errors) = self.up_set(&selected);
        self.remember_states(&states);
        let result = OrchestrationResult::new(states, errors, started_at.elapsed());
        info!(
            vms = selected.len(),
            success = result.success,
            failed = result.errors.len(),
            "up finished"
        );
        Ok(result)
    }

    /// Stop exactly the requested VMs (no dependency expansion), mirror
    /// order, best-effort.
    pub fn down(&self, subset: Option<&[&str]>) -> Result<OrchestrationResult> {
        let started_at = Instant::now();
        let selected = self.plan.resolve_exact(subset)?;
        let (states, errors) = self.down_set(&selected);
        self.remember_states(&states);
        let result = OrchestrationResult::new(states, errors, started_at.elapsed());
        info!(
            vms = selected.len(),
            success = result.success,
            failed = result.errors.len(),
            "down finished"
        );
        Ok(result)
    }

    /// `down` then `up` over one resolved subset; errors from both phases
    /// merge into a single result, with the up phase winning collisions.
    pub fn restart(&self, subset: Option<&[&str]>) -> Result<OrchestrationResult> {
        let started_at = Instant::now();
        let selected = self.plan.with_dependencies(subset)?;

        let (mut states, mut errors) = self.down_set(&selected);
        let (up_states, up_errors) = self.up_set(&selected);
        states.extend(up_states);
        errors.extend(up_errors);

        self.remember_states(&states);
        Ok(OrchestrationResult::new(states, errors, started_at.elapsed()))
    }

    fn up_set(
        &self,
        selected: &IndexSet<String>,
    ) -> (BTreeMap<String, VmState>, BTreeMap<String, String>) {
        let mut states = BTreeMap::new();
        let mut errors = BTreeMap::new();
        let mut failed: BTreeSet<String> = BTreeSet::new();

        for level in &self.plan.start_order {
            let members: Vec<&OrchestratedVm> = level
                .iter()
                .filter(|name| selected.contains(name.as_str()))
                .map(|name| &self.plan.vms[name.as_str()])
                .collect();
            if members.is_empty() {
                continue;
            }

            // A VM whose dependency already failed is marked FAILED without
            // an attempt; failure propagates transitively because each
            // blocked VM joins the failed set before later levels run.
            let mut runnable: Vec<&OrchestratedVm> = Vec::new();
            for vm in members {
                match vm.depends_on.iter().find(|dep| failed.contains(dep.as_str())) {
                    Some(dep) => {
                        warn!(vm = %vm.name, dependency = %dep, "not attempted: dependency failed");
                        errors.insert(
                            vm.name.clone(),
                            format!("not attempted: dependency '{}' failed", dep),
                        );
                        states.insert(vm.name.clone(), VmState::Failed);
                        failed.insert(vm.name.clone());
                    }
                    None => runnable.push(vm),
                }
            }

            // Members of one level have no ordering constraint among
            // themselves; later levels wait for the whole level to resolve.
            let level_results: Vec<(String, Result<Option<bool>>)> = runnable
                .par_iter()
                .map(|vm| (vm.name.clone(), self.up_one(vm)))
                .collect();

            for (name, outcome) in level_results {
                match outcome {
                    Ok(health) => {
                        states.insert(name.clone(), VmState::Running);
                        if let Some(passed) = health {
                            self.health
                                .lock()
                                .expect("health map poisoned")
                                .insert(name, passed);
                        }
                    }
                    Err(e) => {
                        warn!(vm = %name, "start failed: {}", e);
                        errors.insert(name.clone(), e.to_string());
                        states.insert(name.clone(), VmState::Failed);
                        failed.insert(name);
                    }
                }
            }
        }

        (states, errors)
    }

    /// Bring one VM up: create if absent (transactionally), start, then
    /// optionally poll its health probe.
    fn up_one(&self, vm: &OrchestratedVm) -> Result<Option<bool>> {
        let name = vm.name.as_str();

        if !self.backend.exists(name)? {
            self.notify_pre(LifecycleOp::Create, name);
            let created = with_rollback(&format!("create {}", name), |ctx| {
                let id = self.backend.create(name, vm.config.as_deref())?;

                let undo_backend = Arc::clone(&self.backend);
                let undo_name = vm.name.clone();
                ctx.register_action(
                    &format!("delete partially created VM '{}'", name),
                    false,
                    move || undo_backend.delete(&undo_name),
                );

                if !self.backend.exists(name)? {
                    return Err(WvmError::Provisioning(format!(
                        "VM '{}' not visible after create",
                        name
                    )));
                }

                ctx.commit();
                Ok(id)
            });
            self.notify_post(LifecycleOp::Create, name, created.is_ok());
            let id = created?;
            debug!(vm = name, id = %id, "created");
        }

        self.notify_pre(LifecycleOp::Start, name);
        let started = self.backend.start(name);
        self.notify_post(LifecycleOp::Start, name, started.is_ok());
        started?;
        info!(vm = name, "started");

        let health = match (&vm.health_check, &self.probe) {
            (Some(spec), Some(probe)) => Some(self.poll_health(name, spec, probe.as_ref())),
            _ => None,
        };
        Ok(health)
    }

    /// Bounded health polling. The outcome is a separate signal: a started
    /// VM that never passes its probe stays Running.
    fn poll_health(&self, vm: &str, spec: &HealthCheckSpec, probe: &dyn HealthProbe) -> bool {
        let attempts = spec.retries.max(1);
        for attempt in 1..=attempts {
            if probe.probe(vm) {
                info!(vm, attempt, "health check passed");
                return true;
            }
            if attempt < attempts {
                std::thread::sleep(Duration::from_secs(spec.interval_secs));
            }
        }
        warn!(vm, attempts, "health check exhausted without passing");
        false
    }

    fn down_set(
        &self,
        selected: &IndexSet<String>,
    ) -> (BTreeMap<String, VmState>, BTreeMap<String, String>) {
        let mut states = BTreeMap::new();
        let mut errors = BTreeMap::new();

        for level in &self.plan.stop_order {
            let members: Vec<&OrchestratedVm> = level
                .iter()
                .filter(|name| selected.contains(name.as_str()))
                .map(|name| &self.plan.vms[name.as_str()])
                .collect();
            if members.is_empty() {
                continue;
            }

            let level_results: Vec<(String, Result<()>)> = members
                .par_iter()
                .map(|vm| {
                    let name = vm.name.as_str();
                    self.notify_pre(LifecycleOp::Stop, name);
                    let stopped = self.backend.stop(name, false);
                    self.notify_post(LifecycleOp::Stop, name, stopped.is_ok());
                    (vm.name.clone(), stopped)
                })
                .collect();

            for (name, outcome) in level_results {
                match outcome {
                    Ok(()) => {
                        states.insert(name, VmState::Stopped);
                    }
                    Err(e) => {
                        // Best-effort: record and keep stopping the rest.
                        warn!(vm = %name, "stop failed: {}", e);
                        errors.insert(name.clone(), e.to_string());
                        states.insert(name, VmState::Failed);
                    }
                }
            }
        }

        (states, errors)
    }

    fn remember_states(&self, states: &BTreeMap<String, VmState>) {
        let mut cumulative = self.states.lock().expect("state map poisoned");
        for (name, state) in states {
            cumulative.insert(name.clone(), *state);
        }
    }

    /// Merged live/orchestration status for every VM in the plan. Read-only;
    /// never mutates the plan.
    pub fn status(&self) -> Vec<VmRuntimeStatus> {
        let states = self.states.lock().expect("state map poisoned");
        let health = self.health.lock().expect("health map poisoned");
        self.plan
            .vms
            .iter()
            .map(|(name, vm)| {
                let live = self.backend.get_status(name).ok();
                VmRuntimeStatus {
                    name: name.clone(),
                    state: *states.get(name).unwrap_or(&vm.state),
                    backend_state: live.as_ref().map(|s| s.state),
                    ip: live.and_then(|s| s.ip),
                    health_check_passed: health.get(name).copied(),
                }
            })
            .collect()
    }

    /// Log a `status()` table, one line per VM.
    pub fn ps(&self) {
        info!("{:<20} {:<10} {:<10} {:<16} {}", "NAME", "STATE", "LIVE", "IP", "HEALTH");
        for status in self.status() {
            info!(
                "{:<20} {:<10} {:<10} {:<16} {}",
                status.name,
                format!("{:?}", status.state).to_lowercase(),
                status
                    .backend_state
                    .map(|s| format!("{:?}", s).to_lowercase())
                    .unwrap_or_else(|| "-".to_string()),
                status.ip.as_deref().unwrap_or("-"),
                match status.health_check_passed {
                    Some(true) => "passed",
                    Some(false) => "failed",
                    None => "-",
                }
            );
        }
    }

    /// Backend log pass-through for one VM.
    pub fn logs(&self, vm: &str) -> Result<String> {
        self.require_vm(vm)?;
        self.backend.logs(vm)
    }

    /// Run one command inside a VM over the guest transport.
    ///
    /// `Ok(None)` means the guest did not answer; an empty string is a
    /// successful empty output.
    pub fn exec(&self, vm: &str, command: &str, timeout: Duration) -> Result<Option<String>> {
        self.require_vm(vm)?;
        let factory = self.transports.as_ref().ok_or_else(|| {
            WvmError::Internal("no transport factory configured for exec".to_string())
        })?;
        let transport = factory.transport_for(vm)?;
        Ok(transport.execute(command, timeout))
    }

    fn require_vm(&self, vm: &str) -> Result<()> {
        if self.plan.vms.contains_key(vm) {
            Ok(())
        } else {
            Err(WvmError::Config(format!("Unknown VM '{}'", vm)))
        }
    }
}
