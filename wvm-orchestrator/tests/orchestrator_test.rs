//! End-to-end orchestration against the mock lifecycle backend.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wvm_config::ComposeConfig;
use wvm_guest::testing::ScriptedTransport;
use wvm_guest::transport::GuestTransport;
use wvm_orchestrator::{
    HealthProbe, OrchestrationPlan, Orchestrator, TransportFactory, VmState,
};
use wvm_provider::mock::MockBackend;
use wvm_provider::{
    BackendState, LifecycleBackend, LifecycleObserver, LifecycleOp, VmStatus,
};
use wvm_core::error::Result;

fn diamond_plan() -> OrchestrationPlan {
    let config = ComposeConfig::from_str(
        r#"
version: "1"
vms:
  a: {}
  b:
    depends_on: [a]
  c:
    depends_on: [a]
  d:
    depends_on: [b, c]
"#,
    )
    .unwrap();
    OrchestrationPlan::build(&config).unwrap()
}

fn index_of(calls: &[String], entry: &str) -> usize {
    calls
        .iter()
        .position(|c| c == entry)
        .unwrap_or_else(|| panic!("missing call '{}' in {:?}", entry, calls))
}

#[test]
fn up_walks_levels_in_order() {
    let backend = Arc::new(MockBackend::with_existing(&["a", "b", "c", "d"]));
    let orchestrator = Orchestrator::new(diamond_plan(), backend.clone());

    let result = orchestrator.up(None).unwrap();
    assert!(result.success);
    assert!(result.errors.is_empty());
    for name in ["a", "b", "c", "d"] {
        assert_eq!(result.states[name], VmState::Running);
        assert!(backend.is_running(name));
    }

    let calls = backend.calls();
    let a = index_of(&calls, "start a");
    let b = index_of(&calls, "start b");
    let c = index_of(&calls, "start c");
    let d = index_of(&calls, "start d");
    assert!(a < b && a < c, "level 0 starts before level 1: {:?}", calls);
    assert!(b < d && c < d, "level 1 starts before level 2: {:?}", calls);
}

#[test]
fn start_failure_fails_dependents_but_not_unrelated_vms() {
    let config = ComposeConfig::from_str(
        r#"
version: "1"
vms:
  b: {}
  x: {}
  c:
    depends_on: [b]
  d:
    depends_on: [c]
"#,
    )
    .unwrap();
    let plan = OrchestrationPlan::build(&config).unwrap();
    let backend = Arc::new(MockBackend::with_existing(&["b", "x", "c", "d"]));
    backend.fail_on("start", "b", "no bootable disk");

    let orchestrator = Orchestrator::new(plan, backend.clone());
    let result = orchestrator.up(None).unwrap();

    assert!(!result.success);
    assert!(result.errors["b"].contains("no bootable disk"));
    assert_eq!(result.states["b"], VmState::Failed);

    // Transitive dependents are failed without an attempt.
    assert_eq!(result.states["c"], VmState::Failed);
    assert!(result.errors["c"].contains("dependency 'b' failed"));
    assert_eq!(result.states["d"], VmState::Failed);
    let calls = backend.calls();
    assert!(!calls.contains(&"start c".to_string()));
    assert!(!calls.contains(&"start d".to_string()));

    // The unrelated VM in the same level still came up.
    assert_eq!(result.states["x"], VmState::Running);
    assert!(backend.is_running("x"));
}

#[test]
fn up_subset_expands_to_dependencies_only() {
    let backend = Arc::new(MockBackend::with_existing(&["a", "b", "c", "d"]));
    let orchestrator = Orchestrator::new(diamond_plan(), backend.clone());

    let result = orchestrator.up(Some(&["b"])).unwrap();
    assert!(result.success);
    let calls = backend.calls();
    assert!(calls.contains(&"start a".to_string()));
    assert!(calls.contains(&"start b".to_string()));
    assert!(!calls.contains(&"start c".to_string()));
    assert!(!calls.contains(&"start d".to_string()));
}

#[test]
fn up_creates_missing_vms_before_starting() {
    let backend = Arc::new(MockBackend::new());
    let config = ComposeConfig::from_str("version: \"1\"\nvms:\n  solo: {}\n").unwrap();
    let plan = OrchestrationPlan::build(&config).unwrap();

    let orchestrator = Orchestrator::new(plan, backend.clone());
    let result = orchestrator.up(None).unwrap();

    assert!(result.success);
    let calls = backend.calls();
    assert!(index_of(&calls, "create solo") < index_of(&calls, "start solo"));
}

#[test]
fn down_is_best_effort_in_mirror_order() {
    let backend = Arc::new(MockBackend::with_existing(&["a", "b", "c", "d"]));
    let orchestrator = Orchestrator::new(diamond_plan(), backend.clone());
    orchestrator.up(None).unwrap();

    backend.fail_on("stop", "a", "domain is busy");
    let result = orchestrator.down(None).unwrap();

    assert!(!result.success);
    assert!(result.errors["a"].contains("domain is busy"));
    assert_eq!(result.states["a"], VmState::Failed);
    for name in ["b", "c", "d"] {
        assert_eq!(result.states[name], VmState::Stopped);
    }

    let calls = backend.calls();
    let d = index_of(&calls, "stop d");
    let a = index_of(&calls, "stop a");
    assert!(d < a, "stop order must mirror start order: {:?}", calls);
}

#[test]
fn restart_merges_errors_from_both_phases() {
    let backend = Arc::new(MockBackend::with_existing(&["a", "b", "c", "d"]));
    let orchestrator = Orchestrator::new(diamond_plan(), backend.clone());
    orchestrator.up(None).unwrap();

    backend.fail_on("stop", "b", "filesystem sync stuck");
    let result = orchestrator.restart(None).unwrap();

    assert!(!result.success);
    assert!(result.errors["b"].contains("filesystem sync stuck"));
    // The up phase still ran and got b back to running.
    assert_eq!(result.states["b"], VmState::Running);
}

struct FlakyProbe {
    calls: Mutex<u32>,
    pass_on: u32,
}

impl HealthProbe for FlakyProbe {
    fn probe(&self, _vm: &str) -> bool {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        *calls >= self.pass_on
    }
}

fn health_checked_plan() -> OrchestrationPlan {
    let config = ComposeConfig::from_str(
        r#"
version: "1"
vms:
  desktop:
    health_check:
      retries: 3
      interval_secs: 0
"#,
    )
    .unwrap();
    OrchestrationPlan::build(&config).unwrap()
}

#[test]
fn health_check_retries_until_pass() {
    let backend = Arc::new(MockBackend::with_existing(&["desktop"]));
    let orchestrator = Orchestrator::new(health_checked_plan(), backend).with_health_probe(
        Box::new(FlakyProbe {
            calls: Mutex::new(0),
            pass_on: 2,
        }),
    );

    let result = orchestrator.up(None).unwrap();
    assert!(result.success);

    let status = orchestrator.status();
    let desktop = status.iter().find(|s| s.name == "desktop").unwrap();
    assert_eq!(desktop.health_check_passed, Some(true));
}

#[test]
fn failed_health_check_does_not_downgrade_running_state() {
    let backend = Arc::new(MockBackend::with_existing(&["desktop"]));
    let orchestrator = Orchestrator::new(health_checked_plan(), backend.clone())
        .with_health_probe(Box::new(FlakyProbe {
            calls: Mutex::new(0),
            pass_on: u32::MAX,
        }));

    let result = orchestrator.up(None).unwrap();
    // The VM started; the probe outcome is a separate signal.
    assert!(result.success);
    assert_eq!(result.states["desktop"], VmState::Running);
    assert!(backend.is_running("desktop"));

    let status = orchestrator.status();
    let desktop = status.iter().find(|s| s.name == "desktop").unwrap();
    assert_eq!(desktop.health_check_passed, Some(false));
    assert_eq!(desktop.backend_state, Some(BackendState::Running));
}

/// Backend whose created VMs never become visible, to drive the creation
/// transaction into rollback.
struct VanishingBackend {
    calls: Mutex<Vec<String>>,
}

impl VanishingBackend {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, op: &str, vm: &str) {
        self.calls.lock().unwrap().push(format!("{} {}", op, vm));
    }
}

impl LifecycleBackend for VanishingBackend {
    fn name(&self) -> &'static str {
        "vanishing"
    }
    fn create(&self, name: &str, _config: Option<&Path>) -> Result<String> {
        self.record("create", name);
        Ok(format!("vanishing-{}", name))
    }
    fn start(&self, name: &str) -> Result<()> {
        self.record("start", name);
        Ok(())
    }
    fn stop(&self, name: &str, _force: bool) -> Result<()> {
        self.record("stop", name);
        Ok(())
    }
    fn get_status(&self, _name: &str) -> Result<VmStatus> {
        Ok(VmStatus {
            state: BackendState::Unknown,
            ip: None,
            uptime: None,
        })
    }
    fn delete(&self, name: &str) -> Result<()> {
        self.record("delete", name);
        Ok(())
    }
    fn exists(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }
}

#[test]
fn failed_creation_rolls_back_the_partial_vm() {
    let backend = Arc::new(VanishingBackend::new());
    let config = ComposeConfig::from_str("version: \"1\"\nvms:\n  ghost: {}\n").unwrap();
    let plan = OrchestrationPlan::build(&config).unwrap();

    let orchestrator = Orchestrator::new(plan, backend.clone());
    let result = orchestrator.up(None).unwrap();

    assert!(!result.success);
    assert!(result.errors["ghost"].contains("not visible after create"));
    assert_eq!(result.states["ghost"], VmState::Failed);

    // The compensating delete ran; the VM was never started.
    let calls = backend.calls();
    assert_eq!(calls, vec!["create ghost", "delete ghost"]);
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<(LifecycleOp, String, Option<bool>)>>,
}

impl LifecycleObserver for RecordingObserver {
    fn on_pre_op(&self, op: LifecycleOp, vm: &str) {
        self.events.lock().unwrap().push((op, vm.to_string(), None));
    }
    fn on_post_op(&self, op: LifecycleOp, vm: &str, success: bool) {
        self.events
            .lock()
            .unwrap()
            .push((op, vm.to_string(), Some(success)));
    }
}

#[test]
fn observers_are_notified_without_altering_outcomes() {
    let backend = Arc::new(MockBackend::with_existing(&["a", "b", "c", "d"]));
    let observer = Arc::new(RecordingObserver::default());
    let orchestrator =
        Orchestrator::new(diamond_plan(), backend).with_observer(observer.clone());

    let result = orchestrator.up(None).unwrap();
    assert!(result.success);

    let events = observer.events.lock().unwrap();
    let start_posts: Vec<_> = events
        .iter()
        .filter(|(op, _, success)| *op == LifecycleOp::Start && success.is_some())
        .collect();
    assert_eq!(start_posts.len(), 4);
    assert!(start_posts.iter().all(|(_, _, success)| *success == Some(true)));
}

struct ScriptedFactory;

impl TransportFactory for ScriptedFactory {
    fn transport_for(&self, _vm: &str) -> Result<Box<dyn GuestTransport>> {
        Ok(Box::new(
            ScriptedTransport::answering("agent", "").respond("hostname", Some("clone-a")),
        ))
    }
}

#[test]
fn exec_passes_through_the_guest_transport() {
    let backend = Arc::new(MockBackend::with_existing(&["a", "b", "c", "d"]));
    let orchestrator = Orchestrator::new(diamond_plan(), backend)
        .with_transport_factory(Box::new(ScriptedFactory));

    let output = orchestrator
        .exec("a", "hostname", Duration::from_secs(5))
        .unwrap();
    assert_eq!(output.as_deref(), Some("clone-a"));

    assert!(orchestrator
        .exec("ghost", "hostname", Duration::from_secs(5))
        .is_err());
}

#[test]
fn logs_pass_through_the_backend() {
    let backend = Arc::new(MockBackend::with_existing(&["a", "b", "c", "d"]));
    let orchestrator = Orchestrator::new(diamond_plan(), backend);
    let logs = orchestrator.logs("a").unwrap();
    assert!(logs.contains("mock logs for a"));
}

#[test]
fn unknown_subset_member_is_a_config_error() {
    let backend = Arc::new(MockBackend::new());
    let orchestrator = Orchestrator::new(diamond_plan(), backend);
    assert!(orchestrator.up(Some(&["nope"])).is_err());
    assert!(orchestrator.down(Some(&["nope"])).is_err());
}
