//! Phased convergence validation of a freshly-provisioned guest.
//!
//! The pipeline gates on the hypervisor's own view of the VM, selects a
//! transport once, queries the guest's provisioning status once, then runs
//! the fixed phase list and computes the aggregate verdict from the tallies.

use tracing::debug;
use wvm_config::ValidationExpectations;
use wvm_core::error::Result;

pub mod phases;
pub mod report;

pub use phases::{
    check_disk, phases, query_provisioning_done, CheckPhase, ValidationContext,
};
pub use report::{
    compute_verdict, CheckDetail, CheckStatus, DiskUsage, PhaseReport, PhaseTally,
    ValidationReport, Verdict,
};

use crate::transport::{transport_for_vm, GuestTransport, TransportConfig};

/// Narrow interface to the hypervisor's "is this VM active" query, used as
/// the first validation gate.
pub trait HypervisorQuery: Send + Sync {
    fn is_active(&self, vm: &str) -> Result<bool>;
}

/// Full validation run for one VM: gate, transport selection, phases,
/// verdict. Never returns an error; every failure mode is a verdict.
pub fn run_validation(
    hypervisor: &dyn HypervisorQuery,
    vm: &str,
    expectations: &ValidationExpectations,
    transport_config: &TransportConfig,
) -> ValidationReport {
    match hypervisor.is_active(vm) {
        Ok(true) => {}
        _ => return ValidationReport::aborted(vm, Verdict::VmNotRunning),
    }

    let transport = match transport_for_vm(vm, transport_config) {
        Ok(transport) => transport,
        Err(e) => {
            debug!(vm, "transport selection failed: {}", e);
            return ValidationReport::aborted(vm, Verdict::TransportUnreachable);
        }
    };

    run_validation_with_transport(vm, transport.as_ref(), expectations)
}

/// Phase execution against an already-selected transport.
pub fn run_validation_with_transport(
    vm: &str,
    transport: &dyn GuestTransport,
    expectations: &ValidationExpectations,
) -> ValidationReport {
    let provisioning_done = query_provisioning_done(transport);
    debug!(vm, provisioning_done, transport = transport.name(), "starting validation phases");

    let ctx = ValidationContext {
        vm_name: vm,
        transport,
        provisioning_done,
        expectations,
    };

    let disk = check_disk(&ctx);
    let mut phase_reports = Vec::new();
    for phase in phases() {
        let tally = phase.run(&ctx);
        debug!(
            vm,
            phase = phase.name(),
            total = tally.total,
            passed = tally.passed,
            failed = tally.failed,
            skipped = tally.skipped,
            "phase finished"
        );
        phase_reports.push(PhaseReport {
            phase: phase.name(),
            tally,
        });
    }

    let verdict = compute_verdict(disk.as_ref(), &phase_reports);
    ValidationReport {
        vm_name: vm.to_string(),
        verdict,
        transport: Some(transport.name()),
        provisioning_done: Some(provisioning_done),
        disk,
        phases: phase_reports,
    }
}
