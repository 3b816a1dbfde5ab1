//! Guest execution transport and convergence validation.
//!
//! Runs shell commands inside workstation-clone VMs over one of two
//! channels (hypervisor guest agent or SSH on a loopback forwarded port)
//! and validates a freshly-provisioned guest through phased expectation
//! checks with a tri-state pass/fail/pending classification.

pub mod transport;
pub mod validate;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use transport::{
    fallback_ssh_port, select_transport, ssh_port_for, transport_for_vm, AgentTransport,
    GuestTransport, SelectionOptions, SshTransport, TransportConfig,
};
pub use validate::{
    run_validation, run_validation_with_transport, HypervisorQuery, ValidationReport, Verdict,
};
