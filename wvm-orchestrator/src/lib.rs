//! Multi-VM orchestration.
//!
//! Builds a dependency-leveled plan from a compose document and drives it
//! against a lifecycle backend: leveled concurrent starts, mirror-order
//! stops, per-VM fault isolation, transactional creation, and optional
//! post-start health probing through the guest validation pipeline.

pub mod health;
pub mod orchestrator;
pub mod plan;

pub use health::{BackendHypervisor, HealthProbe, ValidationHealthProbe};
pub use orchestrator::{
    DefaultTransportFactory, OrchestrationResult, Orchestrator, TransportFactory, VmRuntimeStatus,
};
pub use plan::{OrchestratedVm, OrchestrationPlan, VmState};
