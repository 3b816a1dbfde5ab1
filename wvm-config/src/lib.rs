//! Declarative compose configuration for multi-VM topologies.
//!
//! A compose document lists named VMs, their dependencies, optional health
//! checks, and convergence expectations. Loading is strict: unsupported
//! versions and dangling dependency references are rejected before any plan
//! is built.

pub mod compose;
mod loader;

pub use compose::{
    ComposeConfig, ComposeVm, HealthCheckSpec, NetworkSpec, SmokeTest, ValidationExpectations,
    VmDefaults, VolumeSpec, SUPPORTED_COMPOSE_VERSION,
};
