//! Topology resolution: dependency leveling and ordering.

use std::path::PathBuf;

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use tracing::debug;
use wvm_config::{
    ComposeConfig, HealthCheckSpec, NetworkSpec, ValidationExpectations, VmDefaults, VolumeSpec,
};
use wvm_core::error::{Result, WvmError};

/// Orchestration-level view of one VM's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VmState {
    Pending,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// One named VM in a resolved topology.
#[derive(Debug, Clone)]
pub struct OrchestratedVm {
    pub name: String,
    pub config: Option<PathBuf>,
    pub depends_on: Vec<String>,
    pub state: VmState,
    pub health_check: Option<HealthCheckSpec>,
    pub health_check_passed: Option<bool>,
    pub expectations: Option<ValidationExpectations>,
}

/// The resolved topology: immutable once built.
///
/// Construction is all-or-nothing: an unknown dependency or a cycle fails
/// the build and no partial plan is ever returned.
#[derive(Debug, Clone)]
pub struct OrchestrationPlan {
    pub vms: IndexMap<String, OrchestratedVm>,
    /// Levels of VMs startable concurrently; earlier levels first.
    pub start_order: Vec<Vec<String>>,
    /// Mirror of `start_order`: levels reversed and members within each
    /// level reversed, so the flattened stop sequence is the exact reverse
    /// of the flattened start sequence.
    pub stop_order: Vec<Vec<String>>,
    pub volumes: IndexMap<String, VolumeSpec>,
    pub networks: IndexMap<String, NetworkSpec>,
    pub defaults: Option<VmDefaults>,
}

impl OrchestrationPlan {
    pub fn build(config: &ComposeConfig) -> Result<Self> {
        config.validate()?;

        let vms: IndexMap<String, OrchestratedVm> = config
            .vms
            .iter()
            .map(|(name, vm)| {
                (
                    name.clone(),
                    OrchestratedVm {
                        name: name.clone(),
                        config: vm.config.clone(),
                        depends_on: vm.depends_on.clone(),
                        state: VmState::Pending,
                        health_check: vm.health_check.clone(),
                        health_check_passed: None,
                        expectations: vm.expectations.clone(),
                    },
                )
            })
            .collect();

        let start_order = Self::level(&vms)?;
        let stop_order: Vec<Vec<String>> = start_order
            .iter()
            .rev()
            .map(|level| level.iter().rev().cloned().collect())
            .collect();

        debug!(levels = start_order.len(), vms = vms.len(), "orchestration plan built");

        Ok(Self {
            vms,
            start_order,
            stop_order,
            volumes: config.volumes.clone(),
            networks: config.networks.clone(),
            defaults: config.defaults.clone(),
        })
    }

    /// Topological layering, not a flat sort: siblings within a level have
    /// no ordering constraint among themselves and may start concurrently.
    fn level(vms: &IndexMap<String, OrchestratedVm>) -> Result<Vec<Vec<String>>> {
        let mut placed: IndexSet<String> = IndexSet::new();
        let mut levels: Vec<Vec<String>> = Vec::new();

        while placed.len() < vms.len() {
            // Declaration order within a level follows the compose document.
            let level: Vec<String> = vms
                .iter()
                .filter(|(name, vm)| {
                    !placed.contains(name.as_str())
                        && vm.depends_on.iter().all(|d| placed.contains(d.as_str()))
                })
                .map(|(name, _)| name.clone())
                .collect();

            if level.is_empty() {
                // Unknown dependencies were rejected at load time, so a
                // stalled pass means a cycle.
                let remaining: Vec<String> = vms
                    .keys()
                    .filter(|name| !placed.contains(name.as_str()))
                    .cloned()
                    .collect();
                return Err(WvmError::Config(format!(
                    "Dependency cycle among VMs: {}",
                    remaining.join(", ")
                )));
            }

            for name in &level {
                placed.insert(name.clone());
            }
            levels.push(level);
        }

        Ok(levels)
    }

    /// Expand `requested` to include its transitive dependencies (never its
    /// dependents), so "start just the frontend" also starts what it needs.
    /// `None` selects every VM.
    pub fn with_dependencies(&self, requested: Option<&[&str]>) -> Result<IndexSet<String>> {
        let requested = match requested {
            None => return Ok(self.vms.keys().cloned().collect()),
            Some(names) => names,
        };

        let mut selected: IndexSet<String> = IndexSet::new();
        let mut queue: Vec<&str> = Vec::new();
        for name in requested {
            let vm = self
                .vms
                .get(*name)
                .ok_or_else(|| WvmError::Config(format!("Unknown VM '{}'", name)))?;
            if selected.insert(vm.name.clone()) {
                queue.push(&vm.name);
            }
        }

        while let Some(name) = queue.pop() {
            // Plan construction guarantees every dependency is declared.
            let vm = &self.vms[name];
            for dep in &vm.depends_on {
                if selected.insert(dep.clone()) {
                    queue.push(dep);
                }
            }
        }

        Ok(selected)
    }

    /// Exact subset resolution, no expansion: used by `down`, where
    /// stopping a dependency the operator did not name would be surprising.
    pub fn resolve_exact(&self, requested: Option<&[&str]>) -> Result<IndexSet<String>> {
        match requested {
            None => Ok(self.vms.keys().cloned().collect()),
            Some(names) => {
                let mut selected = IndexSet::new();
                for name in names {
                    if !self.vms.contains_key(*name) {
                        return Err(WvmError::Config(format!("Unknown VM '{}'", name)));
                    }
                    selected.insert(name.to_string());
                }
                Ok(selected)
            }
        }
    }
}
