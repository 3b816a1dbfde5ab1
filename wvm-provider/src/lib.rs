//! VM lifecycle backend abstraction.
//!
//! The orchestrator drives VMs exclusively through the [`LifecycleBackend`]
//! trait; concrete hypervisor bindings live outside this workspace. Failures
//! surface as errors and are caught at the per-VM boundary by the caller.

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use wvm_core::error::{Result, WvmError};

// When the `test-helpers` feature is enabled, include the mock backend.
#[cfg(feature = "test-helpers")]
pub mod mock;

/// Live state as reported by the hypervisor, independent of what the
/// orchestrator believes about the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendState {
    Running,
    Stopped,
    Unknown,
}

/// Snapshot of one VM as the backend sees it.
#[derive(Debug, Clone)]
pub struct VmStatus {
    pub state: BackendState,
    pub ip: Option<String>,
    pub uptime: Option<String>,
}

impl VmStatus {
    pub fn is_running(&self) -> bool {
        self.state == BackendState::Running
    }
}

/// Lifecycle operations observers are notified about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOp {
    Create,
    Start,
    Stop,
    Delete,
}

impl LifecycleOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleOp::Create => "create",
            LifecycleOp::Start => "start",
            LifecycleOp::Stop => "stop",
            LifecycleOp::Delete => "delete",
        }
    }
}

/// Fire-and-forget notifications around lifecycle calls.
///
/// Audit loggers, policy engines and plugin hooks implement this; they are
/// observers only and never alter orchestration control flow.
pub trait LifecycleObserver: Send + Sync {
    fn on_pre_op(&self, _op: LifecycleOp, _vm: &str) {}
    fn on_post_op(&self, _op: LifecycleOp, _vm: &str, _success: bool) {}
}

/// The contract between the orchestrator and a hypervisor binding.
pub trait LifecycleBackend: Send + Sync {
    /// Get the name of the backend (e.g. "libvirt").
    fn name(&self) -> &'static str;

    /// Provision a new VM and return its backend identifier.
    fn create(&self, name: &str, config: Option<&Path>) -> Result<String>;

    /// Start an existing, stopped VM.
    fn start(&self, name: &str) -> Result<()>;

    /// Stop a running VM without destroying it.
    fn stop(&self, name: &str, force: bool) -> Result<()>;

    /// Query live state for one VM.
    fn get_status(&self, name: &str) -> Result<VmStatus>;

    /// Destroy a VM, removing all associated resources.
    fn delete(&self, name: &str) -> Result<()>;

    /// Whether the backend knows this VM at all.
    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.get_status(name).is_ok())
    }

    /// Fetch recent console or provisioning logs for one VM.
    fn logs(&self, _name: &str) -> Result<String> {
        Err(WvmError::Provider(
            "Log retrieval not supported by this backend".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoLogsBackend;

    impl LifecycleBackend for NoLogsBackend {
        fn name(&self) -> &'static str {
            "nologs"
        }
        fn create(&self, _name: &str, _config: Option<&Path>) -> Result<String> {
            Ok("id".into())
        }
        fn start(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        fn stop(&self, _name: &str, _force: bool) -> Result<()> {
            Ok(())
        }
        fn get_status(&self, _name: &str) -> Result<VmStatus> {
            Ok(VmStatus {
                state: BackendState::Stopped,
                ip: None,
                uptime: None,
            })
        }
        fn delete(&self, _name: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn default_logs_is_unsupported() {
        let backend = NoLogsBackend;
        let err = backend.logs("vm").unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn default_exists_follows_status() {
        let backend = NoLogsBackend;
        assert!(backend.exists("vm").unwrap());
    }
}
