//! Scriptable in-memory backend for orchestrator and pipeline tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use crate::{BackendState, LifecycleBackend, VmStatus};
use wvm_core::error::{Result, WvmError};

#[derive(Default)]
struct MockState {
    created: HashSet<String>,
    running: HashSet<String>,
    calls: Vec<String>,
    failures: HashMap<String, String>,
}

/// In-memory [`LifecycleBackend`] that records every call and can be told
/// to fail specific operations on specific VMs.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed VMs that already exist (created but stopped).
    pub fn with_existing(names: &[&str]) -> Self {
        let backend = Self::new();
        {
            let mut state = backend.state.lock().expect("mock state poisoned");
            for name in names {
                state.created.insert(name.to_string());
            }
        }
        backend
    }

    /// Make `op` fail for `vm` with the given message.
    pub fn fail_on(&self, op: &str, vm: &str, message: &str) {
        let mut state = self.state.lock().expect("mock state poisoned");
        state
            .failures
            .insert(format!("{} {}", op, vm), message.to_string());
    }

    /// Every call made so far, in order, as "op vm" strings.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().expect("mock state poisoned").calls.clone()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.state
            .lock()
            .expect("mock state poisoned")
            .running
            .contains(name)
    }

    fn record(&self, op: &str, vm: &str) -> Result<()> {
        let mut state = self.state.lock().expect("mock state poisoned");
        let key = format!("{} {}", op, vm);
        state.calls.push(key.clone());
        if let Some(message) = state.failures.get(&key) {
            return Err(WvmError::Provider(message.clone()));
        }
        Ok(())
    }
}

impl LifecycleBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn create(&self, name: &str, _config: Option<&Path>) -> Result<String> {
        self.record("create", name)?;
        let mut state = self.state.lock().expect("mock state poisoned");
        state.created.insert(name.to_string());
        Ok(format!("mock-{}", name))
    }

    fn start(&self, name: &str) -> Result<()> {
        self.record("start", name)?;
        let mut state = self.state.lock().expect("mock state poisoned");
        if !state.created.contains(name) {
            return Err(WvmError::Provider(format!("unknown VM '{}'", name)));
        }
        state.running.insert(name.to_string());
        Ok(())
    }

    fn stop(&self, name: &str, _force: bool) -> Result<()> {
        self.record("stop", name)?;
        let mut state = self.state.lock().expect("mock state poisoned");
        state.running.remove(name);
        Ok(())
    }

    fn get_status(&self, name: &str) -> Result<VmStatus> {
        let state = self.state.lock().expect("mock state poisoned");
        if !state.created.contains(name) {
            return Err(WvmError::Provider(format!("unknown VM '{}'", name)));
        }
        let backend_state = if state.running.contains(name) {
            BackendState::Running
        } else {
            BackendState::Stopped
        };
        Ok(VmStatus {
            state: backend_state,
            ip: state.running.contains(name).then(|| "127.0.0.1".to_string()),
            uptime: None,
        })
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.record("delete", name)?;
        let mut state = self.state.lock().expect("mock state poisoned");
        state.created.remove(name);
        state.running.remove(name);
        Ok(())
    }

    fn exists(&self, name: &str) -> Result<bool> {
        let state = self.state.lock().expect("mock state poisoned");
        Ok(state.created.contains(name))
    }

    fn logs(&self, name: &str) -> Result<String> {
        Ok(format!("mock logs for {}\n", name))
    }
}
