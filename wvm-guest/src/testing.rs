//! Scriptable transport for pipeline and orchestrator tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::transport::GuestTransport;

/// In-memory [`GuestTransport`] with canned responses.
///
/// Rules map a command substring to a response; the first matching rule
/// wins. Commands with no matching rule get the default response.
pub struct ScriptedTransport {
    name: &'static str,
    alive: bool,
    default: Option<String>,
    rules: Mutex<Vec<(String, Option<String>)>>,
    probes: Arc<Mutex<u32>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    /// A live transport answering every command with `response`.
    pub fn answering(name: &'static str, response: &str) -> Self {
        Self {
            name,
            alive: true,
            default: Some(response.to_string()),
            rules: Mutex::new(Vec::new()),
            probes: Arc::new(Mutex::new(0)),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A transport that never answers anything, probes included.
    pub fn dead(name: &'static str) -> Self {
        Self {
            name,
            alive: false,
            default: None,
            rules: Mutex::new(Vec::new()),
            probes: Arc::new(Mutex::new(0)),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Add a rule: any command containing `pattern` gets `response`.
    pub fn respond(self, pattern: &str, response: Option<&str>) -> Self {
        self.rules
            .lock()
            .expect("rules poisoned")
            .push((pattern.to_string(), response.map(str::to_string)));
        self
    }

    /// Shared probe counter, for asserting re-probe behavior.
    pub fn probe_counter(&self) -> Arc<Mutex<u32>> {
        Arc::clone(&self.probes)
    }

    /// Every command executed so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls poisoned").clone()
    }
}

impl GuestTransport for ScriptedTransport {
    fn name(&self) -> &'static str {
        self.name
    }

    fn execute(&self, command: &str, _timeout: Duration) -> Option<String> {
        self.calls
            .lock()
            .expect("calls poisoned")
            .push(command.to_string());
        if !self.alive {
            return None;
        }
        let rules = self.rules.lock().expect("rules poisoned");
        for (pattern, response) in rules.iter() {
            if command.contains(pattern.as_str()) {
                return response.clone();
            }
        }
        self.default.clone()
    }

    fn probe(&self) -> bool {
        *self.probes.lock().expect("probes poisoned") += 1;
        self.alive
    }
}
