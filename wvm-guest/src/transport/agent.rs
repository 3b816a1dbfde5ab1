//! Guest-agent channel: out-of-band command execution via the hypervisor.
//!
//! Needs no network path into the guest. A command is submitted with
//! `guest-exec`, then `guest-exec-status` is polled until the guest reports
//! the process exited or the per-call deadline elapses.

use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use duct::cmd;
use serde_json::{json, Value};
use tracing::{debug, trace};

use super::GuestTransport;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct AgentTransport {
    domain: String,
    poll_interval: Duration,
}

impl AgentTransport {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Send one JSON request over the agent channel.
    fn agent_command(&self, payload: &Value) -> Option<Value> {
        let output = cmd!(
            "virsh",
            "qemu-agent-command",
            &self.domain,
            payload.to_string()
        )
        .stderr_null()
        .read()
        .ok()?;
        serde_json::from_str(output.trim()).ok()
    }

    /// Is the agent inside the guest answering at all?
    pub fn ping(&self) -> bool {
        self.agent_command(&json!({"execute": "guest-ping"})).is_some()
    }
}

impl GuestTransport for AgentTransport {
    fn name(&self) -> &'static str {
        "agent"
    }

    fn execute(&self, command: &str, timeout: Duration) -> Option<String> {
        let submit = json!({
            "execute": "guest-exec",
            "arguments": {
                "path": "/bin/sh",
                "arg": ["-c", command],
                "capture-output": true,
            }
        });
        let response = self.agent_command(&submit)?;
        let pid = response["return"]["pid"].as_i64()?;
        trace!(domain = %self.domain, pid, "guest-exec submitted");

        let deadline = Instant::now() + timeout;
        loop {
            let status = self.agent_command(&json!({
                "execute": "guest-exec-status",
                "arguments": {"pid": pid}
            }))?;
            let ret = &status["return"];
            if ret["exited"].as_bool() == Some(true) {
                let encoded = ret["out-data"].as_str().unwrap_or("");
                let decoded = BASE64.decode(encoded).ok()?;
                return String::from_utf8(decoded).ok();
            }
            if Instant::now() >= deadline {
                debug!(
                    domain = %self.domain,
                    pid,
                    "guest command still running at deadline; giving up"
                );
                return None;
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    fn probe(&self) -> bool {
        self.ping()
    }
}
