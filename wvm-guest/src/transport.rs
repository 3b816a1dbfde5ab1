//! Remote command execution inside a guest.
//!
//! Two interchangeable channels: the hypervisor's out-of-band guest agent
//! (default, needs no guest network path) and SSH over a loopback forwarded
//! port (fallback). Both return output-or-absence: an empty string is a
//! valid successful result and is distinct from "no answer".

use std::time::{Duration, Instant};

use tracing::{debug, info};
use wvm_core::error::{Result, WvmError};

mod agent;
mod ssh;

pub use agent::AgentTransport;
pub use ssh::{fallback_ssh_port, ssh_port_for, SshTransport};

/// A channel that can run one shell command inside one VM.
///
/// The selected handle is passed explicitly to every caller; there is no
/// process-wide transport mode.
pub trait GuestTransport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run `command` under a shell in the guest, bounded by `timeout`.
    ///
    /// `None` means the command could not be confirmed: the channel did not
    /// answer, or the deadline elapsed. A timed-out command may still be
    /// running inside the guest; callers must not assume it had no effect.
    fn execute(&self, command: &str, timeout: Duration) -> Option<String>;

    /// Cheap liveness probe used during transport selection.
    fn probe(&self) -> bool {
        self.execute("true", Duration::from_secs(5)).is_some()
    }
}

impl std::fmt::Debug for dyn GuestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestTransport")
            .field("name", &self.name())
            .finish()
    }
}

/// Bounds for the one-time transport selection protocol.
#[derive(Debug, Clone)]
pub struct SelectionOptions {
    /// How long to keep re-probing the agent while the guest boots.
    pub wait: Duration,
    /// Interval between agent probes.
    pub probe_interval: Duration,
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(180),
            probe_interval: Duration::from_secs(5),
        }
    }
}

/// Pick the transport for a validation session.
///
/// Probes the agent first, re-probing for up to `opts.wait` to tolerate a
/// slow first boot. If the agent never answers, one minimal SSH liveness
/// probe decides between SSH and giving up. Runs once per session; every
/// subsequent command uses whatever this returns.
pub fn select_transport(
    agent: Box<dyn GuestTransport>,
    ssh: Box<dyn GuestTransport>,
    opts: &SelectionOptions,
) -> Result<Box<dyn GuestTransport>> {
    let deadline = Instant::now() + opts.wait;
    loop {
        if agent.probe() {
            debug!("guest agent is live");
            return Ok(agent);
        }
        if Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(opts.probe_interval);
    }

    if ssh.probe() {
        info!("guest agent unreachable, falling back to SSH");
        return Ok(ssh);
    }

    Err(WvmError::Transport(format!(
        "no transport answered within {:?}",
        opts.wait
    )))
}

/// Everything needed to construct both transports for one VM.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-VM data directory root; `<data_dir>/<vm>/ssh_port` is the
    /// persisted port record.
    pub data_dir: std::path::PathBuf,
    pub ssh_user: String,
    pub ssh_key: std::path::PathBuf,
    pub selection: SelectionOptions,
}

/// Build both channels for `vm` and run the selection protocol.
pub fn transport_for_vm(vm: &str, config: &TransportConfig) -> Result<Box<dyn GuestTransport>> {
    let agent = AgentTransport::new(vm);
    let ssh = SshTransport::for_vm(vm, &config.data_dir, &config.ssh_user, &config.ssh_key);
    select_transport(Box::new(agent), Box::new(ssh), &config.selection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;

    fn fast_options() -> SelectionOptions {
        SelectionOptions {
            wait: Duration::from_millis(30),
            probe_interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn live_agent_wins() {
        let agent = ScriptedTransport::answering("agent", "ok");
        let ssh = ScriptedTransport::answering("ssh", "ok");
        let selected = select_transport(Box::new(agent), Box::new(ssh), &fast_options()).unwrap();
        assert_eq!(selected.name(), "agent");
    }

    #[test]
    fn dead_agent_falls_back_to_ssh() {
        let agent = ScriptedTransport::dead("agent");
        let ssh = ScriptedTransport::answering("ssh", "ok");
        let selected = select_transport(Box::new(agent), Box::new(ssh), &fast_options()).unwrap();
        assert_eq!(selected.name(), "ssh");
    }

    #[test]
    fn both_dead_is_a_distinct_error() {
        let agent = ScriptedTransport::dead("agent");
        let ssh = ScriptedTransport::dead("ssh");
        let err = select_transport(Box::new(agent), Box::new(ssh), &fast_options()).unwrap_err();
        assert!(matches!(err, WvmError::Transport(_)));
    }

    #[test]
    fn agent_probes_are_retried_within_the_window() {
        let agent = ScriptedTransport::dead("agent");
        let probes = agent.probe_counter();
        let ssh = ScriptedTransport::answering("ssh", "ok");
        select_transport(Box::new(agent), Box::new(ssh), &fast_options()).unwrap();
        assert!(*probes.lock().unwrap() >= 2);
    }
}
