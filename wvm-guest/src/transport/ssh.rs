//! SSH fallback channel over a per-VM loopback forwarded port.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use duct::cmd;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};
use wvm_core::is_tool_installed;

use super::GuestTransport;

const SSH_PORT_BASE: u16 = 22000;
const SSH_PORT_RANGE: u32 = 1000;
const CONNECT_TIMEOUT_SECS: u64 = 5;
const WAIT_POLL: Duration = Duration::from_millis(100);

/// Deterministic fallback port for a VM with no persisted record.
///
/// A pure function of the VM name, so every process computes the same port
/// without shared coordination.
pub fn fallback_ssh_port(vm_name: &str) -> u16 {
    let digest = Sha256::digest(vm_name.as_bytes());
    let n = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    SSH_PORT_BASE + (n % SSH_PORT_RANGE) as u16
}

/// Forwarded port for `vm_name`: the persisted record if one exists,
/// otherwise the deterministic fallback.
pub fn ssh_port_for(vm_name: &str, data_dir: &Path) -> u16 {
    let record = data_dir.join(vm_name).join("ssh_port");
    if let Ok(content) = fs::read_to_string(&record) {
        if let Ok(port) = content.trim().parse::<u16>() {
            debug!(vm = vm_name, port, "using persisted SSH port record");
            return port;
        }
    }
    fallback_ssh_port(vm_name)
}

pub struct SshTransport {
    port: u16,
    user: String,
    key_path: PathBuf,
}

impl SshTransport {
    pub fn new(port: u16, user: &str, key_path: &Path) -> Self {
        Self {
            port,
            user: user.to_string(),
            key_path: key_path.to_path_buf(),
        }
    }

    pub fn for_vm(vm_name: &str, data_dir: &Path, user: &str, key_path: &Path) -> Self {
        Self::new(ssh_port_for(vm_name, data_dir), user, key_path)
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl GuestTransport for SshTransport {
    fn name(&self) -> &'static str {
        "ssh"
    }

    /// Non-interactive remote execution against the loopback forward.
    ///
    /// The guest is an ephemeral local sandbox, so host-key checking is
    /// disabled and batch mode guarantees we never block on a prompt. Any
    /// failure (missing client or key, refused connection, bad exit code,
    /// deadline) yields `None`.
    fn execute(&self, command: &str, timeout: Duration) -> Option<String> {
        if !is_tool_installed("ssh") || !self.key_path.exists() {
            return None;
        }

        let handle = cmd!(
            "ssh",
            "-i",
            &self.key_path,
            "-p",
            self.port.to_string(),
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "BatchMode=yes",
            "-o",
            format!("ConnectTimeout={}", CONNECT_TIMEOUT_SECS),
            format!("{}@127.0.0.1", self.user),
            command
        )
        .stdout_capture()
        .stderr_null()
        .unchecked()
        .start()
        .ok()?;

        let deadline = Instant::now() + timeout;
        loop {
            match handle.try_wait() {
                Ok(Some(output)) => {
                    if !output.status.success() {
                        trace!(port = self.port, "ssh command exited non-zero");
                        return None;
                    }
                    return String::from_utf8(output.stdout.clone()).ok();
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = handle.kill();
                        debug!(port = self.port, "ssh command hit deadline; giving up");
                        return None;
                    }
                    std::thread::sleep(WAIT_POLL);
                }
                Err(_) => return None,
            }
        }
    }
}
