//! The ordered expectation-check phases.
//!
//! Each phase is independent: it increments `total` once per configured
//! expectation and exactly one of passed/failed/skipped, and never raises on
//! an unreachable guest — absence degrades to the tri-state classification.

use std::time::Duration;

use wvm_config::ValidationExpectations;

use super::report::{DiskUsage, PhaseTally};
use crate::transport::GuestTransport;

const CHECK_TIMEOUT: Duration = Duration::from_secs(30);
const SMOKE_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything one phase needs; the transport handle is explicit, never
/// ambient.
pub struct ValidationContext<'a> {
    pub vm_name: &'a str,
    pub transport: &'a dyn GuestTransport,
    pub provisioning_done: bool,
    pub expectations: &'a ValidationExpectations,
}

pub trait CheckPhase {
    fn name(&self) -> &'static str;
    fn run(&self, ctx: &ValidationContext) -> PhaseTally;
}

/// The fixed phase order. Disk and data paths run first so failure reports
/// carry diagnostic context.
pub fn phases() -> Vec<Box<dyn CheckPhase>> {
    vec![
        Box::new(DataPathPhase),
        Box::new(PackagePhase),
        Box::new(SnapPhase),
        Box::new(ServicePhase),
        Box::new(ApplicationPhase),
        Box::new(SmokePhase),
    ]
}

fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Ask the guest whether its own asynchronous first-boot provisioning has
/// finished. Queried once per validation run; an unreachable guest counts
/// as "still converging" so unmet expectations stay pending.
pub fn query_provisioning_done(transport: &dyn GuestTransport) -> bool {
    let command =
        "if command -v cloud-init >/dev/null 2>&1; then cloud-init status; else echo status: done; fi";
    match transport.execute(command, CHECK_TIMEOUT) {
        Some(output) => output.contains("done"),
        None => false,
    }
}

/// Root filesystem usage, as one standalone record outside the phase list.
pub fn check_disk(ctx: &ValidationContext) -> Option<DiskUsage> {
    let output = ctx
        .transport
        .execute("df -P / | awk 'NR==2 {print $5}'", CHECK_TIMEOUT)?;
    let used_pct: u8 = output.trim().trim_end_matches('%').parse().ok()?;
    Some(DiskUsage {
        used_pct,
        limit_pct: ctx.expectations.disk_limit_pct,
    })
}

/// Bind-mounted or copied data paths must exist and be populated.
pub struct DataPathPhase;

impl CheckPhase for DataPathPhase {
    fn name(&self) -> &'static str {
        "data_paths"
    }

    fn run(&self, ctx: &ValidationContext) -> PhaseTally {
        let mut tally = PhaseTally::default();
        for path in &ctx.expectations.data_paths {
            let display = path.display().to_string();
            let q = sh_quote(&display);
            let command = format!(
                "if [ -d {q} ]; then [ -n \"$(ls -A {q} 2>/dev/null)\" ] && echo populated || echo empty; \
                 elif [ -e {q} ]; then [ -s {q} ] && echo populated || echo empty; \
                 else echo missing; fi",
                q = q
            );
            match ctx
                .transport
                .execute(&command, CHECK_TIMEOUT)
                .as_deref()
                .map(str::trim)
            {
                Some("populated") => tally.pass(&display, None),
                Some(other) => tally.miss(
                    ctx.provisioning_done,
                    &display,
                    Some(other.to_string()),
                ),
                None => tally.miss(
                    ctx.provisioning_done,
                    &display,
                    Some("no answer from guest".to_string()),
                ),
            }
        }
        tally
    }
}

/// Debian packages present, with version.
pub struct PackagePhase;

impl CheckPhase for PackagePhase {
    fn name(&self) -> &'static str {
        "packages"
    }

    fn run(&self, ctx: &ValidationContext) -> PhaseTally {
        let mut tally = PhaseTally::default();
        for package in &ctx.expectations.packages {
            let command = format!(
                "dpkg-query -W -f='${{Version}}' {} 2>/dev/null",
                sh_quote(package)
            );
            match ctx.transport.execute(&command, CHECK_TIMEOUT) {
                Some(version) if !version.trim().is_empty() => {
                    tally.pass(package, Some(version.trim().to_string()));
                }
                _ => tally.miss(
                    ctx.provisioning_done,
                    package,
                    Some("not installed".to_string()),
                ),
            }
        }
        tally
    }
}

/// Snap packages present, with version.
pub struct SnapPhase;

impl CheckPhase for SnapPhase {
    fn name(&self) -> &'static str {
        "snaps"
    }

    fn run(&self, ctx: &ValidationContext) -> PhaseTally {
        let mut tally = PhaseTally::default();
        for snap in &ctx.expectations.snaps {
            let command = format!(
                "snap list {} 2>/dev/null | awk 'NR==2 {{print $2}}'",
                sh_quote(snap)
            );
            match ctx.transport.execute(&command, CHECK_TIMEOUT) {
                Some(version) if !version.trim().is_empty() => {
                    tally.pass(snap, Some(version.trim().to_string()));
                }
                _ => tally.miss(
                    ctx.provisioning_done,
                    snap,
                    Some("not installed".to_string()),
                ),
            }
        }
        tally
    }
}

/// Systemd units enabled and active with a main PID.
pub struct ServicePhase;

impl CheckPhase for ServicePhase {
    fn name(&self) -> &'static str {
        "services"
    }

    fn run(&self, ctx: &ValidationContext) -> PhaseTally {
        let mut tally = PhaseTally::default();
        for service in &ctx.expectations.services {
            let q = sh_quote(service);
            let command = format!(
                "systemctl is-enabled {q} >/dev/null 2>&1 && \
                 systemctl is-active {q} >/dev/null 2>&1 && \
                 systemctl show -p MainPID --value {q}",
                q = q
            );
            let pid = ctx
                .transport
                .execute(&command, CHECK_TIMEOUT)
                .and_then(|out| out.trim().parse::<u32>().ok());
            match pid {
                Some(pid) if pid > 0 => tally.pass(service, Some(format!("pid {}", pid))),
                Some(_) => tally.miss(
                    ctx.provisioning_done,
                    service,
                    Some("active but no main PID".to_string()),
                ),
                None => tally.miss(
                    ctx.provisioning_done,
                    service,
                    Some("not enabled and active".to_string()),
                ),
            }
        }
        tally
    }
}

/// Detected applications with a live process in the guest.
pub struct ApplicationPhase;

impl CheckPhase for ApplicationPhase {
    fn name(&self) -> &'static str {
        "applications"
    }

    fn run(&self, ctx: &ValidationContext) -> PhaseTally {
        let mut tally = PhaseTally::default();
        for app in &ctx.expectations.applications {
            let command = format!("pgrep -f {} 2>/dev/null | head -n 1", sh_quote(app));
            match ctx.transport.execute(&command, CHECK_TIMEOUT) {
                Some(pid) if !pid.trim().is_empty() => {
                    tally.pass(app, Some(format!("pid {}", pid.trim())));
                }
                _ => tally.miss(
                    ctx.provisioning_done,
                    app,
                    Some("no live process".to_string()),
                ),
            }
        }
        tally
    }
}

/// Launchability smoke tests.
///
/// "Installed" and "launchable" are separate expectations: a package can be
/// present yet fail to run (missing runtime dependency, headless display).
pub struct SmokePhase;

impl CheckPhase for SmokePhase {
    fn name(&self) -> &'static str {
        "smoke"
    }

    fn run(&self, ctx: &ValidationContext) -> PhaseTally {
        let mut tally = PhaseTally::default();
        for test in &ctx.expectations.smoke_tests {
            let installed_name = format!("{} (installed)", test.name);
            let command = format!("command -v {}", sh_quote(&test.name));
            match ctx.transport.execute(&command, CHECK_TIMEOUT) {
                Some(path) if !path.trim().is_empty() => {
                    tally.pass(&installed_name, Some(path.trim().to_string()));
                }
                _ => tally.miss(
                    ctx.provisioning_done,
                    &installed_name,
                    Some("binary not found".to_string()),
                ),
            }

            let launch_name = format!("{} (launchable)", test.name);
            match ctx.transport.execute(&test.command, SMOKE_TIMEOUT) {
                Some(output) if !output.trim().is_empty() => {
                    tally.pass(&launch_name, Some(output.trim().to_string()));
                }
                _ => tally.miss(
                    ctx.provisioning_done,
                    &launch_name,
                    Some("did not launch".to_string()),
                ),
            }
        }
        tally
    }
}
