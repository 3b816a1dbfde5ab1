//! Validation result structures and the aggregate verdict.

use serde::Serialize;
use tracing::info;

/// Tri-state outcome for one expectation.
///
/// `Skipped` means "not yet true, but the guest's own provisioning is still
/// converging" — distinct from `Failed`, which means the same expectation is
/// unmet after convergence finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    Skipped,
}

/// One expectation's result, for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct CheckDetail {
    pub name: String,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

/// Per-phase tallies plus structured per-item details.
///
/// Construction maintains `passed + failed + skipped == total`: every
/// recorded expectation increments `total` and exactly one bucket.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseTally {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub details: Vec<CheckDetail>,
}

impl PhaseTally {
    pub fn pass(&mut self, name: &str, info: Option<String>) {
        self.total += 1;
        self.passed += 1;
        self.details.push(CheckDetail {
            name: name.to_string(),
            status: CheckStatus::Passed,
            info,
        });
    }

    /// Record an unmet expectation, classified by convergence state.
    pub fn miss(&mut self, provisioning_done: bool, name: &str, info: Option<String>) {
        self.total += 1;
        let status = if provisioning_done {
            self.failed += 1;
            CheckStatus::Failed
        } else {
            self.skipped += 1;
            CheckStatus::Skipped
        };
        self.details.push(CheckDetail {
            name: name.to_string(),
            status,
            info,
        });
    }
}

/// Root filesystem headroom record, kept separate from the phase tallies.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DiskUsage {
    pub used_pct: u8,
    pub limit_pct: u8,
}

impl DiskUsage {
    pub fn over_limit(&self) -> bool {
        self.used_pct > self.limit_pct
    }
}

/// Aggregate outcome of one validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The hypervisor reports the VM inactive; no phase ran.
    VmNotRunning,
    /// No transport answered within the bounded wait; no phase ran.
    TransportUnreachable,
    /// Nothing failed but some expectations are still converging.
    Pending,
    Pass,
    /// At least one expectation failed after convergence.
    Partial,
    NoChecks,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub phase: &'static str,
    #[serde(flatten)]
    pub tally: PhaseTally,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub vm_name: String,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning_done: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskUsage>,
    pub phases: Vec<PhaseReport>,
}

impl ValidationReport {
    /// Report for a run that never reached the phases.
    pub fn aborted(vm_name: &str, verdict: Verdict) -> Self {
        Self {
            vm_name: vm_name.to_string(),
            verdict,
            transport: None,
            provisioning_done: None,
            disk: None,
            phases: Vec::new(),
        }
    }

    /// (checks, passed, failed, skipped) including the disk record.
    pub fn totals(&self) -> (u32, u32, u32, u32) {
        let mut checks = 0;
        let mut passed = 0;
        let mut failed = 0;
        let mut skipped = 0;
        if let Some(disk) = &self.disk {
            checks += 1;
            if disk.over_limit() {
                failed += 1;
            } else {
                passed += 1;
            }
        }
        for report in &self.phases {
            checks += report.tally.total;
            passed += report.tally.passed;
            failed += report.tally.failed;
            skipped += report.tally.skipped;
        }
        (checks, passed, failed, skipped)
    }

    pub fn log_summary(&self) {
        let (checks, passed, failed, skipped) = self.totals();
        info!(
            vm = %self.vm_name,
            verdict = ?self.verdict,
            checks,
            passed,
            failed,
            skipped,
            "validation finished"
        );
        for report in &self.phases {
            for detail in &report.tally.details {
                if detail.status != CheckStatus::Passed {
                    info!(
                        vm = %self.vm_name,
                        phase = report.phase,
                        check = %detail.name,
                        status = ?detail.status,
                        info = detail.info.as_deref().unwrap_or(""),
                        "unmet expectation"
                    );
                }
            }
        }
    }
}

/// Compute the aggregate verdict once, purely from accumulated counts.
pub fn compute_verdict(disk: Option<&DiskUsage>, phases: &[PhaseReport]) -> Verdict {
    let total_failed: u32 = disk.map_or(0, |d| d.over_limit() as u32)
        + phases.iter().map(|p| p.tally.failed).sum::<u32>();
    let total_skipped: u32 = phases.iter().map(|p| p.tally.skipped).sum();
    let total_checks: u32 =
        disk.is_some() as u32 + phases.iter().map(|p| p.tally.total).sum::<u32>();

    if total_failed > 0 {
        Verdict::Partial
    } else if total_skipped > 0 {
        Verdict::Pending
    } else if total_checks > 0 {
        Verdict::Pass
    } else {
        Verdict::NoChecks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase(total: u32, passed: u32, failed: u32, skipped: u32) -> PhaseReport {
        PhaseReport {
            phase: "test",
            tally: PhaseTally {
                total,
                passed,
                failed,
                skipped,
                details: Vec::new(),
            },
        }
    }

    #[test]
    fn all_passed_is_pass() {
        let phases = vec![phase(10, 10, 0, 0)];
        assert_eq!(compute_verdict(None, &phases), Verdict::Pass);
    }

    #[test]
    fn skips_without_failures_are_pending() {
        let phases = vec![phase(10, 7, 0, 3)];
        assert_eq!(compute_verdict(None, &phases), Verdict::Pending);
    }

    #[test]
    fn any_failure_is_partial() {
        let phases = vec![phase(10, 8, 2, 0)];
        assert_eq!(compute_verdict(None, &phases), Verdict::Partial);
        // Failures dominate pending skips.
        let phases = vec![phase(10, 5, 2, 3)];
        assert_eq!(compute_verdict(None, &phases), Verdict::Partial);
    }

    #[test]
    fn nothing_checked_is_no_checks() {
        assert_eq!(compute_verdict(None, &[]), Verdict::NoChecks);
        let phases = vec![phase(0, 0, 0, 0)];
        assert_eq!(compute_verdict(None, &phases), Verdict::NoChecks);
    }

    #[test]
    fn disk_over_limit_counts_as_a_failure() {
        let disk = DiskUsage {
            used_pct: 95,
            limit_pct: 90,
        };
        let phases = vec![phase(10, 10, 0, 0)];
        assert_eq!(compute_verdict(Some(&disk), &phases), Verdict::Partial);
    }

    #[test]
    fn disk_alone_can_carry_a_pass() {
        let disk = DiskUsage {
            used_pct: 40,
            limit_pct: 90,
        };
        assert_eq!(compute_verdict(Some(&disk), &[]), Verdict::Pass);
    }

    #[test]
    fn tally_invariant_holds() {
        let mut tally = PhaseTally::default();
        tally.pass("a", None);
        tally.miss(true, "b", None);
        tally.miss(false, "c", None);
        assert_eq!(tally.total, 3);
        assert_eq!(tally.passed + tally.failed + tally.skipped, tally.total);
    }
}
