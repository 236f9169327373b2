// src/engine/summary.rs

//! End-of-run report: per-status counts plus failure diagnostics.

use std::collections::BTreeMap;
use std::fmt;

use crate::dag::InstanceStatus;
use crate::engine::core::CoreRuntime;
use crate::errors::{EXIT_SUCCESS, EXIT_TASKS_FAILED};
use crate::state::FailureReason;

/// What went wrong with one failed instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureDiagnostic {
    pub label: String,
    pub task: String,
    pub reason: Option<FailureReason>,
    pub exit_code: Option<i32>,
    pub attempts: u32,
    pub output_tail: Vec<String>,
}

#[derive(Debug, Clone)]
struct SummaryEntry {
    status: InstanceStatus,
    diagnostic: Option<FailureDiagnostic>,
}

/// Outcome of a whole invocation, merged over all passes.
///
/// Entries are keyed by instance id. An instance that ran in an early pass
/// and is skipped in a later one keeps the status it ran with.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    entries: BTreeMap<String, SummaryEntry>,
    passes: usize,
    cancelled: bool,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the final state of one pass.
    pub fn absorb(&mut self, core: &CoreRuntime) {
        self.passes += 1;
        self.cancelled |= core.is_cancelled();

        let scheduler = core.scheduler();
        let graph = scheduler.graph();
        for (slot, status) in scheduler.statuses().into_iter().enumerate() {
            let inst = graph.instance(slot);
            if status == InstanceStatus::Skipped && self.entries.contains_key(&inst.id) {
                continue;
            }

            let diagnostic = (status == InstanceStatus::Failed).then(|| {
                let outcome = core.outcome_of(slot);
                FailureDiagnostic {
                    label: inst.label(),
                    task: inst.task_id().to_string(),
                    reason: outcome.and_then(|o| o.failure_reason().cloned()),
                    exit_code: outcome.and_then(|o| o.exit_code),
                    attempts: scheduler.attempts_of(slot),
                    output_tail: outcome.map(|o| o.output_tail.clone()).unwrap_or_default(),
                }
            });

            self.entries
                .insert(inst.id.clone(), SummaryEntry { status, diagnostic });
        }
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub fn count(&self, status: InstanceStatus) -> usize {
        self.entries.values().filter(|e| e.status == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(InstanceStatus::Succeeded)
    }

    pub fn skipped(&self) -> usize {
        self.count(InstanceStatus::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(InstanceStatus::Failed)
    }

    pub fn blocked(&self) -> usize {
        self.count(InstanceStatus::Blocked)
    }

    /// Instances left pending or ready because dispatch stopped early.
    pub fn not_run(&self) -> usize {
        self.entries
            .values()
            .filter(|e| {
                matches!(
                    e.status,
                    InstanceStatus::Pending | InstanceStatus::Ready | InstanceStatus::Running
                )
            })
            .count()
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn passes(&self) -> usize {
        self.passes
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Final status of an instance by id.
    pub fn status_of(&self, instance_id: &str) -> Option<InstanceStatus> {
        self.entries.get(instance_id).map(|e| e.status)
    }

    pub fn failures(&self) -> Vec<&FailureDiagnostic> {
        self.entries
            .values()
            .filter_map(|e| e.diagnostic.as_ref())
            .collect()
    }

    /// Nothing failed, nothing blocked, nothing left behind.
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failed() == 0 && self.blocked() == 0 && self.not_run() == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            EXIT_SUCCESS
        } else {
            EXIT_TASKS_FAILED
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} succeeded, {} skipped, {} failed, {} blocked, {} not run ({} pass{})",
            self.succeeded(),
            self.skipped(),
            self.failed(),
            self.blocked(),
            self.not_run(),
            self.passes,
            if self.passes == 1 { "" } else { "es" },
        )?;
        if self.cancelled {
            writeln!(f, "run was cancelled")?;
        }

        for d in self.failures() {
            let reason = d
                .reason
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let exit = d
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                f,
                "FAILED {} (reason: {}, exit code: {}, attempts: {})",
                d.label, reason, exit, d.attempts
            )?;
            for line in d.output_tail.iter() {
                writeln!(f, "    | {line}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_summary_is_a_success() {
        let s = RunSummary::new();
        assert!(s.is_success());
        assert_eq!(s.exit_code(), EXIT_SUCCESS);
        assert!(s.to_string().starts_with("0 succeeded, 0 skipped"));
    }

    #[test]
    fn cancellation_is_not_a_success() {
        let mut s = RunSummary::new();
        s.mark_cancelled();
        assert_eq!(s.exit_code(), EXIT_TASKS_FAILED);
        assert!(s.to_string().contains("cancelled"));
    }
}
