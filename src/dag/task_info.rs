// src/dag/task_info.rs

//! Per-instance run state and dispatched job descriptions.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dag::instance::TaskInstance;

/// Lifecycle of an instance within one run; also the persisted record status.
///
/// Transitions only move forward: `pending -> ready -> running ->
/// {succeeded | failed}`, with `failed -> ready` while retry budget remains.
/// `pending` may also resolve directly to `skipped` (up to date) or
/// `blocked` (an ancestor failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Blocked,
}

impl InstanceStatus {
    pub fn can_transition(self, to: InstanceStatus) -> bool {
        use InstanceStatus::*;
        matches!(
            (self, to),
            (Pending, Ready)
                | (Pending, Skipped)
                | (Pending, Blocked)
                | (Ready, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Failed, Ready)
        )
    }

    /// Satisfies dependents.
    pub fn is_satisfied(self) -> bool {
        matches!(self, InstanceStatus::Succeeded | InstanceStatus::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Ready => "ready",
            InstanceStatus::Running => "running",
            InstanceStatus::Succeeded => "succeeded",
            InstanceStatus::Failed => "failed",
            InstanceStatus::Skipped => "skipped",
            InstanceStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduler-side bookkeeping for one instance slot.
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    pub status: InstanceStatus,
    /// Dispatches so far in this run.
    pub attempts: u32,
    /// `retries + 1`.
    pub max_attempts: u32,
    pub needs_run: bool,
}

/// How a dispatched job ended, as far as the scheduler cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Succeeded,
    /// `retryable` is false for failures a retry cannot fix (cancellation,
    /// unresolved parameters).
    Failed { retryable: bool },
}

/// Description of an instance the scheduler wants the executor to run now.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub slot: usize,
    pub instance: Arc<TaskInstance>,
    /// 1-based attempt number within this run.
    pub attempt: u32,
}

impl ScheduledJob {
    pub fn task_id(&self) -> &str {
        self.instance.task_id()
    }
}

#[cfg(test)]
mod tests {
    use super::InstanceStatus::*;

    #[test]
    fn only_forward_transitions_are_allowed() {
        assert!(Pending.can_transition(Ready));
        assert!(Running.can_transition(Failed));
        assert!(Failed.can_transition(Ready));
        assert!(!Succeeded.can_transition(Running));
        assert!(!Running.can_transition(Pending));
        assert!(!Skipped.can_transition(Ready));
        assert!(!Blocked.can_transition(Ready));
    }
}
