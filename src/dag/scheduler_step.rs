// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

/// Structured result of a single scheduler "step".
///
/// Useful for tests that want to manually step the DAG and make assertions
/// about what changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStep {
    /// Slots that entered the ready set in this step.
    pub newly_ready: Vec<usize>,
    /// Slots resolved as skipped (only on start).
    pub newly_skipped: Vec<usize>,
    /// Slot that failed for good in this step.
    pub newly_failed: Vec<usize>,
    /// Descendants of a failed slot that will never run.
    pub newly_blocked: Vec<usize>,
    /// Slot re-queued for another attempt.
    pub retried: Option<usize>,
    /// Whether nothing is ready or running anymore.
    pub run_just_finished: bool,
}
