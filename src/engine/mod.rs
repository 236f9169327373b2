// src/engine/mod.rs

//! Orchestration engine for pipedag.
//!
//! This module ties together:
//! - the instance scheduler
//! - persistence of execution records
//! - the main runtime event loop that reacts to:
//!   - job completion events
//!   - shutdown signals
//! - the multi-pass orchestrator (scan, instantiate, analyse, run, repeat)
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use chrono::{DateTime, Utc};

use crate::state::FailureReason;

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Succeeded,
    Failed(FailureReason),
}

/// Everything the job runner reports back about one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Last lines of combined stdout/stderr.
    pub output_tail: Vec<String>,
    /// Input content hash, for successful `use_hash` jobs.
    pub input_hash: Option<String>,
}

impl JobOutcome {
    pub fn succeeded(started_at: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Succeeded,
            exit_code: Some(0),
            started_at,
            finished_at: Utc::now(),
            output_tail: Vec::new(),
            input_hash: None,
        }
    }

    pub fn failed(started_at: DateTime<Utc>, reason: FailureReason) -> Self {
        Self {
            status: JobStatus::Failed(reason),
            exit_code: None,
            started_at,
            finished_at: Utc::now(),
            output_tail: Vec::new(),
            input_hash: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match &self.status {
            JobStatus::Succeeded => None,
            JobStatus::Failed(r) => Some(r),
        }
    }
}

/// Events flowing into the runtime from executors and signal handlers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A dispatched job ended (including cancelled ones).
    JobFinished { slot: usize, outcome: JobOutcome },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod event_handlers;
pub mod orchestrator;
pub mod runtime;
pub mod summary;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use orchestrator::{Orchestrator, Plan, PlanEntry, RunOptions};
pub use runtime::Runtime;
pub use summary::{FailureDiagnostic, RunSummary};
