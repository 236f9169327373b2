// src/state/record.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::InstanceStatus;

/// Why an execution did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    NonZeroExit,
    Timeout,
    /// A declared output (or output glob) was absent after a zero exit.
    MissingOutput(String),
    Cancelled,
    /// A command placeholder had no binding.
    UnresolvedParameter(String),
    /// The process could not be started, even after transient retries.
    SpawnFailed(String),
    /// Preparing the job (directories, cleanup) failed.
    Setup(String),
}

impl FailureReason {
    /// A second attempt could change the result.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            FailureReason::Cancelled | FailureReason::UnresolvedParameter(_)
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NonZeroExit => write!(f, "non_zero_exit"),
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::MissingOutput(p) => write!(f, "missing_output ({p})"),
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::UnresolvedParameter(n) => write!(f, "unresolved_parameter ({n})"),
            FailureReason::SpawnFailed(m) => write!(f, "spawn_failed ({m})"),
            FailureReason::Setup(m) => write!(f, "setup ({m})"),
        }
    }
}

/// Persisted execution status of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub instance_id: String,
    pub task: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    pub status: InstanceStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub reason: Option<FailureReason>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_tail: Vec<String>,
    /// blake3 over input contents, recorded on success for `use_hash` tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_hash: Option<String>,
}

impl ExecutionRecord {
    pub fn new(instance_id: impl Into<String>, task: impl Into<String>, status: InstanceStatus) -> Self {
        Self {
            instance_id: instance_id.into(),
            task: task.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            status,
            attempts: 0,
            started_at: None,
            finished_at: None,
            exit_code: None,
            reason: None,
            output_tail: Vec::new(),
            input_hash: None,
        }
    }
}
