use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a task maps its inputs onto jobs.
///
/// - `Transform`: one job per matching input (1 -> 1).
/// - `Split`: one job over all matching inputs, producing many outputs; outputs
///   may be globs that are only known after the job ran (1 -> many).
/// - `Merge`: one job over all matching inputs, producing one output (many -> 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskShape {
    Transform,
    Split,
    Merge,
}

impl Default for TaskShape {
    fn default() -> Self {
        TaskShape::Transform
    }
}

impl fmt::Display for TaskShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskShape::Transform => write!(f, "transform"),
            TaskShape::Split => write!(f, "split"),
            TaskShape::Merge => write!(f, "merge"),
        }
    }
}

impl FromStr for TaskShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "transform" => Ok(TaskShape::Transform),
            "split" => Ok(TaskShape::Split),
            "merge" => Ok(TaskShape::Merge),
            other => Err(format!(
                "invalid task shape: {other} (expected \"transform\", \"split\" or \"merge\")"
            )),
        }
    }
}

/// Where execution records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateStorageMode {
    /// JSON file under the state directory (`.pipedag/state.json`).
    File,
    /// In memory only (lost on restart, so every fresh process re-runs).
    Memory,
}

impl Default for StateStorageMode {
    fn default() -> Self {
        StateStorageMode::File
    }
}
