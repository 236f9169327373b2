// src/dag/instance.rs

//! Concrete task instances.

use std::fmt;
use std::sync::Arc;

use crate::pattern::Bindings;
use crate::rules::TaskDefinition;

/// Stable fingerprint of an instance: blake3 over the task id and its sorted
/// input paths. Used as the key of persisted execution records.
pub type InstanceId = String;

pub fn instance_fingerprint(task_id: &str, inputs: &[String]) -> InstanceId {
    let mut sorted: Vec<&str> = inputs.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = blake3::Hasher::new();
    hasher.update(task_id.as_bytes());
    for input in sorted {
        hasher.update(b"\0");
        hasher.update(input.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// One job-sized piece of work: a task applied to a concrete input set.
///
/// Rebuilt from the filesystem on every pass; only its execution record is
/// persisted.
#[derive(Clone)]
pub struct TaskInstance {
    pub id: InstanceId,
    pub task: Arc<TaskDefinition>,
    /// Sorted input paths, relative to the project root.
    pub inputs: Vec<String>,
    /// Concrete output paths. For glob outputs these are the files that
    /// currently match.
    pub outputs: Vec<String>,
    /// Rendered glob outputs together with their current matches.
    pub glob_outputs: Vec<GlobOutput>,
    pub bindings: Bindings,
}

/// An output only known by pattern until the job has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobOutput {
    pub pattern: String,
    pub matches: Vec<String>,
}

impl TaskInstance {
    pub fn task_id(&self) -> &str {
        &self.task.id
    }

    /// Declaration index of the owning task.
    pub fn order(&self) -> usize {
        self.task.order
    }

    /// First path used for the lexical tie-break.
    pub fn sort_key(&self) -> &str {
        self.inputs
            .first()
            .or_else(|| self.outputs.first())
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Human readable name: `trim[a.fastq.gz]`, `merge[3 inputs]`, `init`.
    pub fn label(&self) -> String {
        match self.inputs.as_slice() {
            [] => self.task.id.clone(),
            [single] => format!("{}[{}]", self.task.id, single),
            many => format!("{}[{} inputs]", self.task.id, many.len()),
        }
    }
}

impl fmt::Debug for TaskInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskInstance")
            .field("task", &self.task.id)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("glob_outputs", &self.glob_outputs)
            .finish_non_exhaustive()
    }
}
