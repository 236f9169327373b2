// src/state/staleness.rs

//! Decides, per instance, whether its outputs are up to date.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::SystemTime;

use tracing::{debug, trace};

use crate::dag::{EdgeKind, InstanceGraph, InstanceStatus, TaskInstance};
use crate::fs::FileSystem;
use crate::state::hash::compute_inputs_hash;
use crate::state::record::ExecutionRecord;

/// Why an instance has to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    Forced,
    /// Prior state could not be read.
    StateUnavailable,
    NoPriorRecord,
    /// The last execution did not succeed (failed, blocked or interrupted).
    PriorIncomplete(InstanceStatus),
    MissingOutput(String),
    OutputOlderThanInput { output: String, input: String },
    /// A data predecessor will run, so this instance's inputs will change.
    UpstreamWillRun(String),
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::Forced => write!(f, "forced"),
            StaleReason::StateUnavailable => write!(f, "state unavailable"),
            StaleReason::NoPriorRecord => write!(f, "no prior record"),
            StaleReason::PriorIncomplete(status) => write!(f, "previous run {status}"),
            StaleReason::MissingOutput(p) => write!(f, "missing output {p}"),
            StaleReason::OutputOlderThanInput { output, input } => {
                write!(f, "{output} older than {input}")
            }
            StaleReason::UpstreamWillRun(label) => write!(f, "upstream {label} will run"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    UpToDate,
    NeedsRun(StaleReason),
}

impl Staleness {
    pub fn needs_run(&self) -> bool {
        matches!(self, Staleness::NeedsRun(_))
    }
}

/// Evaluates staleness for a whole graph against the filesystem and the
/// prior execution records.
pub struct StalenessAnalyzer<'a> {
    fs: &'a dyn FileSystem,
    root: &'a Path,
    /// `None` when the state store could not be read.
    records: Option<&'a HashMap<String, ExecutionRecord>>,
    force: bool,
}

impl<'a> StalenessAnalyzer<'a> {
    pub fn new(
        fs: &'a dyn FileSystem,
        root: &'a Path,
        records: Option<&'a HashMap<String, ExecutionRecord>>,
        force: bool,
    ) -> Self {
        Self {
            fs,
            root,
            records,
            force,
        }
    }

    /// Staleness of every slot. Evaluated in canonical order so upstream
    /// decisions are known when a consumer is looked at.
    pub fn evaluate(&self, graph: &InstanceGraph) -> Vec<Staleness> {
        let mut result = vec![Staleness::UpToDate; graph.len()];

        for &slot in graph.canonical_order() {
            let inst = graph.instance(slot);
            let own = self.evaluate_own(inst);
            let staleness = match own {
                Staleness::NeedsRun(_) => own,
                Staleness::UpToDate => graph
                    .predecessors(slot)
                    .into_iter()
                    .find(|(pred, kind)| *kind == EdgeKind::Data && result[*pred].needs_run())
                    .map(|(pred, _)| {
                        Staleness::NeedsRun(StaleReason::UpstreamWillRun(graph.instance(pred).label()))
                    })
                    .unwrap_or(Staleness::UpToDate),
            };
            trace!(instance = %inst.label(), ?staleness, "staleness evaluated");
            result[slot] = staleness;
        }

        let stale = result.iter().filter(|s| s.needs_run()).count();
        debug!(instances = graph.len(), stale, "staleness analysis done");
        result
    }

    /// Staleness from the instance's own record and files only.
    pub fn evaluate_own(&self, inst: &TaskInstance) -> Staleness {
        if self.force {
            return Staleness::NeedsRun(StaleReason::Forced);
        }

        let Some(records) = self.records else {
            return Staleness::NeedsRun(StaleReason::StateUnavailable);
        };
        let Some(record) = records.get(&inst.id) else {
            return Staleness::NeedsRun(StaleReason::NoPriorRecord);
        };
        if record.status != InstanceStatus::Succeeded {
            return Staleness::NeedsRun(StaleReason::PriorIncomplete(record.status));
        }

        for glob in inst.glob_outputs.iter() {
            if glob.matches.is_empty() {
                return Staleness::NeedsRun(StaleReason::MissingOutput(glob.pattern.clone()));
            }
        }

        let mut oldest_output: Option<(SystemTime, &str)> = None;
        for output in inst.outputs.iter() {
            match self.fs.modified(&self.root.join(output)) {
                Ok(t) => {
                    if oldest_output.is_none_or(|(o, _)| t < o) {
                        oldest_output = Some((t, output));
                    }
                }
                Err(_) => return Staleness::NeedsRun(StaleReason::MissingOutput(output.clone())),
            }
        }

        let mut newest_input: Option<(SystemTime, &str)> = None;
        for input in inst.inputs.iter() {
            // Inputs that do not exist yet belong to an upstream that will run.
            if let Ok(t) = self.fs.modified(&self.root.join(input)) {
                if newest_input.is_none_or(|(n, _)| t > n) {
                    newest_input = Some((t, input));
                }
            }
        }

        if let (Some((out_t, output)), Some((in_t, input))) = (oldest_output, newest_input) {
            // Equal timestamps count as up to date.
            if out_t < in_t {
                if inst.task.use_hash && self.hash_unchanged(inst, record) {
                    debug!(instance = %inst.label(), "inputs newer but content unchanged");
                    return Staleness::UpToDate;
                }
                return Staleness::NeedsRun(StaleReason::OutputOlderThanInput {
                    output: output.to_string(),
                    input: input.to_string(),
                });
            }
        }

        Staleness::UpToDate
    }

    fn hash_unchanged(&self, inst: &TaskInstance, record: &ExecutionRecord) -> bool {
        let Some(ref recorded) = record.input_hash else {
            return false;
        };
        match compute_inputs_hash(self.fs, self.root, &inst.inputs) {
            Ok(current) => &current == recorded,
            Err(e) => {
                debug!(instance = %inst.label(), error = %e, "input hash unavailable");
                false
            }
        }
    }
}
