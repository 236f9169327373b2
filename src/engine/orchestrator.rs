// src/engine/orchestrator.rs

//! Multi-pass orchestration.
//!
//! One pass is: scan the project tree, instantiate every task, build the
//! instance graph, analyse staleness, then run the scheduler until nothing is
//! left. Outputs of a pass (for instance the files a split produced) can make
//! new instances appear, so passes repeat until one runs nothing.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::GlobSet;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, warn};

use crate::config::ConfigFile;
use crate::dag::{InstanceGraph, InstanceStatus, Scheduler, instantiate_all};
use crate::engine::core::CoreRuntime;
use crate::engine::runtime::Runtime;
use crate::engine::summary::RunSummary;
use crate::engine::RuntimeEvent;
use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::fs::FileSystem;
use crate::fs::scan::list_files;
use crate::rules::TaskRegistry;
use crate::state::{ExecutionRecord, StalenessAnalyzer, Staleness, StateStore};

/// Per-invocation knobs taken from the CLI.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Restrict to these tasks plus their ancestors; empty means everything.
    pub targets: Vec<String>,
    /// Treat every instance as out of date (first pass only).
    pub force: bool,
    /// Overrides `[config].concurrency`.
    pub concurrency: Option<usize>,
}

/// One line of a plan or status report.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub label: String,
    pub task: String,
    pub instance_id: String,
    pub last_status: Option<InstanceStatus>,
    pub staleness: Staleness,
}

/// What a pass would do, in canonical order.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub entries: Vec<PlanEntry>,
}

impl Plan {
    pub fn to_run(&self) -> usize {
        self.entries.iter().filter(|e| e.staleness.needs_run()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, label: &str) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.label == label)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for e in self.entries.iter() {
            let last = e
                .last_status
                .map(|s| s.as_str())
                .unwrap_or("-");
            match &e.staleness {
                Staleness::UpToDate => {
                    writeln!(f, "skip  {:<40} last={last}", e.label)?;
                }
                Staleness::NeedsRun(reason) => {
                    writeln!(f, "run   {:<40} last={last}  ({reason})", e.label)?;
                }
            }
        }
        writeln!(
            f,
            "{} instance(s), {} to run, {} up to date",
            self.len(),
            self.to_run(),
            self.len() - self.to_run()
        )
    }
}

/// Drives whole invocations against one project root.
pub struct Orchestrator {
    root: PathBuf,
    config: ConfigFile,
    registry: TaskRegistry,
    fs: Arc<dyn FileSystem>,
    store: Box<dyn StateStore>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("root", &self.root)
            .field("tasks", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        root: impl AsRef<Path>,
        config: ConfigFile,
        fs: Arc<dyn FileSystem>,
        store: Box<dyn StateStore>,
    ) -> Result<Self> {
        let registry = TaskRegistry::from_config(&config)?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            config,
            registry,
            fs,
            store,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    /// Scan, instantiate and connect. With `targets`, only those tasks'
    /// instances and everything upstream of them are kept.
    pub fn build_graph(&self, targets: &[String]) -> Result<InstanceGraph> {
        let state_dir = self.config.settings().state_dir.clone();
        let listing = list_files(
            self.fs.as_ref(),
            &self.root,
            std::slice::from_ref(&state_dir),
            &GlobSet::empty(),
        )?;
        debug!(files = listing.len(), "project tree scanned");

        let instances = instantiate_all(&self.registry, &listing, self.config.params())?;
        let graph = InstanceGraph::build(instances)?;
        if targets.is_empty() {
            return Ok(graph);
        }

        let mut wanted: HashSet<&str> = HashSet::new();
        for id in targets {
            wanted.insert(self.registry.resolve(id)?.id.as_str());
        }
        let slots: Vec<usize> = graph
            .instances()
            .iter()
            .enumerate()
            .filter(|(_, inst)| wanted.contains(inst.task_id()))
            .map(|(slot, _)| slot)
            .collect();
        let keep: BTreeSet<usize> = graph.ancestors_of(&slots);
        debug!(targets = ?targets, kept = keep.len(), total = graph.len(), "graph restricted");
        graph.restrict_to(&keep)
    }

    fn load_records(&self) -> Option<HashMap<String, ExecutionRecord>> {
        match self.store.load() {
            Ok(records) => Some(records),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "state unavailable; treating every instance as out of date");
                None
            }
        }
    }

    /// What the next pass would run, without running anything.
    pub fn plan(&self, opts: &RunOptions) -> Result<Plan> {
        let graph = self.build_graph(&opts.targets)?;
        let records = self.load_records();
        let staleness =
            StalenessAnalyzer::new(self.fs.as_ref(), &self.root, records.as_ref(), opts.force)
                .evaluate(&graph);

        let entries = graph
            .canonical_order()
            .iter()
            .map(|&slot| {
                let inst = graph.instance(slot);
                PlanEntry {
                    label: inst.label(),
                    task: inst.task_id().to_string(),
                    instance_id: inst.id.clone(),
                    last_status: records
                        .as_ref()
                        .and_then(|r| r.get(&inst.id))
                        .map(|r| r.status),
                    staleness: staleness[slot].clone(),
                }
            })
            .collect();
        Ok(Plan { entries })
    }

    /// Run passes until one executes nothing, something fails, the run is
    /// cancelled or `max_passes` is reached.
    pub async fn run<E: ExecutorBackend>(
        &mut self,
        opts: &RunOptions,
        event_rx: &mut mpsc::Receiver<RuntimeEvent>,
        executor: &mut E,
    ) -> Result<RunSummary> {
        let settings = self.config.settings().clone();
        let concurrency = opts.concurrency.unwrap_or(settings.concurrency).max(1);

        let mut summary = RunSummary::new();
        let mut executed: HashSet<String> = HashSet::new();
        let mut live_ids: HashSet<String> = HashSet::new();

        for pass in 1..=settings.max_passes {
            if shutdown_pending(event_rx) {
                summary.mark_cancelled();
                break;
            }

            let graph = Arc::new(self.build_graph(&opts.targets)?);
            live_ids.extend(graph.instances().iter().map(|i| i.id.clone()));

            let records = self.load_records();
            let force = opts.force && pass == 1;
            let staleness =
                StalenessAnalyzer::new(self.fs.as_ref(), &self.root, records.as_ref(), force)
                    .evaluate(&graph);
            drop(records);

            let needs_run: Vec<bool> = graph
                .instances()
                .iter()
                .zip(staleness.iter())
                .map(|(inst, s)| s.needs_run() && !executed.contains(&inst.id))
                .collect();

            info!(
                pass,
                instances = graph.len(),
                to_run = needs_run.iter().filter(|n| **n).count(),
                concurrency,
                "starting pass"
            );

            let core = CoreRuntime::new(Scheduler::new(Arc::clone(&graph), &needs_run, concurrency));
            let core = Runtime::new(core, event_rx, executor, self.store.as_mut())
                .run()
                .await?;

            for (slot, inst) in graph.instances().iter().enumerate() {
                if core.outcome_of(slot).is_some() {
                    executed.insert(inst.id.clone());
                }
            }
            summary.absorb(&core);

            if core.is_cancelled() || core.has_failures() || !core.ran_anything() {
                break;
            }
            if pass == settings.max_passes {
                warn!(max_passes = settings.max_passes, "pass limit reached; later outputs not rescanned");
            }
        }

        if summary.is_success() && opts.targets.is_empty() {
            match self.store.prune(&live_ids) {
                Ok(0) => {}
                Ok(n) => info!(pruned = n, "removed records of vanished instances"),
                Err(e) => warn!(error = %format!("{e:#}"), "could not prune state"),
            }
        }

        info!(
            succeeded = summary.succeeded(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            blocked = summary.blocked(),
            not_run = summary.not_run(),
            passes = summary.passes(),
            "run finished"
        );
        Ok(summary)
    }
}

/// Drain events left over from before the pass. Only a shutdown request
/// matters; stray completions cannot belong to a live pass.
fn shutdown_pending(rx: &mut mpsc::Receiver<RuntimeEvent>) -> bool {
    let mut requested = false;
    loop {
        match rx.try_recv() {
            Ok(RuntimeEvent::ShutdownRequested) => requested = true,
            Ok(other) => debug!(event = ?other, "dropping stale runtime event"),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }
    requested
}
