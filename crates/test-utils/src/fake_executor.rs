use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::mpsc;

use pipedag::dag::ScheduledJob;
use pipedag::engine::{JobOutcome, RuntimeEvent};
use pipedag::errors::Result;
use pipedag::exec::ExecutorBackend;
use pipedag::fs::mock::MockFileSystem;
use pipedag::state::FailureReason;

/// A fake executor that:
/// - records the label of every job it was handed
/// - "produces" each job's concrete outputs in a `MockFileSystem`
/// - reports `JobFinished` right away, unless the job is held
///
/// Jobs of `failing` tasks (or labels) report a non-zero exit instead and
/// write nothing. Jobs of `holding` tasks stay running until `cancel_all`,
/// which reports them as cancelled. With `halt_after(n)`, a shutdown is
/// requested once `n` jobs have been handed over.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    fs: MockFileSystem,
    root: PathBuf,
    executed: Arc<Mutex<Vec<String>>>,
    failing: HashSet<String>,
    holding: HashSet<String>,
    products: HashMap<String, Vec<String>>,
    held: Vec<usize>,
    halt_after: Option<usize>,
    dispatched: usize,
}

impl FakeExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, fs: MockFileSystem) -> Self {
        Self {
            runtime_tx,
            fs,
            root: PathBuf::from("."),
            executed: Arc::new(Mutex::new(Vec::new())),
            failing: HashSet::new(),
            holding: HashSet::new(),
            products: HashMap::new(),
            held: Vec::new(),
            halt_after: None,
            dispatched: 0,
        }
    }

    /// Fail every job whose task id or label is `key`.
    pub fn failing(mut self, key: &str) -> Self {
        self.failing.insert(key.to_string());
        self
    }

    /// Keep jobs of this task running until cancelled.
    pub fn holding(mut self, task: &str) -> Self {
        self.holding.insert(task.to_string());
        self
    }

    /// Files a task writes besides its concrete outputs (glob outputs).
    pub fn with_products(mut self, task: &str, paths: &[&str]) -> Self {
        self.products
            .insert(task.to_string(), paths.iter().map(|p| p.to_string()).collect());
        self
    }

    pub fn halt_after(mut self, n: usize) -> Self {
        self.halt_after = Some(n);
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    fn outcome_for(&self, job: &ScheduledJob) -> JobOutcome {
        let started = Utc::now();
        let inst = &job.instance;
        if self.failing.contains(inst.task_id()) || self.failing.contains(&inst.label()) {
            let mut outcome = JobOutcome::failed(started, FailureReason::NonZeroExit);
            outcome.exit_code = Some(1);
            outcome.output_tail = vec![format!("{} failed", inst.label())];
            return outcome;
        }

        let globbed: Vec<&String> = inst.glob_outputs.iter().flat_map(|g| g.matches.iter()).collect();
        for output in inst.outputs.iter().filter(|o| !globbed.contains(o)) {
            self.fs.add_file(self.root.join(output), inst.label());
        }
        if let Some(extra) = self.products.get(inst.task_id()) {
            for path in extra {
                self.fs.add_file(self.root.join(path), inst.label());
            }
        }
        JobOutcome::succeeded(started)
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for job in jobs {
                self.executed.lock().unwrap().push(job.instance.label());
                self.dispatched += 1;

                if self.holding.contains(job.task_id()) {
                    self.held.push(job.slot);
                } else {
                    let outcome = self.outcome_for(&job);
                    self.runtime_tx
                        .send(RuntimeEvent::JobFinished {
                            slot: job.slot,
                            outcome,
                        })
                        .await
                        .map_err(anyhow::Error::from)?;
                }

                if self.halt_after == Some(self.dispatched) {
                    self.runtime_tx
                        .send(RuntimeEvent::ShutdownRequested)
                        .await
                        .map_err(anyhow::Error::from)?;
                }
            }
            Ok(())
        })
    }

    fn cancel_all(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for slot in std::mem::take(&mut self.held) {
                self.runtime_tx
                    .send(RuntimeEvent::JobFinished {
                        slot,
                        outcome: JobOutcome::failed(Utc::now(), FailureReason::Cancelled),
                    })
                    .await
                    .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }
}
