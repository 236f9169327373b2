// src/exec/executor_loop.rs

//! Main executor loop that manages running job processes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::dag::ScheduledJob;
use crate::engine::RuntimeEvent;
use crate::exec::task_runner::{JobContext, run_job};

/// Requests from the runtime to the executor loop.
#[derive(Debug)]
pub enum ExecutorMessage {
    Run(ScheduledJob),
    /// Kill every running job. Each still reports a cancelled completion.
    CancelAll,
}

/// Internal handle for a currently-running job.
///
/// - `cancel` asks the job to kill its process tree.
/// - `handle` is the Tokio task that is actually running the command.
struct ActiveJob {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// The returned sender is what `RealExecutorBackend` forwards to. Each job
/// runs in its own Tokio task; the scheduler already bounds how many are
/// dispatched at once.
pub fn spawn_executor(
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    ctx: Arc<JobContext>,
) -> mpsc::Sender<ExecutorMessage> {
    let (tx, mut rx) = mpsc::channel::<ExecutorMessage>(64);

    tokio::spawn(async move {
        info!("executor loop started");

        // Keyed by instance slot.
        let mut active: HashMap<usize, ActiveJob> = HashMap::new();

        while let Some(msg) = rx.recv().await {
            active.retain(|_, job| !job.handle.is_finished());
            match msg {
                ExecutorMessage::Run(job) => start_job(job, &mut active, &runtime_tx, &ctx),
                ExecutorMessage::CancelAll => cancel_all(&mut active),
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

fn start_job(
    job: ScheduledJob,
    active: &mut HashMap<usize, ActiveJob>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    ctx: &Arc<JobContext>,
) {
    let slot = job.slot;
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let rt_tx = runtime_tx.clone();
    let ctx = Arc::clone(ctx);
    let label = job.instance.label();

    let handle = tokio::spawn(async move {
        run_job(job, ctx, rt_tx, cancel_rx).await;
        debug!(instance = %label, "job runner future finished");
    });

    active.insert(
        slot,
        ActiveJob {
            cancel: Some(cancel_tx),
            handle,
        },
    );
}

fn cancel_all(active: &mut HashMap<usize, ActiveJob>) {
    info!(running = active.len(), "cancelling all running jobs");
    for (slot, job) in active.iter_mut() {
        match job.cancel.take() {
            Some(cancel) => {
                if cancel.send(()).is_err() {
                    debug!(slot, "job already finished while cancelling");
                }
            }
            None => debug!(slot, "job was already cancelled"),
        }
    }
}
