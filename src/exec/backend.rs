// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender.
//! This makes it easy to swap in a fake executor in tests while keeping the
//! production executor implementation in [`super::executor_loop`].
//!
//! - `RealExecutorBackend` is the implementation used by `pipedag`. It wraps
//!   the `spawn_executor` loop and forwards jobs over an mpsc channel.
//! - Tests can provide their own `ExecutorBackend` that, for example, writes
//!   the outputs into a mock filesystem and directly emits `JobFinished`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::dag::ScheduledJob;
use crate::engine::RuntimeEvent;
use crate::errors::{Error, Result};

use super::executor_loop::{ExecutorMessage, spawn_executor};
use super::task_runner::JobContext;

/// Trait abstracting how scheduled jobs are executed.
///
/// Every job handed to `spawn_ready_jobs` must eventually produce exactly one
/// `RuntimeEvent::JobFinished`, including after `cancel_all`.
pub trait ExecutorBackend: Send {
    /// Dispatch the given jobs for execution.
    fn spawn_ready_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Kill every running job.
    fn cancel_all(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Real executor backend used in production.
pub struct RealExecutorBackend {
    tx: mpsc::Sender<ExecutorMessage>,
}

impl RealExecutorBackend {
    /// Create a new real executor backend, wiring it to the given runtime
    /// event sender.
    ///
    /// This spawns the background executor loop immediately.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, ctx: Arc<JobContext>) -> Self {
        let tx = spawn_executor(runtime_tx, ctx);
        Self { tx }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn spawn_ready_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for job in jobs {
                tx.send(ExecutorMessage::Run(job))
                    .await
                    .map_err(Error::from)?;
            }
            Ok(())
        })
    }

    fn cancel_all(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();
        Box::pin(async move {
            tx.send(ExecutorMessage::CancelAll)
                .await
                .map_err(Error::from)?;
            Ok(())
        })
    }
}
