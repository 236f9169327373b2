// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dag::ScheduledJob;
use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::state::{ExecutionRecord, StateStore};

use super::core::CoreRuntime;
use super::{CoreCommand, RuntimeEvent};

/// Drives one scheduling pass in response to `RuntimeEvent`s, delegating
/// execution to an `ExecutorBackend` and persistence to a `StateStore`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// runtime semantics. It blocks only on the completion channel.
pub struct Runtime<'a, E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: &'a mut mpsc::Receiver<RuntimeEvent>,
    executor: &'a mut E,
    store: &'a mut dyn StateStore,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<'a, E: ExecutorBackend> Runtime<'a, E> {
    pub fn new(
        core: CoreRuntime,
        event_rx: &'a mut mpsc::Receiver<RuntimeEvent>,
        executor: &'a mut E,
        store: &'a mut dyn StateStore,
    ) -> Self {
        Self {
            core,
            event_rx,
            executor,
            store,
        }
    }

    /// Main event loop. Returns the core once the pass is over so the caller
    /// can summarise it.
    pub async fn run(mut self) -> Result<CoreRuntime> {
        debug!("runtime pass started");

        let step = self.core.start();
        for command in step.commands {
            self.execute_command(command).await?;
        }
        let mut keep_running = step.keep_running;

        while keep_running {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    warn!("runtime event channel closed; exiting");
                    break;
                }
            };

            debug!(?event, "runtime received event");

            // Feed the event into the pure core and get commands back.
            let step = self.core.step(event);

            for command in step.commands {
                self.execute_command(command).await?;
            }

            keep_running = step.keep_running;
        }

        debug!("runtime pass finished");
        Ok(self.core)
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::Dispatch(jobs) => {
                self.spawn_ready(jobs).await?;
            }
            CoreCommand::Persist(records) => {
                self.persist(&records);
            }
            CoreCommand::CancelRunning => {
                info!("cancelling running jobs");
                self.executor.cancel_all().await?;
            }
            CoreCommand::RequestExit => {
                debug!("core issued RequestExit command");
            }
        }
        Ok(())
    }

    /// State store failures never abort the run; affected instances are
    /// simply re-run next time.
    fn persist(&mut self, records: &[ExecutionRecord]) {
        if let Err(e) = self.store.persist(records) {
            warn!(
                error = %e,
                records = records.len(),
                "failed to persist execution records; continuing"
            );
        }
    }

    async fn spawn_ready(&mut self, jobs: Vec<ScheduledJob>) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }

        let labels: Vec<_> = jobs.iter().map(|j| j.instance.label()).collect();
        debug!(?labels, "spawning ready jobs");

        self.executor.spawn_ready_jobs(jobs).await
    }
}
