// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{info, warn};

use crate::dag::{Completion, InstanceStatus, ScheduledJob, Scheduler, TaskInstance};
use crate::engine::{JobOutcome, JobStatus};
use crate::state::ExecutionRecord;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these jobs to the executor.
    Dispatch(Vec<ScheduledJob>),
    /// Upsert these records into the state store.
    Persist(Vec<ExecutionRecord>),
    /// Kill every running job; each still reports a (cancelled) completion.
    CancelRunning,
    /// Nothing is running and nothing is left to dispatch.
    RequestExit,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    fn finish(mut commands: Vec<CoreCommand>, scheduler: &Scheduler) -> Self {
        let keep_running = !scheduler.is_finished();
        if !keep_running {
            commands.push(CoreCommand::RequestExit);
        }
        Self {
            commands,
            keep_running,
        }
    }
}

/// Seed the run: skip up-to-date instances, dispatch the first ready ones.
pub fn handle_start(scheduler: &mut Scheduler) -> CoreStep {
    scheduler.start();
    let mut commands = Vec::new();
    dispatch_ready(scheduler, &mut commands);
    CoreStep::finish(commands, scheduler)
}

/// Handle a finished job.
pub fn handle_job_finished(
    scheduler: &mut Scheduler,
    outcomes: &mut HashMap<usize, JobOutcome>,
    slot: usize,
    outcome: JobOutcome,
) -> CoreStep {
    let mut commands = Vec::new();

    let completion = match &outcome.status {
        JobStatus::Succeeded => Completion::Succeeded,
        JobStatus::Failed(reason) => Completion::Failed {
            retryable: reason.is_retryable(),
        },
    };

    let step = scheduler.handle_completion(slot, completion);
    let graph = scheduler.graph().clone();

    if slot < graph.len() {
        let inst = graph.instance(slot);
        let attempts = scheduler.attempts_of(slot);
        let status = if outcome.is_success() {
            InstanceStatus::Succeeded
        } else {
            InstanceStatus::Failed
        };

        match outcome.failure_reason() {
            None => info!(
                task = %inst.task_id(),
                instance = %inst.label(),
                attempts,
                "instance succeeded"
            ),
            Some(reason) => warn!(
                task = %inst.task_id(),
                instance = %inst.label(),
                exit_code = ?outcome.exit_code,
                %reason,
                attempts,
                "instance failed"
            ),
        }

        let mut records = vec![record_for(inst, status, attempts, Some(&outcome))];
        for &blocked in step.newly_blocked.iter() {
            records.push(record_for(
                graph.instance(blocked),
                InstanceStatus::Blocked,
                0,
                None,
            ));
        }
        commands.push(CoreCommand::Persist(records));
        outcomes.insert(slot, outcome);
    }

    dispatch_ready(scheduler, &mut commands);
    CoreStep::finish(commands, scheduler)
}

/// Handle a shutdown request: stop dispatching and cancel running jobs.
pub fn handle_shutdown(scheduler: &mut Scheduler, cancelled: &mut bool) -> CoreStep {
    let mut commands = Vec::new();
    if !*cancelled {
        *cancelled = true;
        warn!(
            running = scheduler.running_count(),
            "shutdown requested; cancelling running jobs"
        );
        scheduler.halt();
        if scheduler.running_count() > 0 {
            commands.push(CoreCommand::CancelRunning);
        }
    }
    CoreStep::finish(commands, scheduler)
}

fn dispatch_ready(scheduler: &mut Scheduler, commands: &mut Vec<CoreCommand>) {
    let jobs = scheduler.dispatch();
    if jobs.is_empty() {
        return;
    }
    let running: Vec<ExecutionRecord> = jobs
        .iter()
        .map(|job| {
            let mut rec = record_for(&job.instance, InstanceStatus::Running, job.attempt, None);
            rec.started_at = Some(Utc::now());
            rec
        })
        .collect();
    commands.push(CoreCommand::Persist(running));
    commands.push(CoreCommand::Dispatch(jobs));
}

/// Build the persisted record for an instance.
pub fn record_for(
    inst: &TaskInstance,
    status: InstanceStatus,
    attempts: u32,
    outcome: Option<&JobOutcome>,
) -> ExecutionRecord {
    let mut rec = ExecutionRecord::new(inst.id.clone(), inst.task_id(), status);
    rec.inputs = inst.inputs.clone();
    rec.outputs = inst.outputs.clone();
    rec.attempts = attempts;
    if let Some(outcome) = outcome {
        rec.started_at = Some(outcome.started_at);
        rec.finished_at = Some(outcome.finished_at);
        rec.exit_code = outcome.exit_code;
        rec.reason = outcome.failure_reason().cloned();
        rec.output_tail = outcome.output_tail.clone();
        rec.input_hash = outcome.input_hash.clone();
    }
    rec
}
