// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending `ScheduledJob`s to the executor
//! - writing records to the state store
//!
//! The core is unit tested without any Tokio, channels, filesystem, or
//! processes.

use std::collections::HashMap;

use crate::dag::{InstanceStatus, Scheduler};
use crate::engine::event_handlers::{
    CoreStep, handle_job_finished, handle_shutdown, handle_start,
};
use crate::engine::{JobOutcome, RuntimeEvent};

/// Pure core runtime state.
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    /// Latest outcome per slot.
    outcomes: HashMap<usize, JobOutcome>,
    cancelled: bool,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            outcomes: HashMap::new(),
            cancelled: false,
        }
    }

    /// Commands for the very start of a run.
    pub fn start(&mut self) -> CoreStep {
        handle_start(&mut self.scheduler)
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::JobFinished { slot, outcome } => {
                handle_job_finished(&mut self.scheduler, &mut self.outcomes, slot, outcome)
            }
            RuntimeEvent::ShutdownRequested => {
                handle_shutdown(&mut self.scheduler, &mut self.cancelled)
            }
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn outcome_of(&self, slot: usize) -> Option<&JobOutcome> {
        self.outcomes.get(&slot)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    /// Whether any instance failed or was blocked.
    pub fn has_failures(&self) -> bool {
        self.scheduler.count(InstanceStatus::Failed) > 0
            || self.scheduler.count(InstanceStatus::Blocked) > 0
    }

    /// Whether any job was dispatched at all.
    pub fn ran_anything(&self) -> bool {
        !self.outcomes.is_empty()
    }
}
