// src/dag/scheduler.rs

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dag::graph::InstanceGraph;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::{ReadOnlyStateManager, StateManager};
use crate::dag::task_info::{Completion, InstanceInfo, InstanceStatus, ScheduledJob};

/// Scheduler holds the immutable instance graph plus mutable per-run state.
///
/// It is responsible for:
/// - resolving up-to-date instances as skipped
/// - keeping the ready set ordered by the canonical tie-break
/// - dispatching up to the concurrency limit
/// - retrying failed instances while budget remains
/// - blocking descendants of instances that failed for good
///
/// It never performs IO; the engine feeds it completions.
#[derive(Debug)]
pub struct Scheduler {
    graph: Arc<InstanceGraph>,
    infos: Vec<InstanceInfo>,
    ready: BTreeSet<(usize, usize)>,
    running: BTreeSet<usize>,
    concurrency: usize,
    halted: bool,
}

impl Scheduler {
    /// `needs_run[slot]` comes from the staleness analysis.
    pub fn new(graph: Arc<InstanceGraph>, needs_run: &[bool], concurrency: usize) -> Self {
        let infos = (0..graph.len())
            .map(|slot| InstanceInfo {
                status: InstanceStatus::Pending,
                attempts: 0,
                max_attempts: graph.instance(slot).task.retries.saturating_add(1),
                needs_run: needs_run.get(slot).copied().unwrap_or(true),
            })
            .collect();

        Self {
            graph,
            infos,
            ready: BTreeSet::new(),
            running: BTreeSet::new(),
            concurrency: concurrency.max(1),
            halted: false,
        }
    }

    pub fn graph(&self) -> &Arc<InstanceGraph> {
        &self.graph
    }

    /// Skip up-to-date instances and seed the ready set.
    pub fn start(&mut self) -> SchedulerStep {
        let order: Vec<usize> = self.graph.canonical_order().to_vec();
        let mut manager = StateManager::new(&self.graph, &mut self.infos, &mut self.ready);
        let newly_skipped = manager.mark_up_to_date_skipped();
        let newly_ready = manager.promote_ready(order);

        info!(
            instances = self.graph.len(),
            skipped = newly_skipped.len(),
            ready = newly_ready.len(),
            "scheduler started"
        );

        SchedulerStep {
            newly_ready,
            newly_skipped,
            run_just_finished: self.is_finished(),
            ..SchedulerStep::default()
        }
    }

    /// Take ready instances, in canonical order, up to the free concurrency.
    pub fn dispatch(&mut self) -> Vec<ScheduledJob> {
        let mut jobs = Vec::new();
        if self.halted {
            return jobs;
        }

        while self.running.len() < self.concurrency {
            let Some((_, slot)) = self.ready.pop_first() else {
                break;
            };
            let mut manager = StateManager::new(&self.graph, &mut self.infos, &mut self.ready);
            if !manager.transition(slot, InstanceStatus::Running) {
                continue;
            }
            let info = &mut self.infos[slot];
            info.attempts += 1;
            self.running.insert(slot);

            let instance = Arc::clone(self.graph.instance(slot));
            debug!(
                task = %instance.task_id(),
                instance = %instance.label(),
                attempt = info.attempts,
                "dispatching"
            );
            jobs.push(ScheduledJob {
                slot,
                instance,
                attempt: info.attempts,
            });
        }
        jobs
    }

    /// Record the end of a dispatched job.
    pub fn handle_completion(&mut self, slot: usize, completion: Completion) -> SchedulerStep {
        if slot >= self.infos.len() || !self.running.remove(&slot) {
            warn!(slot, "completion for an instance that is not running; ignoring");
            return SchedulerStep::default();
        }

        let mut step = SchedulerStep::default();
        let label = self.graph.instance(slot).label();

        match completion {
            Completion::Succeeded => {
                let successors: Vec<usize> = self
                    .graph
                    .successors(slot)
                    .into_iter()
                    .map(|(s, _)| s)
                    .collect();
                let mut manager = StateManager::new(&self.graph, &mut self.infos, &mut self.ready);
                manager.transition(slot, InstanceStatus::Succeeded);
                debug!(instance = %label, "instance succeeded");
                step.newly_ready = manager.promote_ready(successors);
            }
            Completion::Failed { retryable } => {
                let info = &self.infos[slot];
                let can_retry =
                    retryable && !self.halted && info.attempts < info.max_attempts;
                let (attempts, max_attempts) = (info.attempts, info.max_attempts);

                let mut manager = StateManager::new(&self.graph, &mut self.infos, &mut self.ready);
                manager.transition(slot, InstanceStatus::Failed);

                if can_retry {
                    manager.transition(slot, InstanceStatus::Ready);
                    info!(
                        instance = %label,
                        attempt = attempts,
                        max_attempts,
                        "instance failed; retrying"
                    );
                    step.retried = Some(slot);
                } else {
                    warn!(instance = %label, attempts, "instance failed; blocking descendants");
                    step.newly_failed.push(slot);
                    step.newly_blocked = manager.block_descendants(slot);
                }
            }
        }

        step.run_just_finished = self.is_finished();
        step
    }

    /// Stop dispatching. Running jobs still report their completion.
    pub fn halt(&mut self) {
        if !self.halted {
            info!(
                running = self.running.len(),
                ready = self.ready.len(),
                "scheduler halted; no further dispatch"
            );
        }
        self.halted = true;
    }

    /// Nothing running and nothing left to dispatch.
    pub fn is_finished(&self) -> bool {
        self.running.is_empty() && (self.halted || self.ready.is_empty())
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn status_of(&self, slot: usize) -> Option<InstanceStatus> {
        self.infos.get(slot).map(|i| i.status)
    }

    pub fn attempts_of(&self, slot: usize) -> u32 {
        self.infos.get(slot).map(|i| i.attempts).unwrap_or(0)
    }

    pub fn count(&self, status: InstanceStatus) -> usize {
        ReadOnlyStateManager::new(&self.graph, &self.infos).count(status)
    }

    /// Statuses by slot.
    pub fn statuses(&self) -> Vec<InstanceStatus> {
        self.infos.iter().map(|i| i.status).collect()
    }
}
