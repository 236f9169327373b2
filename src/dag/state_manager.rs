// src/dag/state_manager.rs

//! Per-run state management for instances in the scheduler.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::dag::graph::InstanceGraph;
use crate::dag::task_info::{InstanceInfo, InstanceStatus};

/// Manages state transitions and the ready set.
pub struct StateManager<'a> {
    graph: &'a InstanceGraph,
    infos: &'a mut [InstanceInfo],
    /// Ordered by (canonical rank, slot).
    ready: &'a mut BTreeSet<(usize, usize)>,
}

impl<'a> StateManager<'a> {
    pub fn new(
        graph: &'a InstanceGraph,
        infos: &'a mut [InstanceInfo],
        ready: &'a mut BTreeSet<(usize, usize)>,
    ) -> Self {
        Self {
            graph,
            infos,
            ready,
        }
    }

    /// Apply a transition if it is legal. Illegal transitions are logged and
    /// ignored.
    pub fn transition(&mut self, slot: usize, to: InstanceStatus) -> bool {
        let from = self.infos[slot].status;
        if !from.can_transition(to) {
            warn!(
                instance = %self.graph.instance(slot).label(),
                %from,
                %to,
                "ignoring illegal status transition"
            );
            return false;
        }
        self.infos[slot].status = to;
        if to == InstanceStatus::Ready {
            self.ready.insert((self.graph.rank(slot), slot));
        }
        true
    }

    /// Resolve every instance that does not need to run as `skipped`.
    pub fn mark_up_to_date_skipped(&mut self) -> Vec<usize> {
        let mut skipped = Vec::new();
        for &slot in self.graph.canonical_order() {
            if !self.infos[slot].needs_run && self.transition(slot, InstanceStatus::Skipped) {
                debug!(
                    task = %self.graph.instance(slot).task_id(),
                    instance = %self.graph.instance(slot).label(),
                    "up to date; skipped"
                );
                skipped.push(slot);
            }
        }
        skipped
    }

    /// Move every pending candidate whose predecessors are all satisfied into
    /// the ready set.
    pub fn promote_ready<I>(&mut self, candidates: I) -> Vec<usize>
    where
        I: IntoIterator<Item = usize>,
    {
        let mut newly_ready = Vec::new();
        for slot in candidates {
            if self.infos[slot].status != InstanceStatus::Pending {
                continue;
            }
            let satisfied = ReadOnlyStateManager::new(self.graph, self.infos).deps_satisfied(slot);
            if satisfied && self.transition(slot, InstanceStatus::Ready) {
                newly_ready.push(slot);
            }
        }
        newly_ready
    }

    /// Mark pending descendants of a failed instance as `blocked`, following
    /// both edge kinds. Returns the newly blocked slots.
    pub fn block_descendants(&mut self, failed: usize) -> Vec<usize> {
        let mut stack: Vec<usize> = self
            .graph
            .successors(failed)
            .into_iter()
            .map(|(s, _)| s)
            .collect();
        let mut blocked = Vec::new();

        while let Some(slot) = stack.pop() {
            if self.infos[slot].status != InstanceStatus::Pending {
                continue;
            }
            if self.transition(slot, InstanceStatus::Blocked) {
                debug!(
                    instance = %self.graph.instance(slot).label(),
                    upstream = %self.graph.instance(failed).label(),
                    "blocked by upstream failure"
                );
                blocked.push(slot);
                stack.extend(self.graph.successors(slot).into_iter().map(|(s, _)| s));
            }
        }

        blocked.sort_by_key(|&s| self.graph.rank(s));
        blocked
    }
}

/// A read-only view for checking dependency satisfaction.
pub struct ReadOnlyStateManager<'a> {
    graph: &'a InstanceGraph,
    infos: &'a [InstanceInfo],
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(graph: &'a InstanceGraph, infos: &'a [InstanceInfo]) -> Self {
        Self { graph, infos }
    }

    /// Every predecessor, data or ordering-only, is succeeded or skipped.
    pub fn deps_satisfied(&self, slot: usize) -> bool {
        self.graph
            .predecessors(slot)
            .iter()
            .all(|(pred, _)| self.infos[*pred].status.is_satisfied())
    }

    pub fn count(&self, status: InstanceStatus) -> usize {
        self.infos.iter().filter(|i| i.status == status).count()
    }
}
