// src/dag/graph.rs

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use tracing::debug;

use crate::dag::instance::TaskInstance;
use crate::errors::{PipedagError, Result};

/// Why one instance has to wait for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// The consumer reads a file the producer writes.
    Data,
    /// Declared with `after`; affects dispatch order, never staleness.
    Order,
}

/// Instance-level DAG.
///
/// Node `i` is instance slot `i`. Construction rejects duplicate producers
/// and cycles, then fixes a canonical topological order (declaration order,
/// then lexical path) used as the tie-break among ready instances.
#[derive(Debug)]
pub struct InstanceGraph {
    instances: Vec<Arc<TaskInstance>>,
    graph: DiGraph<usize, EdgeKind>,
    producers: HashMap<String, usize>,
    order: Vec<usize>,
    rank: Vec<usize>,
}

impl InstanceGraph {
    pub fn build(instances: Vec<TaskInstance>) -> Result<Self> {
        Self::from_shared(instances.into_iter().map(Arc::new).collect())
    }

    fn from_shared(instances: Vec<Arc<TaskInstance>>) -> Result<Self> {
        let mut graph: DiGraph<usize, EdgeKind> = DiGraph::with_capacity(instances.len(), 0);
        for slot in 0..instances.len() {
            graph.add_node(slot);
        }

        // Producer map: every concrete output has exactly one producer.
        let mut producers: HashMap<String, usize> = HashMap::new();
        for (slot, inst) in instances.iter().enumerate() {
            for output in inst.outputs.iter() {
                if let Some(&first) = producers.get(output) {
                    if first != slot {
                        return Err(PipedagError::DuplicateProducer {
                            path: output.clone(),
                            first: instances[first].label(),
                            second: inst.label(),
                        });
                    }
                }
                producers.insert(output.clone(), slot);
            }
        }

        // Data edges: producer -> consumer.
        for (slot, inst) in instances.iter().enumerate() {
            for input in inst.inputs.iter() {
                if let Some(&producer) = producers.get(input) {
                    if producer != slot
                        && graph
                            .find_edge(NodeIndex::new(producer), NodeIndex::new(slot))
                            .is_none()
                    {
                        graph.add_edge(NodeIndex::new(producer), NodeIndex::new(slot), EdgeKind::Data);
                    }
                }
            }
        }

        // Ordering-only edges from every instance of each `after` task.
        let mut by_task: HashMap<&str, Vec<usize>> = HashMap::new();
        for (slot, inst) in instances.iter().enumerate() {
            by_task.entry(inst.task_id()).or_default().push(slot);
        }
        for (slot, inst) in instances.iter().enumerate() {
            for pred_task in inst.task.after.iter() {
                for &pred in by_task.get(pred_task.as_str()).into_iter().flatten() {
                    let (a, b) = (NodeIndex::new(pred), NodeIndex::new(slot));
                    if pred != slot && graph.find_edge(a, b).is_none() {
                        graph.add_edge(a, b, EdgeKind::Order);
                    }
                }
            }
        }

        if let Some(cycle) = find_cycle(&graph, &instances) {
            return Err(PipedagError::DagCycle(cycle));
        }

        let order = canonical_order(&graph, &instances);
        let mut rank = vec![0; instances.len()];
        for (pos, &slot) in order.iter().enumerate() {
            rank[slot] = pos;
        }

        debug!(
            instances = instances.len(),
            edges = graph.edge_count(),
            "instance graph built"
        );

        Ok(Self {
            instances,
            graph,
            producers,
            order,
            rank,
        })
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instance(&self, slot: usize) -> &Arc<TaskInstance> {
        &self.instances[slot]
    }

    pub fn instances(&self) -> &[Arc<TaskInstance>] {
        &self.instances
    }

    /// Slots in canonical topological order.
    pub fn canonical_order(&self) -> &[usize] {
        &self.order
    }

    /// Position of `slot` in the canonical order.
    pub fn rank(&self, slot: usize) -> usize {
        self.rank[slot]
    }

    pub fn producer_of(&self, path: &str) -> Option<usize> {
        self.producers.get(path).copied()
    }

    /// Direct predecessors with the kind of edge that links them.
    pub fn predecessors(&self, slot: usize) -> Vec<(usize, EdgeKind)> {
        self.neighbors(slot, Direction::Incoming)
    }

    /// Direct successors with the kind of edge that links them.
    pub fn successors(&self, slot: usize) -> Vec<(usize, EdgeKind)> {
        self.neighbors(slot, Direction::Outgoing)
    }

    fn neighbors(&self, slot: usize, dir: Direction) -> Vec<(usize, EdgeKind)> {
        let mut out: Vec<(usize, EdgeKind)> = self
            .graph
            .edges_directed(NodeIndex::new(slot), dir)
            .map(|e| {
                let other = match dir {
                    Direction::Incoming => e.source(),
                    Direction::Outgoing => e.target(),
                };
                (other.index(), *e.weight())
            })
            .collect();
        out.sort_by_key(|(s, _)| *s);
        out
    }

    /// `targets` plus everything they transitively depend on (both edge kinds).
    pub fn ancestors_of(&self, targets: &[usize]) -> BTreeSet<usize> {
        let mut seen: BTreeSet<usize> = BTreeSet::new();
        let mut stack: Vec<usize> = targets.to_vec();
        while let Some(slot) = stack.pop() {
            if !seen.insert(slot) {
                continue;
            }
            stack.extend(self.predecessors(slot).into_iter().map(|(p, _)| p));
        }
        seen
    }

    /// Rebuild the graph over a subset of instances.
    pub fn restrict_to(&self, keep: &BTreeSet<usize>) -> Result<Self> {
        let kept = keep
            .iter()
            .filter(|&&s| s < self.instances.len())
            .map(|&s| Arc::clone(&self.instances[s]))
            .collect();
        Self::from_shared(kept)
    }
}

/// Recursion-stack coloring DFS. Returns the instance labels along the first
/// cycle found, closed with its starting label.
fn find_cycle(graph: &DiGraph<usize, EdgeKind>, instances: &[Arc<TaskInstance>]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let n = graph.node_count();
    let mut color = vec![Color::White; n];

    for root in 0..n {
        if color[root] != Color::White {
            continue;
        }

        // Explicit stack of (node, sorted successors, next successor index).
        let mut path: Vec<usize> = Vec::new();
        let mut stack: Vec<(usize, Vec<usize>, usize)> = Vec::new();
        color[root] = Color::Gray;
        path.push(root);
        stack.push((root, sorted_successors(graph, root), 0));

        while let Some((node, succs, next)) = stack.last_mut() {
            if *next < succs.len() {
                let succ = succs[*next];
                *next += 1;
                match color[succ] {
                    Color::White => {
                        color[succ] = Color::Gray;
                        path.push(succ);
                        let s = sorted_successors(graph, succ);
                        stack.push((succ, s, 0));
                    }
                    Color::Gray => {
                        let start = path.iter().position(|&p| p == succ).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|&s| instances[s].label()).collect();
                        cycle.push(instances[succ].label());
                        return Some(cycle);
                    }
                    Color::Black => {}
                }
            } else {
                color[*node] = Color::Black;
                path.pop();
                stack.pop();
            }
        }
    }

    None
}

fn sorted_successors(graph: &DiGraph<usize, EdgeKind>, node: usize) -> Vec<usize> {
    let mut succs: Vec<usize> = graph
        .neighbors_directed(NodeIndex::new(node), Direction::Outgoing)
        .map(|n| n.index())
        .collect();
    succs.sort_unstable();
    succs.dedup();
    succs
}

/// Kahn's algorithm with a min-heap on (declaration order, first path, slot).
fn canonical_order(graph: &DiGraph<usize, EdgeKind>, instances: &[Arc<TaskInstance>]) -> Vec<usize> {
    let n = graph.node_count();
    let mut indegree: Vec<usize> = (0..n)
        .map(|i| {
            graph
                .neighbors_directed(NodeIndex::new(i), Direction::Incoming)
                .count()
        })
        .collect();

    let key = |slot: usize| Reverse((instances[slot].order(), instances[slot].sort_key().to_string(), slot));

    let mut heap = BinaryHeap::new();
    for slot in 0..n {
        if indegree[slot] == 0 {
            heap.push(key(slot));
        }
    }

    let mut order = Vec::with_capacity(n);
    while let Some(Reverse((_, _, slot))) = heap.pop() {
        order.push(slot);
        for succ in graph.neighbors_directed(NodeIndex::new(slot), Direction::Outgoing) {
            let s = succ.index();
            indegree[s] -= 1;
            if indegree[s] == 0 {
                heap.push(key(s));
            }
        }
    }
    order
}
