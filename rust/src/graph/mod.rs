//! Per-run task dependency graph.
//!
//! Nodes live in a single vector indexed by [`NodeId`]; edges are stored as
//! index lists in both directions. A graph is built fresh for every run and
//! owned by exactly one orchestration context.

mod analysis;
mod builder;
mod cycles;
mod topo;

use chrono::{DateTime, Utc};

use crate::interner::{NodeId, TaskIdInterner};
use crate::models::{ResourceRequirement, TaskConstraint, TaskRecord, TaskStatus};

pub use analysis::analyze_dependencies;
pub use builder::{build_graph, GraphBuild, GraphError};
pub use cycles::{detect_cycles, mark_cycles, CycleError};
pub use topo::topological_order;

/// One task inside the graph.
#[derive(Clone, Debug)]
pub struct TaskNode {
    pub id: NodeId,
    pub task: TaskRecord,
    /// Parents, in first-seen order, without duplicates.
    pub dependencies: Vec<NodeId>,
    /// Children, in first-seen order, without duplicates.
    pub dependents: Vec<NodeId>,
    pub estimated_start: DateTime<Utc>,
    pub estimated_end: DateTime<Utc>,
    /// Total float in hours, never negative.
    pub slack_hours: f64,
    /// True iff the node is classified and `slack_hours == 0`.
    pub critical_path: bool,
    /// Member of a reported cycle; excluded from critical-path classification.
    pub in_cycle: bool,
    pub resource_requirements: Vec<ResourceRequirement>,
    pub constraints: Vec<TaskConstraint>,
}

impl TaskNode {
    pub fn task_id(&self) -> &str {
        &self.task.id
    }

    pub fn duration_hours(&self) -> f64 {
        self.task.duration_hours.max(0.0)
    }

    pub fn status(&self) -> TaskStatus {
        self.task.status
    }

    /// Primary resource the task asks for, if any.
    pub fn primary_resource(&self) -> Option<&str> {
        self.resource_requirements
            .first()
            .map(|r| r.resource_id.as_str())
    }
}

/// Arena of task nodes plus the id index.
#[derive(Clone, Debug)]
pub struct TaskGraph {
    index: TaskIdInterner,
    nodes: Vec<TaskNode>,
    anchor: DateTime<Utc>,
}

impl TaskGraph {
    pub(crate) fn from_parts(
        index: TaskIdInterner,
        nodes: Vec<TaskNode>,
        anchor: DateTime<Utc>,
    ) -> Self {
        Self {
            index,
            nodes,
            anchor,
        }
    }

    /// Run anchor: offset 0 of every time computation.
    pub fn anchor(&self) -> DateTime<Utc> {
        self.anchor
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn id_of(&self, task_id: &str) -> Option<NodeId> {
        self.index.get(task_id)
    }

    pub fn node(&self, id: NodeId) -> &TaskNode {
        &self.nodes[id as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut TaskNode {
        &mut self.nodes[id as usize]
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskNode> {
        self.id_of(task_id).map(|id| self.node(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.iter()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut TaskNode> {
        self.nodes.iter_mut()
    }

    pub fn task_id(&self, id: NodeId) -> &str {
        self.index.resolve(id).unwrap_or_default()
    }

    /// Edges between two cycle members are ignored by ordering and timing.
    #[inline]
    pub fn edge_active(&self, parent: NodeId, child: NodeId) -> bool {
        !(self.nodes[parent as usize].in_cycle && self.nodes[child as usize].in_cycle)
    }

    /// Active dependencies of `id`.
    pub fn active_dependencies(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id as usize]
            .dependencies
            .iter()
            .copied()
            .filter(move |&p| self.edge_active(p, id))
    }

    /// Active dependents of `id`.
    pub fn active_dependents(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id as usize]
            .dependents
            .iter()
            .copied()
            .filter(move |&c| self.edge_active(id, c))
    }

    /// Convert an hour offset from the anchor into a timestamp.
    pub fn at_offset(&self, hours: f64) -> DateTime<Utc> {
        hours_after(self.anchor, hours)
    }

    /// Hours between the anchor and `at` (negative if `at` is earlier).
    pub fn offset_of(&self, at: DateTime<Utc>) -> f64 {
        hours_between(self.anchor, at)
    }
}

pub(crate) fn hours_after(anchor: DateTime<Utc>, hours: f64) -> DateTime<Utc> {
    anchor + chrono::Duration::milliseconds((hours * 3_600_000.0).round() as i64)
}

pub(crate) fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}
