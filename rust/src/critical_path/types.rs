//! Types for critical path calculation.

use crate::interner::NodeId;

/// Slack below this many hours counts as zero.
pub const SLACK_EPSILON: f64 = 1e-9;

/// Per-node timing from the forward and backward passes, in hours from the
/// run anchor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskTiming {
    /// Earliest possible start time (forward pass).
    pub earliest_start: f64,
    /// Earliest possible finish time (forward pass).
    pub earliest_finish: f64,
    /// Latest allowable start time (backward pass).
    pub latest_start: f64,
    /// Latest allowable finish time (backward pass).
    pub latest_finish: f64,
    /// Total float; clamped to >= 0 and snapped to exactly 0 within epsilon.
    pub slack: f64,
}

impl TaskTiming {
    pub fn is_critical(&self) -> bool {
        self.slack == 0.0
    }
}

/// Result of one critical path computation over a whole graph.
#[derive(Clone, Debug, Default)]
pub struct CriticalPathResult {
    /// Timings indexed by `NodeId`.
    pub timings: Vec<TaskTiming>,
    /// Critical nodes ordered by earliest start.
    pub critical: Vec<NodeId>,
    /// Latest earliest-finish over all nodes (the project horizon).
    pub project_finish: f64,
    /// Sum of all node durations.
    pub total_work: f64,
}

impl CriticalPathResult {
    pub fn timing(&self, id: NodeId) -> &TaskTiming {
        &self.timings[id as usize]
    }
}
