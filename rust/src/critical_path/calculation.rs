//! Critical path calculation using forward and backward passes.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::cancel::CancelCheck;
use crate::graph::TaskGraph;
use crate::interner::NodeId;
use crate::models::TaskStatus;

use super::types::{CriticalPathResult, TaskTiming, SLACK_EPSILON};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CriticalPathError {
    #[error("Critical path calculation cancelled")]
    Cancelled,
}

/// Extra inputs to the forward pass, in hours from the graph anchor.
#[derive(Clone, Debug, Default)]
pub struct TimingInputs {
    /// Earliest allowed start per node (start-after and start-on pins).
    pub start_bounds: FxHashMap<NodeId, f64>,
    /// Work that has not started yet cannot start before this offset.
    pub now_offset: f64,
}

/// Compute earliest/latest times and total float for every node.
///
/// `order` must be a topological order of the graph's active edges. Forward
/// pass: a node without dependencies starts at the run start (or its bound);
/// otherwise at the latest finish of its dependencies. Completed tasks with a
/// recorded completion time use the realised time instead of the estimate.
/// Backward pass: terminal nodes finish at the project horizon, interior
/// nodes at the earliest latest-start of their dependents.
pub fn compute_timings(
    graph: &TaskGraph,
    order: &[NodeId],
    inputs: &TimingInputs,
    cancel: CancelCheck<'_>,
) -> Result<CriticalPathResult, CriticalPathError> {
    let n = graph.len();
    let mut timings: Vec<TaskTiming> = vec![TaskTiming::default(); n];
    let mut total_work = 0.0;
    let mut project_finish: f64 = 0.0;

    for (processed, &id) in order.iter().enumerate() {
        if cancel.should_stop(processed) {
            return Err(CriticalPathError::Cancelled);
        }

        let node = graph.node(id);
        let duration = node.duration_hours();
        total_work += duration;

        let (earliest_start, earliest_finish) = match realised_finish(graph, id) {
            Some(finish) => {
                let start = node
                    .task
                    .actual_start
                    .map(|s| graph.offset_of(s))
                    .unwrap_or(finish - duration);
                (start, finish)
            }
            None => {
                let mut start = graph
                    .active_dependencies(id)
                    .map(|dep| timings[dep as usize].earliest_finish)
                    .fold(0.0, f64::max);
                if let Some(&bound) = inputs.start_bounds.get(&id) {
                    start = start.max(bound);
                }
                if !matches!(node.status(), TaskStatus::InProgress) {
                    start = start.max(inputs.now_offset);
                }
                (start, start + duration)
            }
        };

        project_finish = project_finish.max(earliest_finish);
        let timing = &mut timings[id as usize];
        timing.earliest_start = earliest_start;
        timing.earliest_finish = earliest_finish;
    }

    for (processed, &id) in order.iter().rev().enumerate() {
        if cancel.should_stop(processed) {
            return Err(CriticalPathError::Cancelled);
        }

        let latest_finish = graph
            .active_dependents(id)
            .map(|child| timings[child as usize].latest_start)
            .fold(f64::INFINITY, f64::min);
        let latest_finish = if latest_finish.is_finite() {
            latest_finish
        } else {
            project_finish
        };

        let duration = graph.node(id).duration_hours();
        let timing = &mut timings[id as usize];
        timing.latest_finish = latest_finish;
        timing.latest_start = latest_finish - duration;
        let slack = latest_finish - timing.earliest_finish;
        timing.slack = if slack < SLACK_EPSILON { 0.0 } else { slack };
    }

    let mut critical: Vec<NodeId> = order
        .iter()
        .copied()
        .filter(|&id| !graph.node(id).in_cycle && timings[id as usize].is_critical())
        .collect();
    critical.sort_by(|a, b| {
        timings[*a as usize]
            .earliest_start
            .total_cmp(&timings[*b as usize].earliest_start)
    });

    Ok(CriticalPathResult {
        timings,
        critical,
        project_finish,
        total_work,
    })
}

/// Write timings back onto the graph nodes.
pub fn apply_timings(graph: &mut TaskGraph, result: &CriticalPathResult) {
    let anchor = graph.anchor();
    for node in graph.nodes_mut() {
        let timing = &result.timings[node.id as usize];
        node.estimated_start = crate::graph::hours_after(anchor, timing.earliest_start);
        node.estimated_end = crate::graph::hours_after(anchor, timing.earliest_finish);
        node.slack_hours = timing.slack;
        node.critical_path = !node.in_cycle && timing.is_critical();
    }
}

/// Compute and apply in one step.
pub fn calculate_critical_path(
    graph: &mut TaskGraph,
    order: &[NodeId],
    inputs: &TimingInputs,
    cancel: CancelCheck<'_>,
) -> Result<CriticalPathResult, CriticalPathError> {
    let result = compute_timings(graph, order, inputs, cancel)?;
    apply_timings(graph, &result);
    Ok(result)
}

fn realised_finish(graph: &TaskGraph, id: NodeId) -> Option<f64> {
    let task = &graph.node(id).task;
    if task.status != TaskStatus::Completed {
        return None;
    }
    task.actual_completion.map(|at| graph.offset_of(at))
}
