//! Per-node view of the caller's time constraints.

use crate::config::{SchedulingOptions, TimeConstraintKind};
use crate::graph::TaskGraph;
use crate::interner::NodeId;
use crate::critical_path::TimingInputs;

/// Time constraints resolved to hour offsets for one node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeWindow {
    /// Latest of all start-after bounds.
    pub start_after: Option<f64>,
    /// Fixed start; the last pin wins when several are given.
    pub pin: Option<f64>,
    /// Earliest of the record deadline and finish-before bounds.
    pub deadline: Option<f64>,
    pub no_delay: bool,
}

impl NodeWindow {
    /// Lower bound on the start time, if any.
    pub fn start_bound(&self) -> Option<f64> {
        match (self.start_after, self.pin) {
            (Some(a), Some(p)) => Some(a.max(p)),
            (a, p) => a.or(p),
        }
    }
}

/// Resolve record deadlines and `options.time_constraints` onto the graph.
/// Constraints naming unknown tasks are ignored.
pub fn resolve_windows(graph: &TaskGraph, options: &SchedulingOptions) -> Vec<NodeWindow> {
    let mut windows: Vec<NodeWindow> = graph
        .nodes()
        .map(|node| NodeWindow {
            deadline: node.task.deadline.map(|d| graph.offset_of(d)),
            ..Default::default()
        })
        .collect();

    for constraint in &options.time_constraints {
        let Some(id) = graph.id_of(&constraint.task_id) else {
            tracing::debug!(task_id = %constraint.task_id, "time constraint for unknown task ignored");
            continue;
        };
        let at = graph.offset_of(constraint.at);
        let window = &mut windows[id as usize];
        match constraint.kind {
            TimeConstraintKind::StartAfter => {
                window.start_after = Some(window.start_after.map_or(at, |s| s.max(at)));
            }
            TimeConstraintKind::FinishBefore => {
                window.deadline = Some(window.deadline.map_or(at, |d| d.min(at)));
            }
            TimeConstraintKind::StartOn => window.pin = Some(at),
            TimeConstraintKind::NoDelay => window.no_delay = true,
        }
    }
    windows
}

/// Forward-pass inputs derived from the windows.
pub fn timing_inputs(windows: &[NodeWindow], now_offset: f64) -> TimingInputs {
    let mut inputs = TimingInputs {
        now_offset,
        ..Default::default()
    };
    for (id, window) in windows.iter().enumerate() {
        if let Some(bound) = window.start_bound() {
            inputs.start_bounds.insert(id as NodeId, bound);
        }
    }
    inputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeConstraint;
    use crate::graph::build_graph;
    use crate::models::TaskRecord;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_resolve_windows() {
        let anchor = Utc.with_ymd_and_hms(2025, 2, 3, 9, 0, 0).unwrap();
        let tasks = vec![
            TaskRecord::new("a", 1.0).with_deadline(anchor + Duration::hours(30)),
            TaskRecord::new("b", 1.0),
        ];
        let graph = build_graph(&tasks, &[], anchor).graph;
        let options = SchedulingOptions {
            time_constraints: vec![
                TimeConstraint {
                    task_id: "a".to_string(),
                    kind: TimeConstraintKind::FinishBefore,
                    at: anchor + Duration::hours(20),
                },
                TimeConstraint {
                    task_id: "b".to_string(),
                    kind: TimeConstraintKind::StartAfter,
                    at: anchor + Duration::hours(5),
                },
                TimeConstraint {
                    task_id: "b".to_string(),
                    kind: TimeConstraintKind::StartOn,
                    at: anchor + Duration::hours(8),
                },
                TimeConstraint {
                    task_id: "missing".to_string(),
                    kind: TimeConstraintKind::NoDelay,
                    at: anchor,
                },
            ],
            ..Default::default()
        };
        let windows = resolve_windows(&graph, &options);

        assert_eq!(windows[0].deadline, Some(20.0));
        assert_eq!(windows[1].start_bound(), Some(8.0));
        assert_eq!(windows[1].pin, Some(8.0));

        let inputs = timing_inputs(&windows, 0.0);
        assert_eq!(inputs.start_bounds.len(), 1);
    }
}
