//! Selection order for ready tasks.

use std::cmp::Ordering;

/// Sort key for ready-task selection (lower = picked first).
///
/// Tie-break order: critical tasks first, then higher business priority,
/// then earlier deadline, then (speed mode only) shorter duration, then task
/// id for determinism.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionKey {
    pub not_critical: bool,
    pub neg_priority: i32,
    /// Deadline as hours from the run anchor; `f64::INFINITY` when absent.
    pub deadline: f64,
    /// Duration in hours, or 0 when shorter-first is disabled.
    pub duration: f64,
    pub task_id: String,
}

impl SelectionKey {
    pub fn new(
        task_id: &str,
        critical: bool,
        priority: i32,
        deadline: Option<f64>,
        duration: f64,
        prioritize_speed: bool,
    ) -> Self {
        Self {
            not_critical: !critical,
            neg_priority: -priority,
            deadline: deadline.unwrap_or(f64::INFINITY),
            duration: if prioritize_speed { duration } else { 0.0 },
            task_id: task_id.to_string(),
        }
    }
}

/// Compare f64 values for sorting, treating NaN as equal.
fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

impl Eq for SelectionKey {}

impl Ord for SelectionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.not_critical
            .cmp(&other.not_critical)
            .then(self.neg_priority.cmp(&other.neg_priority))
            .then(cmp_f64(self.deadline, other.deadline))
            .then(cmp_f64(self.duration, other.duration))
            .then_with(|| self.task_id.cmp(&other.task_id))
    }
}

impl PartialOrd for SelectionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
