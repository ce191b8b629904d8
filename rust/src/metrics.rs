//! Run metrics, resource utilisation, schedule warnings and recommendations.

use rustc_hash::FxHashSet;

use crate::config::RiskTolerance;
use crate::critical_path::CriticalPathResult;
use crate::graph::TaskGraph;
use crate::models::{
    OrchestrationMetrics, OrchestrationWarning, OverallocationPeriod, Recommendation,
    RecommendationKind, ResourceUtilization, Severity, TaskStatus, WarningKind,
};
use crate::resources::ResourcePool;
use crate::scheduler::{NodeWindow, ScheduleOutcome};

/// Weights of the risk score components; they sum to 1.
const OVERDUE_WEIGHT: f64 = 0.4;
const CRITICAL_RISK_WEIGHT: f64 = 0.4;
const OVERALLOCATION_WEIGHT: f64 = 0.2;
const MAX_RISK: f64 = 10.0;

/// Thresholds for recommendations.
const OVERALLOCATION_THRESHOLD: f64 = 0.8;
const CRITICAL_RISK_THRESHOLD: f64 = 0.7;

/// Everything the reporter reads from a finished run.
pub struct RunView<'a> {
    pub graph: &'a TaskGraph,
    pub timings: &'a CriticalPathResult,
    pub schedule: &'a ScheduleOutcome,
    pub windows: &'a [NodeWindow],
    pub pool: &'a ResourcePool,
    pub cycle_count: usize,
    pub risk_tolerance: RiskTolerance,
}

impl RunView<'_> {
    /// Latest committed end, in hours from the anchor (never negative).
    pub fn completion_offset(&self) -> f64 {
        self.schedule
            .scheduled
            .iter()
            .map(|t| self.graph.offset_of(t.end))
            .fold(0.0, f64::max)
    }

    /// Tasks whose committed end passes their deadline.
    pub fn overdue(&self) -> Vec<&str> {
        self.schedule
            .scheduled
            .iter()
            .filter(|t| {
                let Some(id) = self.graph.id_of(&t.task_id) else {
                    return false;
                };
                let node = self.graph.node(id);
                node.status() != TaskStatus::Completed
                    && self.windows[id as usize]
                        .deadline
                        .is_some_and(|d| self.graph.offset_of(t.end) > d)
            })
            .map(|t| t.task_id.as_str())
            .collect()
    }

    /// Critical tasks that are late, were pushed by leveling, or sit on an
    /// overloaded resource.
    pub fn at_risk_critical(&self) -> Vec<&str> {
        let overdue: FxHashSet<&str> = self.overdue().into_iter().collect();
        self.timings
            .critical
            .iter()
            .map(|&id| self.graph.task_id(id))
            .filter(|task_id| {
                overdue.contains(task_id)
                    || self
                        .schedule
                        .get(task_id)
                        .is_some_and(|t| t.overallocated || t.delayed_hours > 0.0)
            })
            .collect()
    }

    /// Fraction of critical tasks at risk (0 when nothing is critical).
    pub fn critical_path_risk(&self) -> f64 {
        ratio(self.at_risk_critical().len(), self.timings.critical.len())
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Fraction of scheduled tasks whose interval overlaps another task's.
pub fn parallelization_rate(view: &RunView<'_>) -> f64 {
    let mut intervals: Vec<(f64, f64)> = view
        .schedule
        .scheduled
        .iter()
        .map(|t| (view.graph.offset_of(t.start), view.graph.offset_of(t.end)))
        .filter(|(s, e)| e > s)
        .collect();
    if intervals.is_empty() {
        return 0.0;
    }
    intervals.sort_by(|a, b| a.0.total_cmp(&b.0));

    // Sorted by start: an interval overlaps an earlier one iff it starts
    // before the running max end, and a later one iff the next start is
    // before its own end.
    let mut overlapping = 0usize;
    let mut max_end = f64::NEG_INFINITY;
    for (i, &(start, end)) in intervals.iter().enumerate() {
        let with_earlier = start < max_end;
        let with_later = intervals.get(i + 1).is_some_and(|next| next.0 < end);
        if with_earlier || with_later {
            overlapping += 1;
        }
        max_end = max_end.max(end);
    }
    ratio(overlapping, intervals.len())
}

/// Per-resource utilisation over the project span.
pub fn resource_utilization(view: &RunView<'_>) -> Vec<ResourceUtilization> {
    let span = view.completion_offset();
    view.pool
        .entries()
        .iter()
        .filter(|e| !e.schedule.commitments().is_empty())
        .map(|entry| {
            let available = entry.limit as f64 * span;
            let rate = if available > 0.0 {
                entry.schedule.committed_hours() / available
            } else {
                0.0
            };
            let periods: Vec<OverallocationPeriod> = entry
                .schedule
                .overallocated_periods(entry.limit)
                .into_iter()
                .map(|(from, to, overallocation)| OverallocationPeriod {
                    from: view.graph.at_offset(from),
                    to: view.graph.at_offset(to),
                    overallocation,
                })
                .collect();

            let mut recommendations = Vec::new();
            if !periods.is_empty() {
                recommendations.push(format!(
                    "Redistribute work: {} is overloaded in {} period(s)",
                    entry.resource_id(),
                    periods.len()
                ));
            }
            if rate > OVERALLOCATION_THRESHOLD {
                recommendations.push("Consider adding capacity for this role".to_string());
            } else if rate < 0.3 {
                recommendations.push("Spare capacity available for other work".to_string());
            }

            ResourceUtilization {
                resource_id: entry.resource_id().to_string(),
                resource_type: entry.resource_type,
                utilization_rate: rate,
                overallocation_periods: periods,
                recommendations,
            }
        })
        .collect()
}

/// Utilised task-hours over available slot-hours, across used roles.
pub fn resource_efficiency(view: &RunView<'_>) -> f64 {
    let span = view.completion_offset();
    let (used, available) = view
        .pool
        .entries()
        .iter()
        .filter(|e| !e.schedule.commitments().is_empty())
        .fold((0.0, 0.0), |(used, available), e| {
            (
                used + e.schedule.committed_hours(),
                available + e.limit as f64 * span,
            )
        });
    if available > 0.0 {
        (used / available).min(1.0)
    } else {
        0.0
    }
}

pub fn compute_metrics(view: &RunView<'_>) -> OrchestrationMetrics {
    let graph = view.graph;
    let scheduled = view.schedule.scheduled.len();

    let critical_work: f64 = view
        .timings
        .critical
        .iter()
        .map(|&id| graph.node(id).duration_hours())
        .sum();
    let buffer_time: f64 = graph.nodes().map(|n| n.slack_hours).sum();

    let overdue_ratio = ratio(view.overdue().len(), scheduled);
    let overallocated = view
        .schedule
        .scheduled
        .iter()
        .filter(|t| t.overallocated)
        .count();
    let overallocated_ratio = ratio(overallocated, scheduled);
    let risk = MAX_RISK
        * (OVERDUE_WEIGHT * overdue_ratio
            + CRITICAL_RISK_WEIGHT * view.critical_path_risk()
            + OVERALLOCATION_WEIGHT * overallocated_ratio);

    OrchestrationMetrics {
        total_tasks: graph.len(),
        critical_path_length: view.timings.critical.len(),
        parallelization_rate: parallelization_rate(view),
        resource_efficiency: resource_efficiency(view),
        estimated_duration_hours: view.completion_offset(),
        buffer_time_hours: buffer_time,
        recommended_buffer_hours: view.risk_tolerance.buffer_factor() * critical_work,
        risk_score: risk.min(MAX_RISK),
    }
}

/// Deadline and overload warnings for a committed schedule.
pub fn schedule_warnings(view: &RunView<'_>) -> Vec<OrchestrationWarning> {
    let mut warnings = Vec::new();

    let overloaded: Vec<String> = view
        .schedule
        .scheduled
        .iter()
        .filter(|t| t.overallocated)
        .map(|t| t.task_id.clone())
        .collect();
    if !overloaded.is_empty() {
        warnings.push(OrchestrationWarning {
            kind: WarningKind::ResourceConflict,
            severity: Severity::High,
            description: format!("{} task(s) committed on overloaded resources", overloaded.len()),
            affected_tasks: overloaded,
            mitigation: vec![
                "Reschedule non-critical tasks".to_string(),
                "Add capacity to the overloaded roles".to_string(),
            ],
        });
    }

    for task_id in view.overdue() {
        warnings.push(OrchestrationWarning {
            kind: WarningKind::DeadlineRisk,
            severity: Severity::Medium,
            description: format!("Task {task_id} is scheduled to finish after its deadline"),
            affected_tasks: vec![task_id.to_string()],
            mitigation: vec![
                "Start prerequisite work earlier".to_string(),
                "Assign additional resources".to_string(),
            ],
        });
    }
    warnings
}

/// Prioritised actions, highest priority first.
pub fn recommendations(
    view: &RunView<'_>,
    utilization: &[ResourceUtilization],
) -> Vec<Recommendation> {
    let mut recs = Vec::new();

    let peak = utilization
        .iter()
        .map(|u| u.utilization_rate)
        .fold(0.0, f64::max);
    if peak > OVERALLOCATION_THRESHOLD {
        recs.push(Recommendation {
            kind: RecommendationKind::Resource,
            priority: Severity::High,
            description: "Resource overallocation detected".to_string(),
            impact: "Delays and quality issues likely".to_string(),
            implementation: vec![
                "Hire additional professionals".to_string(),
                "Reschedule non-critical tasks".to_string(),
                "Increase task parallelization".to_string(),
            ],
        });
    }

    if view.critical_path_risk() > CRITICAL_RISK_THRESHOLD {
        recs.push(Recommendation {
            kind: RecommendationKind::Schedule,
            priority: Severity::Critical,
            description: "Critical path at high risk of delays".to_string(),
            impact: "Project completion date threatened".to_string(),
            implementation: vec![
                "Add buffer time to critical tasks".to_string(),
                "Assign senior resources to critical path".to_string(),
                "Implement daily monitoring".to_string(),
            ],
        });
    }

    if view.cycle_count > 0 {
        recs.push(Recommendation {
            kind: RecommendationKind::Process,
            priority: Severity::Critical,
            description: format!("{} circular dependency chain(s) found", view.cycle_count),
            impact: "Tasks on a cycle can never become ready in order".to_string(),
            implementation: vec![
                "Review the workflow templates that create the loop".to_string(),
                "Remove or invert one dependency per cycle".to_string(),
            ],
        });
    }

    let overdue = view.overdue();
    if !overdue.is_empty() {
        recs.push(Recommendation {
            kind: RecommendationKind::Risk,
            priority: Severity::High,
            description: format!("{} task(s) at risk of missing their deadline", overdue.len()),
            impact: "Contractual or regulatory dates may be missed".to_string(),
            implementation: vec![
                "Escalate the affected tasks".to_string(),
                "Negotiate revised deadlines early".to_string(),
            ],
        });
    }

    recs.sort_by(|a, b| b.priority.cmp(&a.priority));
    recs
}
