//! Core data types shared by every orchestration stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a persisted task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Ready,
    InProgress,
    Completed,
    Blocked,
}

impl TaskStatus {
    pub fn is_completed(self) -> bool {
        self == TaskStatus::Completed
    }
}

/// A persisted task as handed over by the task store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
    /// Estimated duration in hours.
    pub duration_hours: f64,
    /// Professional role expected to carry out the task.
    #[serde(default)]
    pub assigned_role: Option<String>,
    /// Specialisations an alternate resource must hold to take the task over.
    #[serde(default)]
    pub specializations: Vec<String>,
    /// Business priority (0-100, higher is more important).
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    /// Template category ("legal", "design", ...), drives regulatory constraints.
    #[serde(default)]
    pub template_category: Option<String>,
    #[serde(default)]
    pub actual_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actual_completion: Option<DateTime<Utc>>,
    /// Extra constraints beyond the ones derived from the record.
    #[serde(default)]
    pub constraints: Vec<TaskConstraint>,
}

impl TaskRecord {
    /// Minimal record with the given id and duration; everything else default.
    pub fn new(id: impl Into<String>, duration_hours: f64) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            status: TaskStatus::Pending,
            duration_hours,
            assigned_role: None,
            specializations: Vec::new(),
            priority: None,
            deadline: None,
            template_category: None,
            actual_start: None,
            actual_completion: None,
            constraints: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.assigned_role = Some(role.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_specializations(mut self, specs: &[&str]) -> Self {
        self.specializations = specs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }
}

/// A parent -> child dependency: `child` cannot start before `parent` finishes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyPair {
    pub parent: String,
    pub child: String,
}

impl DependencyPair {
    pub fn new(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Professional,
    Tool,
    Document,
    Approval,
    Funding,
}

/// A closed-open time window `[from, to)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }
}

/// Capacity of one resource over one window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceAvailability {
    pub resource_id: String,
    pub window: TimeWindow,
    pub capacity: u32,
    pub current_utilization: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub quantity: u32,
    pub duration_hours: f64,
    #[serde(default)]
    pub availability: Vec<ResourceAvailability>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintType {
    Time,
    Resource,
    Regulatory,
    Business,
    Technical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintImpact {
    Blocking,
    Delaying,
    Advisory,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskConstraint {
    pub kind: ConstraintType,
    pub description: String,
    pub impact: ConstraintImpact,
    #[serde(default)]
    pub resolution: Vec<String>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

/// A task committed to a resource and time slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_hours: f64,
    pub resource_id: Option<String>,
    /// Hours the commit was pushed past the task's earliest start by leveling.
    pub delayed_hours: f64,
    /// Original resource when the leveler or resolver moved the task.
    pub reassigned_from: Option<String>,
    /// Committed although the resource limit was already reached.
    pub overallocated: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    DeadlineRisk,
    ResourceConflict,
    DependencyLoop,
    CriticalPathDelay,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationWarning {
    pub kind: WarningKind,
    pub severity: Severity,
    pub description: String,
    pub affected_tasks: Vec<String>,
    pub mitigation: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverallocationPeriod {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Concurrent commitments above the resource limit.
    pub overallocation: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceUtilization {
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub utilization_rate: f64,
    pub overallocation_periods: Vec<OverallocationPeriod>,
    pub recommendations: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationMetrics {
    pub total_tasks: usize,
    /// Number of nodes on the critical path.
    pub critical_path_length: usize,
    pub parallelization_rate: f64,
    pub resource_efficiency: f64,
    pub estimated_duration_hours: f64,
    pub buffer_time_hours: f64,
    pub recommended_buffer_hours: f64,
    pub risk_score: f64,
}

/// Outcome of one orchestration run. Immutable once returned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub success: bool,
    pub scheduled_tasks: Vec<ScheduledTask>,
    /// Critical task ids ordered by earliest start.
    pub critical_path: Vec<String>,
    pub estimated_completion: DateTime<Utc>,
    pub resource_utilization: Vec<ResourceUtilization>,
    pub warnings: Vec<OrchestrationWarning>,
    pub errors: Vec<String>,
    pub metrics: OrchestrationMetrics,
    pub cycles: Vec<Vec<String>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    Hard,
    Regulatory,
    Resource,
}

/// Per-task classification of its place in the dependency graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DependencyAnalysis {
    pub task_id: String,
    pub dependency_type: DependencyType,
    pub prerequisite_tasks: Vec<String>,
    pub blocked_tasks: Vec<String>,
    pub circular_dependencies: Vec<Vec<String>>,
    pub critical_dependencies: Vec<String>,
    pub optional_dependencies: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    Resource,
    Schedule,
    Process,
    Risk,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub priority: Severity,
    pub description: String,
    pub impact: String,
    pub implementation: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_task_record_builder() {
        let task = TaskRecord::new("survey", 4.0)
            .with_role("BUILDING_SURVEYOR")
            .with_priority(80)
            .with_specializations(&["building_inspection"]);
        assert_eq!(task.title, "survey");
        assert_eq!(task.assigned_role.as_deref(), Some("BUILDING_SURVEYOR"));
        assert_eq!(task.priority, Some(80));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.specializations, vec!["building_inspection".to_string()]);
    }

    #[test]
    fn test_task_record_deserialize_defaults() {
        let json = r#"{"id": "a", "title": "Contract review", "duration_hours": 3.5}"#;
        let task: TaskRecord = serde_json::from_str(json).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.assigned_role.is_none());
        assert!(task.constraints.is_empty());
    }
}
