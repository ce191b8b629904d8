//! Configuration types for orchestration runs.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::TimeWindow;

/// How much schedule buffer to plan for on the critical path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    Low,
    #[default]
    Medium,
    High,
}

impl RiskTolerance {
    /// Fraction of critical-path work to hold back as buffer.
    pub fn buffer_factor(self) -> f64 {
        match self {
            RiskTolerance::Low => 0.20,
            RiskTolerance::Medium => 0.10,
            RiskTolerance::High => 0.0,
        }
    }
}

/// Bound on concurrent commitments per resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParallelizationLevel {
    Conservative,
    #[default]
    Moderate,
    Aggressive,
}

impl ParallelizationLevel {
    pub fn capacity_factor(self) -> f64 {
        match self {
            ParallelizationLevel::Conservative => 0.5,
            ParallelizationLevel::Moderate => 0.75,
            ParallelizationLevel::Aggressive => 1.0,
        }
    }
}

/// Per-resource utilisation cap and availability windows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceConstraint {
    pub resource_id: String,
    /// Fraction of nominal capacity that may be committed (0.0-1.0).
    pub max_utilization: f64,
    /// Windows in which the resource can work. Empty means always available.
    #[serde(default)]
    pub availability_windows: Vec<TimeWindow>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeConstraintKind {
    /// Task may not start before `at`.
    StartAfter,
    /// Task should finish by `at` (treated as its deadline).
    FinishBefore,
    /// Task is pinned to start exactly at `at`.
    StartOn,
    /// Leveling may not delay the task; `at` is ignored.
    NoDelay,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeConstraint {
    pub task_id: String,
    pub kind: TimeConstraintKind,
    pub at: DateTime<Utc>,
}

/// Caller-facing options for one orchestration run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingOptions {
    /// Prefer shorter tasks and earliest-finishing alternates.
    pub prioritize_speed: bool,
    /// Prefer senior/specialist alternates (highest cost rate).
    pub prioritize_quality: bool,
    pub resource_constraints: Vec<ResourceConstraint>,
    pub time_constraints: Vec<TimeConstraint>,
    pub risk_tolerance: RiskTolerance,
    pub parallelization_level: ParallelizationLevel,
    /// Run anchor ("now"). Taken from the engine clock when absent.
    pub start_at: Option<DateTime<Utc>>,
}

impl Default for SchedulingOptions {
    fn default() -> Self {
        Self {
            prioritize_speed: true,
            prioritize_quality: false,
            resource_constraints: Vec::new(),
            time_constraints: Vec::new(),
            risk_tolerance: RiskTolerance::Medium,
            parallelization_level: ParallelizationLevel::Moderate,
            start_at: None,
        }
    }
}

impl SchedulingOptions {
    pub fn resource_constraint(&self, resource_id: &str) -> Option<&ResourceConstraint> {
        self.resource_constraints
            .iter()
            .find(|c| c.resource_id == resource_id)
    }

    pub fn time_constraints_for<'a>(
        &'a self,
        task_id: &'a str,
    ) -> impl Iterator<Item = &'a TimeConstraint> + 'a {
        self.time_constraints
            .iter()
            .filter(move |c| c.task_id == task_id)
    }
}

/// Bounds for the resource leveler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelingConfig {
    /// Maximum candidate probes per leveling request before giving up.
    pub max_iterations: usize,
    /// Granularity of the delay search, in hours.
    pub time_step_hours: f64,
}

impl Default for LevelingConfig {
    fn default() -> Self {
        Self {
            max_iterations: 64,
            time_step_hours: 1.0,
        }
    }
}

/// Completion handling knobs.
#[derive(Clone, Debug, PartialEq)]
pub struct PropagationConfig {
    /// Quiet period that ends a burst of completion signals.
    pub debounce: Duration,
    /// Attempts for each status write before reporting a persistence error.
    pub persistence_retries: usize,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(50),
            persistence_retries: 3,
        }
    }
}

/// Engine-wide configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Verbosity level: 0=silent, 1=changes, 2=checks, 3=debug.
    pub verbosity: u8,
    /// Default business priority for tasks without one (0-100).
    pub default_priority: i32,
    pub leveling: LevelingConfig,
    pub propagation: PropagationConfig,
    /// Nodes processed between cancellation checks.
    pub cancel_check_interval: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            default_priority: 50,
            leveling: LevelingConfig::default(),
            propagation: PropagationConfig::default(),
            cancel_check_interval: 256,
        }
    }
}
