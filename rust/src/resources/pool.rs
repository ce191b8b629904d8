//! Per-role capacity table for one orchestration run.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::config::SchedulingOptions;
use crate::graph::hours_between;
use crate::models::ResourceType;

use super::schedule::ResourceSchedule;

/// Directory entry describing what a role can take on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoleCapacity {
    pub role: String,
    pub hours_per_week: f64,
    /// Nominal number of tasks the role can carry at once.
    pub concurrent_tasks: u32,
    #[serde(default)]
    pub specializations: Vec<String>,
    pub cost_per_hour: f64,
}

impl RoleCapacity {
    pub fn new(role: impl Into<String>, hours_per_week: f64, concurrent_tasks: u32) -> Self {
        Self {
            role: role.into(),
            hours_per_week,
            concurrent_tasks,
            specializations: Vec::new(),
            cost_per_hour: 0.0,
        }
    }

    pub fn with_specializations(mut self, specs: &[&str]) -> Self {
        self.specializations = specs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_cost(mut self, cost_per_hour: f64) -> Self {
        self.cost_per_hour = cost_per_hour;
        self
    }

    /// True when this role holds every specialisation in `required`.
    pub fn covers(&self, required: &[String]) -> bool {
        required.iter().all(|r| self.specializations.contains(r))
    }
}

/// A role in the pool: its capacity, effective limit and timeline.
#[derive(Clone, Debug)]
pub struct PoolEntry {
    pub capacity: RoleCapacity,
    pub resource_type: ResourceType,
    /// Concurrent commitments allowed during this run.
    pub limit: u32,
    pub schedule: ResourceSchedule,
}

impl PoolEntry {
    pub fn resource_id(&self) -> &str {
        &self.capacity.role
    }
}

/// Effective concurrent limit after parallelisation and utilisation caps.
pub fn effective_limit(concurrent_tasks: u32, level_factor: f64, max_utilization: f64) -> u32 {
    let scaled = (concurrent_tasks as f64 * level_factor * max_utilization.clamp(0.0, 1.0)).ceil();
    (scaled as u32).max(1)
}

/// Capacity table snapshotted at run start. Roles unknown to the directory
/// are not tracked and never constrain scheduling.
#[derive(Clone, Debug, Default)]
pub struct ResourcePool {
    entries: Vec<PoolEntry>,
    index: FxHashMap<String, usize>,
}

impl ResourcePool {
    pub fn new(roles: &[RoleCapacity], options: &SchedulingOptions, anchor: DateTime<Utc>) -> Self {
        let factor = options.parallelization_level.capacity_factor();
        let mut pool = Self::default();

        for role in roles {
            if pool.index.contains_key(&role.role) {
                continue;
            }
            let constraint = options.resource_constraint(&role.role);
            let max_utilization = constraint.map_or(1.0, |c| c.max_utilization);
            let windows = constraint
                .map(|c| {
                    c.availability_windows
                        .iter()
                        .map(|w| (hours_between(anchor, w.from), hours_between(anchor, w.to)))
                        .collect()
                })
                .unwrap_or_default();

            pool.index.insert(role.role.clone(), pool.entries.len());
            pool.entries.push(PoolEntry {
                limit: effective_limit(role.concurrent_tasks, factor, max_utilization),
                resource_type: ResourceType::Professional,
                schedule: ResourceSchedule::new(role.role.clone(), windows),
                capacity: role.clone(),
            });
        }
        pool
    }

    pub fn get(&self, resource_id: &str) -> Option<&PoolEntry> {
        self.index.get(resource_id).map(|&i| &self.entries[i])
    }

    pub fn get_mut(&mut self, resource_id: &str) -> Option<&mut PoolEntry> {
        self.index.get(resource_id).map(|&i| &mut self.entries[i])
    }

    pub fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }

    pub fn limit(&self, resource_id: &str) -> Option<u32> {
        self.get(resource_id).map(|e| e.limit)
    }

    /// Roles other than `exclude` holding all of `required`. A task without
    /// required specialisations has no alternates.
    pub fn alternates<'a>(
        &'a self,
        exclude: &'a str,
        required: &'a [String],
    ) -> impl Iterator<Item = &'a PoolEntry> + 'a {
        self.entries.iter().filter(move |e| {
            !required.is_empty() && e.resource_id() != exclude && e.capacity.covers(required)
        })
    }

    /// Record a commitment; unknown roles are ignored.
    pub fn commit(&mut self, resource_id: &str, task_id: &str, start: f64, end: f64) {
        if let Some(entry) = self.get_mut(resource_id) {
            entry.schedule.commit(task_id, start, end);
        }
    }

    pub fn release(&mut self, resource_id: &str, task_id: &str) -> Option<(f64, f64)> {
        self.get_mut(resource_id)
            .and_then(|e| e.schedule.release(task_id))
            .map(|c| (c.start, c.end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ParallelizationLevel, ResourceConstraint};
    use crate::models::TimeWindow;
    use chrono::TimeZone;

    fn anchor() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_effective_limit() {
        assert_eq!(effective_limit(4, 0.75, 1.0), 3);
        assert_eq!(effective_limit(5, 0.5, 1.0), 3);
        assert_eq!(effective_limit(2, 1.0, 1.0), 2);
        assert_eq!(effective_limit(1, 0.5, 0.5), 1);
        assert_eq!(effective_limit(0, 1.0, 1.0), 1);
    }

    #[test]
    fn test_pool_applies_constraints() {
        let roles = vec![
            RoleCapacity::new("ARCHITECT", 38.0, 4),
            RoleCapacity::new("SURVEYOR", 35.0, 4),
        ];
        let options = SchedulingOptions {
            parallelization_level: ParallelizationLevel::Aggressive,
            resource_constraints: vec![ResourceConstraint {
                resource_id: "SURVEYOR".to_string(),
                max_utilization: 0.5,
                availability_windows: vec![TimeWindow::new(
                    anchor(),
                    anchor() + chrono::Duration::hours(40),
                )],
            }],
            ..Default::default()
        };
        let pool = ResourcePool::new(&roles, &options, anchor());

        assert_eq!(pool.limit("ARCHITECT"), Some(4));
        assert_eq!(pool.limit("SURVEYOR"), Some(2));
        assert_eq!(pool.get("SURVEYOR").unwrap().schedule.windows(), &[(0.0, 40.0)]);
        assert!(pool.limit("UNKNOWN").is_none());
    }

    #[test]
    fn test_alternates_require_specializations() {
        let roles = vec![
            RoleCapacity::new("A", 40.0, 1).with_specializations(&["planning"]),
            RoleCapacity::new("B", 40.0, 1).with_specializations(&["planning", "design"]),
            RoleCapacity::new("C", 40.0, 1),
        ];
        let pool = ResourcePool::new(&roles, &SchedulingOptions::default(), anchor());

        let required = vec!["planning".to_string()];
        let alts: Vec<&str> = pool.alternates("A", &required).map(|e| e.resource_id()).collect();
        assert_eq!(alts, vec!["B"]);
        assert_eq!(pool.alternates("A", &[]).count(), 0);
    }
}
