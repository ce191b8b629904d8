//! Collaborator traits and in-memory implementations.
//!
//! The engine never touches storage during an algorithmic pass: task and
//! dependency lists and the role table are snapshotted before a run, and
//! status writes happen before the in-memory graph is mutated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{DependencyPair, TaskRecord, TaskStatus};
use crate::resources::RoleCapacity;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("Failed to write status of task {task_id}: {message}")]
    Write { task_id: String, message: String },
    #[error("Failed to read project {project_id}: {message}")]
    Read { project_id: String, message: String },
    #[error("Record not found: {0}")]
    NotFound(String),
}

pub trait TaskStore: Send + Sync {
    fn tasks(&self, project_id: &str) -> Result<Vec<TaskRecord>, PersistenceError>;

    /// Persist a status change. Writing the same status twice must be
    /// harmless so callers can retry.
    fn update_status(
        &self,
        project_id: &str,
        task_id: &str,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;
}

pub trait DependencyStore: Send + Sync {
    fn dependencies(&self, project_id: &str) -> Result<Vec<DependencyPair>, PersistenceError>;
}

pub trait ResourceDirectory: Send + Sync {
    fn roles(&self) -> Vec<RoleCapacity>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Run `op` up to `attempts` times, returning the first success or the last
/// error. `op` must be idempotent.
pub fn with_retries<T>(
    attempts: usize,
    mut op: impl FnMut() -> Result<T, PersistenceError>,
) -> Result<T, PersistenceError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(PersistenceError::NotFound(id)) => return Err(PersistenceError::NotFound(id)),
            Err(err) if attempt >= attempts => return Err(err),
            Err(err) => {
                tracing::warn!(attempt, error = %err, "persistence failed, retrying");
                attempt += 1;
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Task store keyed by project id.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    projects: Mutex<HashMap<String, Vec<TaskRecord>>>,
    failing_writes: AtomicUsize,
    failing_tasks: Mutex<HashMap<String, usize>>,
    writes: AtomicUsize,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_project(&self, project_id: impl Into<String>, tasks: Vec<TaskRecord>) {
        if let Ok(mut projects) = self.projects.lock() {
            projects.insert(project_id.into(), tasks);
        }
    }

    /// Make the next `n` status writes fail.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` status writes for `task_id` fail.
    pub fn fail_writes_for(&self, task_id: impl Into<String>, n: usize) {
        if let Ok(mut failing) = self.failing_tasks.lock() {
            failing.insert(task_id.into(), n);
        }
    }

    /// Successful status writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn status(&self, project_id: &str, task_id: &str) -> Option<TaskStatus> {
        let projects = self.projects.lock().ok()?;
        projects
            .get(project_id)?
            .iter()
            .find(|t| t.id == task_id)
            .map(|t| t.status)
    }

    fn injected_failure(&self, task_id: &str) -> bool {
        let pending = self.failing_writes.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_writes.store(pending - 1, Ordering::SeqCst);
            return true;
        }
        match self.failing_tasks.lock() {
            Ok(mut failing) => match failing.get_mut(task_id) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            },
            Err(_) => false,
        }
    }
}

impl TaskStore for InMemoryTaskStore {
    fn tasks(&self, project_id: &str) -> Result<Vec<TaskRecord>, PersistenceError> {
        let projects = self.projects.lock().map_err(|e| PersistenceError::Read {
            project_id: project_id.to_string(),
            message: e.to_string(),
        })?;
        projects
            .get(project_id)
            .cloned()
            .ok_or_else(|| PersistenceError::NotFound(project_id.to_string()))
    }

    fn update_status(
        &self,
        project_id: &str,
        task_id: &str,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        if self.injected_failure(task_id) {
            return Err(PersistenceError::Write {
                task_id: task_id.to_string(),
                message: "injected failure".to_string(),
            });
        }

        let mut projects = self.projects.lock().map_err(|e| PersistenceError::Write {
            task_id: task_id.to_string(),
            message: e.to_string(),
        })?;
        let task = projects
            .get_mut(project_id)
            .and_then(|tasks| tasks.iter_mut().find(|t| t.id == task_id))
            .ok_or_else(|| PersistenceError::NotFound(format!("{project_id}/{task_id}")))?;

        task.status = status;
        match status {
            TaskStatus::InProgress => {
                task.actual_start.get_or_insert(at);
            }
            TaskStatus::Completed => {
                task.actual_completion.get_or_insert(at);
            }
            _ => {}
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDependencyStore {
    projects: Mutex<HashMap<String, Vec<DependencyPair>>>,
}

impl InMemoryDependencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_project(&self, project_id: impl Into<String>, deps: Vec<DependencyPair>) {
        if let Ok(mut projects) = self.projects.lock() {
            projects.insert(project_id.into(), deps);
        }
    }
}

impl DependencyStore for InMemoryDependencyStore {
    fn dependencies(&self, project_id: &str) -> Result<Vec<DependencyPair>, PersistenceError> {
        let projects = self.projects.lock().map_err(|e| PersistenceError::Read {
            project_id: project_id.to_string(),
            message: e.to_string(),
        })?;
        Ok(projects.get(project_id).cloned().unwrap_or_default())
    }
}

/// Fixed role table.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    roles: Vec<RoleCapacity>,
}

impl StaticDirectory {
    pub fn new(roles: Vec<RoleCapacity>) -> Self {
        Self { roles }
    }

    /// Capacity matrix for the professional roles involved in a property
    /// development sale.
    pub fn professional_defaults() -> Self {
        Self::new(vec![
            RoleCapacity::new("BUYER", 10.0, 3),
            RoleCapacity::new("DEVELOPER", 40.0, 5)
                .with_specializations(&["project_management"])
                .with_cost(150.0),
            RoleCapacity::new("ESTATE_AGENT", 40.0, 8)
                .with_specializations(&["sales", "marketing"])
                .with_cost(75.0),
            RoleCapacity::new("BUYER_SOLICITOR", 35.0, 4)
                .with_specializations(&["conveyancing", "property_law"])
                .with_cost(300.0),
            RoleCapacity::new("DEVELOPER_SOLICITOR", 35.0, 3)
                .with_specializations(&["development_law", "planning"])
                .with_cost(350.0),
            RoleCapacity::new("BUYER_MORTGAGE_BROKER", 30.0, 6)
                .with_specializations(&["mortgage_advice"])
                .with_cost(100.0),
            RoleCapacity::new("LEAD_ARCHITECT", 38.0, 2)
                .with_specializations(&["design", "planning"])
                .with_cost(200.0),
            RoleCapacity::new("STRUCTURAL_ENGINEER", 38.0, 3)
                .with_specializations(&["structural_analysis"])
                .with_cost(180.0),
            RoleCapacity::new("QUANTITY_SURVEYOR", 38.0, 4)
                .with_specializations(&["cost_estimation"])
                .with_cost(150.0),
            RoleCapacity::new("BUILDING_SURVEYOR", 35.0, 5)
                .with_specializations(&["building_inspection"])
                .with_cost(120.0),
            RoleCapacity::new("BER_ASSESSOR", 30.0, 8)
                .with_specializations(&["energy_assessment"])
                .with_cost(80.0),
            RoleCapacity::new("DEVELOPMENT_PROJECT_MANAGER", 40.0, 2)
                .with_specializations(&["project_coordination"])
                .with_cost(180.0),
        ])
    }
}

impl ResourceDirectory for StaticDirectory {
    fn roles(&self) -> Vec<RoleCapacity> {
        self.roles.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn d() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_with_retries_recovers() {
        let store = InMemoryTaskStore::new();
        store.insert_project("p", vec![TaskRecord::new("a", 1.0)]);
        store.fail_next_writes(2);

        with_retries(3, || store.update_status("p", "a", TaskStatus::Completed, d())).unwrap();
        assert_eq!(store.status("p", "a"), Some(TaskStatus::Completed));
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn test_with_retries_gives_up() {
        let store = InMemoryTaskStore::new();
        store.insert_project("p", vec![TaskRecord::new("a", 1.0)]);
        store.fail_next_writes(5);

        let err = with_retries(3, || store.update_status("p", "a", TaskStatus::Completed, d())).unwrap_err();
        assert!(matches!(err, PersistenceError::Write { .. }));
        assert_eq!(store.status("p", "a"), Some(TaskStatus::Pending));
    }

    #[test]
    fn test_not_found_is_not_retried() {
        let store = InMemoryTaskStore::new();
        let mut calls = 0;
        let err = with_retries(3, || {
            calls += 1;
            store.update_status("p", "ghost", TaskStatus::Completed, d())
        })
        .unwrap_err();
        assert_eq!(err, PersistenceError::NotFound("p/ghost".to_string()));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_status_write_records_times_once() {
        let store = InMemoryTaskStore::new();
        store.insert_project("p", vec![TaskRecord::new("a", 1.0)]);
        store.update_status("p", "a", TaskStatus::Completed, d()).unwrap();
        store
            .update_status("p", "a", TaskStatus::Completed, d() + chrono::Duration::hours(1))
            .unwrap();
        let tasks = store.tasks("p").unwrap();
        assert_eq!(tasks[0].actual_completion, Some(d()));
    }

    #[test]
    fn test_status_writes_stay_inside_their_project() {
        let store = InMemoryTaskStore::new();
        store.insert_project("p1", vec![TaskRecord::new("survey", 2.0)]);
        store.insert_project("p2", vec![TaskRecord::new("survey", 2.0)]);

        store.update_status("p1", "survey", TaskStatus::Completed, d()).unwrap();
        assert_eq!(store.status("p1", "survey"), Some(TaskStatus::Completed));
        assert_eq!(store.status("p2", "survey"), Some(TaskStatus::Pending));

        let err = store
            .update_status("p3", "survey", TaskStatus::Completed, d())
            .unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound(_)));
    }

    #[test]
    fn test_failures_injected_per_task() {
        let store = InMemoryTaskStore::new();
        store.insert_project("p", vec![TaskRecord::new("a", 1.0), TaskRecord::new("b", 1.0)]);
        store.fail_writes_for("b", 1);

        store.update_status("p", "a", TaskStatus::Completed, d()).unwrap();
        assert!(store.update_status("p", "b", TaskStatus::InProgress, d()).is_err());
        store.update_status("p", "b", TaskStatus::InProgress, d()).unwrap();
        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn test_professional_defaults() {
        let roles = StaticDirectory::professional_defaults().roles();
        assert_eq!(roles.len(), 12);
        let architect = roles.iter().find(|r| r.role == "LEAD_ARCHITECT").unwrap();
        assert_eq!(architect.concurrent_tasks, 2);
        assert!(architect.specializations.contains(&"planning".to_string()));
    }

    #[test]
    fn test_fixed_clock_advances() {
        let clock = FixedClock::new(d());
        clock.advance(chrono::Duration::hours(3));
        assert_eq!(clock.now(), d() + chrono::Duration::hours(3));
    }
}
