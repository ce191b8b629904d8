//! List scheduler.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::cancel::CancelCheck;
use crate::config::{EngineConfig, SchedulingOptions};
use crate::critical_path::CriticalPathResult;
use crate::graph::TaskGraph;
use crate::interner::NodeId;
use crate::models::{ScheduledTask, TaskStatus};
use crate::resources::{AlternatePreference, LevelRequest, Leveler, LevelingError, ResourcePool};

use super::constraints::NodeWindow;
use super::sorting::SelectionKey;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduling cancelled")]
    Cancelled,
}

/// Committed schedule plus everything leveling could not fix.
#[derive(Clone, Debug, Default)]
pub struct ScheduleOutcome {
    /// Commitments in commit order.
    pub scheduled: Vec<ScheduledTask>,
    /// Task id -> index into `scheduled`.
    pub position: FxHashMap<String, usize>,
    /// Tasks committed on an overloaded resource.
    pub conflicts: Vec<String>,
    pub exhausted: Vec<LevelingError>,
}

impl ScheduleOutcome {
    pub fn get(&self, task_id: &str) -> Option<&ScheduledTask> {
        self.position.get(task_id).map(|&i| &self.scheduled[i])
    }

    pub fn get_mut(&mut self, task_id: &str) -> Option<&mut ScheduledTask> {
        self.position.get(task_id).map(|&i| &mut self.scheduled[i])
    }

    fn push(&mut self, task: ScheduledTask) {
        self.position.insert(task.task_id.clone(), self.scheduled.len());
        self.scheduled.push(task);
    }
}

/// Commits ready tasks one at a time in [`SelectionKey`] order.
///
/// A task becomes ready once every active dependency is committed; it may
/// start at the latest committed end of those dependencies, its start bound,
/// or the run's "now", whichever is last. Resource overload goes through the
/// leveler; tasks it cannot place are committed anyway and reported as
/// conflicts.
pub struct ListScheduler<'a> {
    graph: &'a TaskGraph,
    timings: &'a CriticalPathResult,
    windows: &'a [NodeWindow],
    options: &'a SchedulingOptions,
    config: &'a EngineConfig,
    now_offset: f64,
}

impl<'a> ListScheduler<'a> {
    pub fn new(
        graph: &'a TaskGraph,
        timings: &'a CriticalPathResult,
        windows: &'a [NodeWindow],
        options: &'a SchedulingOptions,
        config: &'a EngineConfig,
        now_offset: f64,
    ) -> Self {
        Self {
            graph,
            timings,
            windows,
            options,
            config,
            now_offset,
        }
    }

    pub fn schedule(
        &self,
        pool: &mut ResourcePool,
        cancel: CancelCheck<'_>,
    ) -> Result<ScheduleOutcome, SchedulerError> {
        let graph = self.graph;
        let verbosity = self.config.verbosity;
        let n = graph.len();
        let preference = if self.options.prioritize_quality {
            AlternatePreference::Quality
        } else {
            AlternatePreference::Speed
        };
        let leveler = Leveler::new(&self.config.leveling, preference, verbosity);

        let mut remaining: Vec<usize> = (0..n as NodeId)
            .map(|id| graph.active_dependencies(id).count())
            .collect();
        let mut ready_at: Vec<f64> = vec![f64::NEG_INFINITY; n];
        let mut ready: BinaryHeap<Reverse<(SelectionKey, NodeId)>> = BinaryHeap::new();
        for id in 0..n as NodeId {
            if remaining[id as usize] == 0 {
                ready.push(Reverse((self.selection_key(id), id)));
            }
        }

        let mut outcome = ScheduleOutcome::default();
        let mut processed = 0usize;

        while let Some(Reverse((_, id))) = ready.pop() {
            if cancel.should_stop(processed) {
                return Err(SchedulerError::Cancelled);
            }
            processed += 1;

            let task = self.commit(id, ready_at[id as usize], pool, &leveler, &mut outcome);
            let end = graph.offset_of(task.end);
            log_changes!(
                verbosity,
                task_id = %task.task_id,
                resource = ?task.resource_id,
                start = %task.start,
                end = %task.end,
                "committed task"
            );
            outcome.push(task);

            for child in graph.active_dependents(id) {
                let c = child as usize;
                ready_at[c] = ready_at[c].max(end);
                remaining[c] -= 1;
                if remaining[c] == 0 {
                    log_debug!(verbosity, task_id = graph.task_id(child), "task ready");
                    ready.push(Reverse((self.selection_key(child), child)));
                }
            }
        }

        if outcome.scheduled.len() < n {
            tracing::warn!(
                scheduled = outcome.scheduled.len(),
                total = n,
                "some tasks never became ready"
            );
        }
        Ok(outcome)
    }

    fn selection_key(&self, id: NodeId) -> SelectionKey {
        let node = self.graph.node(id);
        SelectionKey::new(
            node.task_id(),
            node.critical_path,
            node.task.priority.unwrap_or(self.config.default_priority),
            self.windows[id as usize].deadline,
            node.duration_hours(),
            self.options.prioritize_speed,
        )
    }

    fn commit(
        &self,
        id: NodeId,
        deps_done: f64,
        pool: &mut ResourcePool,
        leveler: &Leveler<'_>,
        outcome: &mut ScheduleOutcome,
    ) -> ScheduledTask {
        let graph = self.graph;
        let node = graph.node(id);
        let timing = self.timings.timing(id);
        let window = &self.windows[id as usize];
        let duration = node.duration_hours();
        let resource = node.primary_resource().map(str::to_string);

        let mut earliest = deps_done.max(0.0);
        if let Some(bound) = window.start_bound() {
            earliest = earliest.max(bound);
        }
        if matches!(node.status(), TaskStatus::Pending | TaskStatus::Ready | TaskStatus::Blocked) {
            earliest = earliest.max(self.now_offset);
        }

        let mut scheduled = ScheduledTask {
            task_id: node.task_id().to_string(),
            start: graph.at_offset(earliest),
            end: graph.at_offset(earliest + duration),
            duration_hours: duration,
            resource_id: resource.clone(),
            delayed_hours: 0.0,
            reassigned_from: None,
            overallocated: false,
        };

        // Finished work keeps its realised times and no longer holds a resource.
        if node.status() == TaskStatus::Completed {
            scheduled.start = graph.at_offset(timing.earliest_start);
            scheduled.end = graph.at_offset(timing.earliest_finish);
            return scheduled;
        }

        // Running and pinned tasks are placed as-is.
        let fixed_start = match (node.status(), window.pin) {
            (TaskStatus::InProgress, _) => Some(
                node.task
                    .actual_start
                    .map(|s| graph.offset_of(s))
                    .unwrap_or(earliest),
            ),
            (_, Some(pin)) => {
                if pin < deps_done {
                    tracing::warn!(task_id = %scheduled.task_id, "pinned start precedes a dependency");
                }
                Some(pin)
            }
            _ => None,
        };
        if let Some(start) = fixed_start {
            if let Some(resource_id) = &resource {
                let fits = pool
                    .get(resource_id)
                    .map_or(true, |e| e.schedule.fits(start, duration, e.limit));
                if !fits {
                    tracing::warn!(task_id = %scheduled.task_id, resource = %resource_id, "fixed task overloads resource");
                    scheduled.overallocated = true;
                    outcome.conflicts.push(scheduled.task_id.clone());
                }
                pool.commit(resource_id, &scheduled.task_id, start, start + duration);
            }
            scheduled.start = graph.at_offset(start);
            scheduled.end = graph.at_offset(start + duration);
            return scheduled;
        }

        let Some(resource_id) = resource else {
            return scheduled;
        };

        let request = LevelRequest {
            task_id: node.task_id(),
            resource_id: &resource_id,
            earliest_start: earliest,
            duration,
            slack: (timing.latest_start - earliest).max(0.0),
            allow_delay: !window.no_delay,
            specializations: &node.task.specializations,
        };
        match leveler.level(pool, &request) {
            Ok(placement) => {
                log_checks!(
                    self.config.verbosity,
                    task_id = node.task_id(),
                    resource = %placement.resource_id,
                    delay = placement.delay,
                    "placement found"
                );
                pool.commit(
                    &placement.resource_id,
                    node.task_id(),
                    placement.start,
                    placement.start + duration,
                );
                scheduled.start = graph.at_offset(placement.start);
                scheduled.end = graph.at_offset(placement.start + duration);
                scheduled.delayed_hours = placement.delay;
                scheduled.resource_id = Some(placement.resource_id);
                scheduled.reassigned_from = placement.reassigned_from;
            }
            Err(err) => {
                tracing::warn!(task_id = node.task_id(), error = %err, "leveling exhausted");
                pool.commit(&resource_id, node.task_id(), earliest, earliest + duration);
                scheduled.overallocated = true;
                outcome.conflicts.push(scheduled.task_id.clone());
                outcome.exhausted.push(err);
            }
        }
        scheduled
    }
}
