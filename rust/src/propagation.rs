//! Completion propagation.
//!
//! A completion is validated, persisted, and only then applied to the graph.
//! Dependents whose prerequisites are now all complete are auto-started and
//! announced once; repeated signals for the same task are no-ops.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashSet;

use crate::error::{OrchestrationError, Result};
use crate::events::{DomainEvent, NotificationSink};
use crate::graph::TaskGraph;
use crate::interner::NodeId;
use crate::models::TaskStatus;
use crate::store::{with_retries, TaskStore};

/// Collaborators and knobs for one completion.
pub struct PropagationContext<'a> {
    pub project_id: &'a str,
    pub store: &'a dyn TaskStore,
    pub sink: &'a dyn NotificationSink,
    pub now: DateTime<Utc>,
    pub retries: usize,
    pub verbosity: u8,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompletionOutcome {
    pub task_id: String,
    /// Dependents auto-started by this completion.
    pub triggered: Vec<String>,
    /// Dependents that became ready but whose status write failed.
    pub failed_triggers: Vec<String>,
    /// The task was on the critical path, so timings are stale.
    pub recompute_needed: bool,
    /// The task was already complete; nothing changed.
    pub duplicate: bool,
}

/// An applied status change.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusTransition {
    pub task_id: String,
    pub from: TaskStatus,
    pub to: TaskStatus,
    /// Set when the change was a completion.
    pub completion: Option<CompletionOutcome>,
}

/// Per-run completion bookkeeping.
#[derive(Debug, Default, Clone)]
pub struct CompletionPropagator {
    triggered: FxHashSet<String>,
    pending_recompute: bool,
}

impl CompletionPropagator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn was_triggered(&self, task_id: &str) -> bool {
        self.triggered.contains(task_id)
    }

    pub fn recompute_pending(&self) -> bool {
        self.pending_recompute
    }

    /// Clear the pending-recompute flag once a recompute has succeeded.
    pub fn clear_recompute(&mut self) {
        self.pending_recompute = false;
    }

    pub fn complete(
        &mut self,
        ctx: &PropagationContext<'_>,
        graph: &mut TaskGraph,
        task_id: &str,
    ) -> Result<CompletionOutcome> {
        let id = graph
            .id_of(task_id)
            .ok_or_else(|| OrchestrationError::TaskNotFound(task_id.to_string()))?;
        let mut outcome = CompletionOutcome {
            task_id: task_id.to_string(),
            ..Default::default()
        };

        let status = graph.node(id).status();
        if status == TaskStatus::Completed {
            log_checks!(ctx.verbosity, task_id, "duplicate completion");
            outcome.duplicate = true;
            // Dependents whose auto-start was not persisted last time.
            self.trigger_dependents(ctx, graph, id, &mut outcome);
            return Ok(outcome);
        }
        if let Some(unmet) = unmet_prerequisite(graph, id) {
            return Err(OrchestrationError::InvalidTransition {
                task_id: task_id.to_string(),
                from: status,
                to: TaskStatus::Completed,
                reason: format!("prerequisite {} not completed", graph.task_id(unmet)),
            });
        }

        with_retries(ctx.retries, || {
            ctx.store
                .update_status(ctx.project_id, task_id, TaskStatus::Completed, ctx.now)
        })?;

        let node = graph.node_mut(id);
        node.task.status = TaskStatus::Completed;
        node.task.actual_completion.get_or_insert(ctx.now);
        let duration = node.duration_hours();
        node.task
            .actual_start
            .get_or_insert_with(|| crate::graph::hours_after(ctx.now, -duration));
        outcome.recompute_needed = node.critical_path;
        log_changes!(ctx.verbosity, task_id, critical = outcome.recompute_needed, "task completed");

        self.trigger_dependents(ctx, graph, id, &mut outcome);
        self.pending_recompute |= outcome.recompute_needed;
        Ok(outcome)
    }

    /// Apply a status change other than completion, which goes through
    /// [`Self::complete`].
    ///
    /// Completed tasks cannot be reopened, and a task can only start or be
    /// marked ready once its prerequisites are done. The store is written
    /// before the graph; setting the current status again writes nothing.
    pub fn transition(
        &mut self,
        ctx: &PropagationContext<'_>,
        graph: &mut TaskGraph,
        task_id: &str,
        to: TaskStatus,
    ) -> Result<StatusTransition> {
        if to == TaskStatus::Completed {
            let from = graph
                .get(task_id)
                .map(|n| n.status())
                .ok_or_else(|| OrchestrationError::TaskNotFound(task_id.to_string()))?;
            let completion = self.complete(ctx, graph, task_id)?;
            return Ok(StatusTransition {
                task_id: task_id.to_string(),
                from,
                to,
                completion: Some(completion),
            });
        }

        let id = graph
            .id_of(task_id)
            .ok_or_else(|| OrchestrationError::TaskNotFound(task_id.to_string()))?;
        let from = graph.node(id).status();
        let change = StatusTransition {
            task_id: task_id.to_string(),
            from,
            to,
            completion: None,
        };
        if from == to {
            return Ok(change);
        }

        let rejected = |reason: String| OrchestrationError::InvalidTransition {
            task_id: task_id.to_string(),
            from,
            to,
            reason,
        };
        if from == TaskStatus::Completed {
            return Err(rejected("completed tasks cannot be reopened".to_string()));
        }
        if matches!(to, TaskStatus::InProgress | TaskStatus::Ready) {
            if let Some(unmet) = unmet_prerequisite(graph, id) {
                return Err(rejected(format!(
                    "prerequisite {} not completed",
                    graph.task_id(unmet)
                )));
            }
        }

        with_retries(ctx.retries, || {
            ctx.store.update_status(ctx.project_id, task_id, to, ctx.now)
        })?;

        let node = graph.node_mut(id);
        node.task.status = to;
        if to == TaskStatus::InProgress {
            node.task.actual_start.get_or_insert(ctx.now);
        }
        log_changes!(ctx.verbosity, task_id, from = ?from, to = ?to, "task status changed");
        Ok(change)
    }

    /// Auto-start every dependent of `id` that is waiting on nothing and has
    /// not been started by this propagator before.
    fn trigger_dependents(
        &mut self,
        ctx: &PropagationContext<'_>,
        graph: &mut TaskGraph,
        id: NodeId,
        outcome: &mut CompletionOutcome,
    ) {
        let task_id = graph.task_id(id).to_string();
        let dependents: Vec<NodeId> = graph.active_dependents(id).collect();
        for child in dependents {
            let child_id = graph.task_id(child).to_string();
            if self.triggered.contains(&child_id) || !startable(graph, child) {
                continue;
            }

            let write = with_retries(ctx.retries, || {
                ctx.store
                    .update_status(ctx.project_id, &child_id, TaskStatus::InProgress, ctx.now)
            });
            if let Err(err) = write {
                tracing::warn!(task_id = %child_id, error = %err, "auto-start not persisted");
                outcome.failed_triggers.push(child_id);
                continue;
            }

            let node = graph.node_mut(child);
            node.task.status = TaskStatus::InProgress;
            node.task.actual_start.get_or_insert(ctx.now);
            self.triggered.insert(child_id.clone());
            ctx.sink.publish(DomainEvent::TaskReady {
                project_id: ctx.project_id.to_string(),
                task_id: child_id.clone(),
                unlocked_by: task_id.clone(),
                at: ctx.now,
            });
            outcome.triggered.push(child_id);
        }
    }
}

fn unmet_prerequisite(graph: &TaskGraph, id: NodeId) -> Option<NodeId> {
    graph
        .active_dependencies(id)
        .find(|&dep| !graph.node(dep).status().is_completed())
}

/// Waiting on nothing and not yet started.
fn startable(graph: &TaskGraph, id: NodeId) -> bool {
    matches!(
        graph.node(id).status(),
        TaskStatus::Pending | TaskStatus::Ready | TaskStatus::Blocked
    ) && unmet_prerequisite(graph, id).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use crate::graph::build_graph;
    use crate::models::{DependencyPair, TaskRecord};
    use crate::store::InMemoryTaskStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 9, 12, 0, 0).unwrap()
    }

    fn setup(tasks: Vec<TaskRecord>, deps: &[(&str, &str)]) -> (TaskGraph, InMemoryTaskStore) {
        let deps: Vec<DependencyPair> = deps.iter().map(|(p, c)| DependencyPair::new(*p, *c)).collect();
        let store = InMemoryTaskStore::new();
        store.insert_project("p", tasks.clone());
        (build_graph(&tasks, &deps, now()).graph, store)
    }

    fn ctx<'a>(store: &'a InMemoryTaskStore, sink: &'a RecordingSink) -> PropagationContext<'a> {
        PropagationContext {
            project_id: "p",
            store,
            sink,
            now: now(),
            retries: 3,
            verbosity: 0,
        }
    }

    #[test]
    fn test_completion_triggers_each_dependent_once() {
        let (mut graph, store) = setup(
            vec![
                TaskRecord::new("a", 2.0),
                TaskRecord::new("b", 3.0),
                TaskRecord::new("c", 1.0),
            ],
            &[("a", "b"), ("a", "c")],
        );
        let sink = RecordingSink::new();
        let mut propagator = CompletionPropagator::new();

        let first = propagator.complete(&ctx(&store, &sink), &mut graph, "a").unwrap();
        assert_eq!(first.triggered, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(sink.ready_tasks(), vec!["b".to_string(), "c".to_string()]);

        let again = propagator.complete(&ctx(&store, &sink), &mut graph, "a").unwrap();
        assert!(again.duplicate);
        assert!(again.triggered.is_empty());
        assert_eq!(sink.ready_tasks().len(), 2);
        assert_eq!(store.status("p", "b"), Some(TaskStatus::InProgress));
    }

    #[test]
    fn test_dependent_waits_for_all_prerequisites() {
        let (mut graph, store) = setup(
            vec![
                TaskRecord::new("a", 1.0),
                TaskRecord::new("b", 1.0),
                TaskRecord::new("c", 1.0),
            ],
            &[("a", "c"), ("b", "c")],
        );
        let sink = RecordingSink::new();
        let mut propagator = CompletionPropagator::new();

        let first = propagator.complete(&ctx(&store, &sink), &mut graph, "a").unwrap();
        assert!(first.triggered.is_empty());
        let second = propagator.complete(&ctx(&store, &sink), &mut graph, "b").unwrap();
        assert_eq!(second.triggered, vec!["c".to_string()]);
        assert!(propagator.was_triggered("c"));
    }

    #[test]
    fn test_unmet_prerequisite_rejected_without_mutation() {
        let (mut graph, store) = setup(
            vec![TaskRecord::new("a", 1.0), TaskRecord::new("b", 1.0)],
            &[("a", "b")],
        );
        let sink = RecordingSink::new();
        let mut propagator = CompletionPropagator::new();

        let err = propagator.complete(&ctx(&store, &sink), &mut graph, "b").unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidTransition { .. }));
        assert_eq!(graph.get("b").unwrap().status(), TaskStatus::Pending);
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn test_persistence_failure_leaves_graph_untouched() {
        let (mut graph, store) = setup(vec![TaskRecord::new("a", 1.0)], &[]);
        store.fail_next_writes(10);
        let sink = RecordingSink::new();
        let mut propagator = CompletionPropagator::new();

        let err = propagator.complete(&ctx(&store, &sink), &mut graph, "a").unwrap_err();
        assert!(matches!(err, OrchestrationError::Persistence(_)));
        assert_eq!(graph.get("a").unwrap().status(), TaskStatus::Pending);
        assert!(graph.get("a").unwrap().task.actual_completion.is_none());
    }

    #[test]
    fn test_unknown_task() {
        let (mut graph, store) = setup(vec![TaskRecord::new("a", 1.0)], &[]);
        let sink = RecordingSink::new();
        let err = CompletionPropagator::new()
            .complete(&ctx(&store, &sink), &mut graph, "ghost")
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::TaskNotFound(_)));
    }

    #[test]
    fn test_critical_completion_requests_recompute() {
        let (mut graph, store) = setup(vec![TaskRecord::new("a", 1.0)], &[]);
        graph.node_mut(0).critical_path = true;
        let sink = RecordingSink::new();
        let mut propagator = CompletionPropagator::new();

        let outcome = propagator.complete(&ctx(&store, &sink), &mut graph, "a").unwrap();
        assert!(outcome.recompute_needed);
        assert!(propagator.recompute_pending());
        propagator.clear_recompute();
        assert!(!propagator.recompute_pending());
    }

    #[test]
    fn test_unpersisted_trigger_retried_on_next_signal() {
        let (mut graph, store) = setup(
            vec![TaskRecord::new("a", 1.0), TaskRecord::new("b", 1.0)],
            &[("a", "b")],
        );
        store.fail_writes_for("b", 3);
        let sink = RecordingSink::new();
        let mut propagator = CompletionPropagator::new();

        let first = propagator.complete(&ctx(&store, &sink), &mut graph, "a").unwrap();
        assert!(first.triggered.is_empty());
        assert_eq!(first.failed_triggers, vec!["b".to_string()]);
        assert_eq!(store.status("p", "a"), Some(TaskStatus::Completed));
        assert_eq!(graph.get("b").unwrap().status(), TaskStatus::Pending);

        let again = propagator.complete(&ctx(&store, &sink), &mut graph, "a").unwrap();
        assert!(again.duplicate);
        assert_eq!(again.triggered, vec!["b".to_string()]);
        assert_eq!(store.status("p", "b"), Some(TaskStatus::InProgress));
        assert_eq!(sink.ready_tasks(), vec!["b".to_string()]);

        let third = propagator.complete(&ctx(&store, &sink), &mut graph, "a").unwrap();
        assert!(third.triggered.is_empty());
        assert_eq!(sink.ready_tasks().len(), 1);
    }

    #[test]
    fn test_start_requires_completed_prerequisites() {
        let (mut graph, store) = setup(
            vec![TaskRecord::new("a", 1.0), TaskRecord::new("b", 1.0)],
            &[("a", "b")],
        );
        let sink = RecordingSink::new();
        let mut propagator = CompletionPropagator::new();

        let err = propagator
            .transition(&ctx(&store, &sink), &mut graph, "b", TaskStatus::InProgress)
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidTransition { .. }));
        assert_eq!(store.write_count(), 0);

        let started = propagator
            .transition(&ctx(&store, &sink), &mut graph, "a", TaskStatus::InProgress)
            .unwrap();
        assert_eq!(started.from, TaskStatus::Pending);
        assert_eq!(graph.get("a").unwrap().task.actual_start, Some(now()));
        assert_eq!(store.status("p", "a"), Some(TaskStatus::InProgress));

        let blocked = propagator
            .transition(&ctx(&store, &sink), &mut graph, "b", TaskStatus::Blocked)
            .unwrap();
        assert_eq!(blocked.to, TaskStatus::Blocked);
    }

    #[test]
    fn test_completed_task_cannot_be_reopened() {
        let (mut graph, store) = setup(vec![TaskRecord::new("a", 1.0)], &[]);
        let sink = RecordingSink::new();
        let mut propagator = CompletionPropagator::new();

        let done = propagator
            .transition(&ctx(&store, &sink), &mut graph, "a", TaskStatus::Completed)
            .unwrap();
        assert!(done.completion.is_some());
        let writes = store.write_count();

        let err = propagator
            .transition(&ctx(&store, &sink), &mut graph, "a", TaskStatus::InProgress)
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidTransition { .. }));
        assert_eq!(graph.get("a").unwrap().status(), TaskStatus::Completed);
        assert_eq!(store.write_count(), writes);
    }

    #[test]
    fn test_same_status_writes_nothing() {
        let (mut graph, store) = setup(vec![TaskRecord::new("a", 1.0)], &[]);
        let sink = RecordingSink::new();
        let change = CompletionPropagator::new()
            .transition(&ctx(&store, &sink), &mut graph, "a", TaskStatus::Pending)
            .unwrap();
        assert_eq!(change.from, change.to);
        assert_eq!(store.write_count(), 0);
    }
}
