//! Per-project orchestration engine.
//!
//! An [`Orchestrator`] owns the graph of its latest run. Collaborators are
//! injected at construction; nothing is global, so independent engines can
//! run side by side.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::cancel::CancelCheck;
use crate::config::{EngineConfig, SchedulingOptions};
use crate::conflict::{ConflictResolver, ResolutionAction, ResolutionReport};
use crate::critical_path::{calculate_critical_path, CriticalPathResult};
use crate::error::{OrchestrationError, Result};
use crate::events::{DomainEvent, NotificationSink};
use crate::graph::{
    analyze_dependencies, build_graph, detect_cycles, mark_cycles, topological_order, CycleError,
    GraphError, TaskGraph,
};
use crate::interner::NodeId;
use crate::metrics::{self, RunView};
use crate::models::{
    DependencyAnalysis, DependencyPair, OrchestrationResult, OrchestrationWarning, Recommendation,
    Severity, TaskRecord, TaskStatus, WarningKind,
};
use crate::propagation::{
    CompletionOutcome, CompletionPropagator, PropagationContext, StatusTransition,
};
use crate::resources::{ResourcePool, RoleCapacity};
use crate::scheduler::{resolve_windows, timing_inputs, ListScheduler, NodeWindow, ScheduleOutcome};
use crate::store::{Clock, DependencyStore, ResourceDirectory, TaskStore};

/// External collaborators of an engine.
#[derive(Clone)]
pub struct Collaborators {
    pub tasks: Arc<dyn TaskStore>,
    pub dependencies: Arc<dyn DependencyStore>,
    pub directory: Arc<dyn ResourceDirectory>,
    pub sink: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
}

/// Result of a completion signal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub task_id: String,
    pub triggered_tasks: Vec<String>,
    /// Present when the completion forced a critical-path recompute.
    pub updated_schedule: Option<OrchestrationResult>,
}

/// Result of a general status change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub task_id: String,
    pub from: TaskStatus,
    pub to: TaskStatus,
    /// Dependents auto-started when the change was a completion.
    pub triggered_tasks: Vec<String>,
    pub updated_schedule: Option<OrchestrationResult>,
}

/// Everything kept between operations on the same run.
struct RunState {
    graph: TaskGraph,
    order: Vec<NodeId>,
    cycles: Vec<Vec<NodeId>>,
    windows: Vec<NodeWindow>,
    options: SchedulingOptions,
    roles: Vec<RoleCapacity>,
    build_errors: Vec<GraphError>,
    timings: CriticalPathResult,
    schedule: ScheduleOutcome,
    pool: ResourcePool,
    propagator: CompletionPropagator,
    result: Option<OrchestrationResult>,
}

impl RunState {
    fn view(&self) -> RunView<'_> {
        RunView {
            graph: &self.graph,
            timings: &self.timings,
            schedule: &self.schedule,
            windows: &self.windows,
            pool: &self.pool,
            cycle_count: self.cycles.len(),
            risk_tolerance: self.options.risk_tolerance,
        }
    }
}

pub struct Orchestrator {
    project_id: String,
    collaborators: Collaborators,
    config: EngineConfig,
    run: Option<RunState>,
    last_critical: Option<Vec<String>>,
}

impl Orchestrator {
    pub fn new(project_id: impl Into<String>, collaborators: Collaborators, config: EngineConfig) -> Self {
        Self {
            project_id: project_id.into(),
            collaborators,
            config,
            run: None,
            last_critical: None,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Latest run result, if any.
    pub fn last_result(&self) -> Option<&OrchestrationResult> {
        self.run.as_ref().and_then(|r| r.result.as_ref())
    }

    /// Graph of the latest run.
    pub fn graph(&self) -> Option<&TaskGraph> {
        self.run.as_ref().map(|r| &r.graph)
    }

    /// Build, analyse and schedule the given tasks.
    pub fn orchestrate(
        &mut self,
        tasks: &[TaskRecord],
        dependencies: &[DependencyPair],
        options: SchedulingOptions,
    ) -> Result<OrchestrationResult> {
        self.run_orchestration(tasks, dependencies, options, None)
    }

    pub fn orchestrate_cancellable(
        &mut self,
        tasks: &[TaskRecord],
        dependencies: &[DependencyPair],
        options: SchedulingOptions,
        cancel: &CancellationToken,
    ) -> Result<OrchestrationResult> {
        self.run_orchestration(tasks, dependencies, options, Some(cancel))
    }

    /// Load the project's tasks and dependencies from the stores, then run.
    pub fn orchestrate_project(
        &mut self,
        options: SchedulingOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<OrchestrationResult> {
        let tasks = self.collaborators.tasks.tasks(&self.project_id)?;
        let dependencies = self.collaborators.dependencies.dependencies(&self.project_id)?;
        self.run_orchestration(&tasks, &dependencies, options, cancel)
    }

    fn run_orchestration(
        &mut self,
        tasks: &[TaskRecord],
        dependencies: &[DependencyPair],
        options: SchedulingOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<OrchestrationResult> {
        let verbosity = self.config.verbosity;
        let anchor = options.start_at.unwrap_or_else(|| self.collaborators.clock.now());
        log_changes!(
            verbosity,
            project_id = %self.project_id,
            tasks = tasks.len(),
            dependencies = dependencies.len(),
            "orchestration started"
        );

        let build = build_graph(tasks, dependencies, anchor);
        let mut graph = build.graph;
        let cycles = detect_cycles(&graph);
        for cycle in &cycles {
            tracing::warn!(project_id = %self.project_id, "{}", CycleError::from_ids(&graph, cycle));
        }
        mark_cycles(&mut graph, &cycles);
        let order = topological_order(&graph);
        let windows = resolve_windows(&graph, &options);
        let roles = self.collaborators.directory.roles();

        let mut run = RunState {
            pool: ResourcePool::new(&roles, &options, anchor),
            graph,
            order,
            cycles,
            windows,
            options,
            roles,
            build_errors: build.errors,
            timings: CriticalPathResult::default(),
            schedule: ScheduleOutcome::default(),
            propagator: CompletionPropagator::new(),
            result: None,
        };

        let result = self.plan(&mut run, 0.0, cancel)?;
        self.run = Some(run);
        Ok(result)
    }

    /// Critical path, scheduling, conflict resolution and reporting over the
    /// current graph. `now_offset` floors the start of unstarted work.
    fn plan(
        &mut self,
        run: &mut RunState,
        now_offset: f64,
        cancel: Option<&CancellationToken>,
    ) -> Result<OrchestrationResult> {
        let verbosity = self.config.verbosity;
        let check = CancelCheck::new(cancel, self.config.cancel_check_interval);

        let inputs = timing_inputs(&run.windows, now_offset);
        run.timings = calculate_critical_path(&mut run.graph, &run.order, &inputs, check)?;
        log_checks!(
            verbosity,
            critical = run.timings.critical.len(),
            horizon = run.timings.project_finish,
            "critical path computed"
        );

        run.pool = ResourcePool::new(&run.roles, &run.options, run.graph.anchor());
        run.schedule = ListScheduler::new(
            &run.graph,
            &run.timings,
            &run.windows,
            &run.options,
            &self.config,
            now_offset,
        )
        .schedule(&mut run.pool, check)?;

        let flagged = run.schedule.conflicts.clone();
        let report = ConflictResolver::new(
            &run.graph,
            &run.timings,
            &run.windows,
            &run.options,
            &self.config,
        )
        .resolve(&flagged, &mut run.schedule, &mut run.pool);
        self.publish_unresolved(&run.graph, &report);

        let mut warnings: Vec<OrchestrationWarning> =
            run.cycles.iter().map(|c| cycle_warning(&run.graph, c)).collect();
        warnings.extend(report.warnings.iter().cloned());

        let view = run.view();
        warnings.extend(metrics::schedule_warnings(&view));
        let resource_utilization = metrics::resource_utilization(&view);
        let metrics = metrics::compute_metrics(&view);

        let mut errors: Vec<String> = run.build_errors.iter().map(|e| e.to_string()).collect();
        errors.extend(
            report
                .escalated
                .iter()
                .map(|id| format!("Critical task {id} left on an overloaded resource")),
        );

        let critical_path: Vec<String> = run
            .timings
            .critical
            .iter()
            .map(|&id| run.graph.task_id(id).to_string())
            .collect();
        let estimated_completion = run.graph.at_offset(view.completion_offset());

        let result = OrchestrationResult {
            success: report.escalated.is_empty(),
            scheduled_tasks: run.schedule.scheduled.clone(),
            critical_path,
            estimated_completion,
            resource_utilization,
            warnings,
            errors,
            metrics,
            cycles: run
                .cycles
                .iter()
                .map(|c| c.iter().map(|&id| run.graph.task_id(id).to_string()).collect())
                .collect(),
        };

        self.publish_run_events(&result);
        log_changes!(
            verbosity,
            project_id = %self.project_id,
            success = result.success,
            scheduled = result.scheduled_tasks.len(),
            critical = result.critical_path.len(),
            completion = %result.estimated_completion,
            "orchestration finished"
        );

        run.result = Some(result.clone());
        Ok(result)
    }

    fn publish_unresolved(&self, graph: &TaskGraph, report: &ResolutionReport) {
        for resolution in &report.resolutions {
            if let ResolutionAction::Unresolved { reason } = &resolution.action {
                self.collaborators.sink.publish(DomainEvent::ConflictUnresolved {
                    project_id: self.project_id.clone(),
                    task_id: resolution.task_id.clone(),
                    critical: graph.get(&resolution.task_id).is_some_and(|n| n.critical_path),
                    reason: reason.clone(),
                });
            }
        }
    }

    fn publish_run_events(&mut self, result: &OrchestrationResult) {
        let sink = &self.collaborators.sink;
        for warning in result.warnings.iter().filter(|w| w.severity == Severity::Critical) {
            sink.publish(DomainEvent::CriticalWarning {
                project_id: self.project_id.clone(),
                warning: warning.clone(),
            });
        }

        if let Some(previous) = self.last_critical.take() {
            if previous != result.critical_path {
                sink.publish(DomainEvent::CriticalPathChanged {
                    project_id: self.project_id.clone(),
                    previous,
                    current: result.critical_path.clone(),
                    estimated_completion: result.estimated_completion,
                });
            }
        }
        self.last_critical = Some(result.critical_path.clone());

        sink.publish(DomainEvent::OrchestrationCompleted {
            project_id: self.project_id.clone(),
            scheduled: result.scheduled_tasks.len(),
            critical_path_length: result.critical_path.len(),
            estimated_completion: result.estimated_completion,
        });
    }

    /// Classify every task of the latest run.
    pub fn analyze_dependencies(&self) -> Result<Vec<DependencyAnalysis>> {
        let run = self.run.as_ref().ok_or(OrchestrationError::NoActiveRun)?;
        Ok(analyze_dependencies(&run.graph, &run.cycles))
    }

    /// Try to resolve the given conflicts against the latest schedule.
    pub fn resolve_conflicts(&mut self, task_ids: &[String]) -> Result<ResolutionReport> {
        let run = self.run.as_mut().ok_or(OrchestrationError::NoActiveRun)?;
        let report = ConflictResolver::new(
            &run.graph,
            &run.timings,
            &run.windows,
            &run.options,
            &self.config,
        )
        .resolve(task_ids, &mut run.schedule, &mut run.pool);

        if let Some(result) = run.result.as_mut() {
            result.scheduled_tasks = run.schedule.scheduled.clone();
        }
        let run = self.run.as_ref().ok_or(OrchestrationError::NoActiveRun)?;
        self.publish_unresolved(&run.graph, &report);
        Ok(report)
    }

    /// Prioritised resource, schedule, process and risk actions.
    pub fn get_recommendations(&self) -> Result<Vec<Recommendation>> {
        let run = self.run.as_ref().ok_or(OrchestrationError::NoActiveRun)?;
        let view = run.view();
        let utilization = metrics::resource_utilization(&view);
        Ok(metrics::recommendations(&view, &utilization))
    }

    fn propagation_context(&self) -> PropagationContext<'_> {
        PropagationContext {
            project_id: &self.project_id,
            store: self.collaborators.tasks.as_ref(),
            sink: self.collaborators.sink.as_ref(),
            now: self.collaborators.clock.now(),
            retries: self.config.propagation.persistence_retries,
            verbosity: self.config.verbosity,
        }
    }

    /// Apply a completion without recomputing; see [`Self::recompute_if_pending`].
    pub fn complete_task(&mut self, task_id: &str) -> Result<CompletionOutcome> {
        let mut run = self.run.take().ok_or(OrchestrationError::NoActiveRun)?;
        let outcome = run
            .propagator
            .complete(&self.propagation_context(), &mut run.graph, task_id);
        self.run = Some(run);
        outcome
    }

    /// Change a task's status. Completions propagate to dependents and may
    /// trigger a recompute; other changes only update the task.
    pub fn update_task_status(&mut self, task_id: &str, status: TaskStatus) -> Result<StatusUpdate> {
        let mut run = self.run.take().ok_or(OrchestrationError::NoActiveRun)?;
        let change: Result<StatusTransition> = run.propagator.transition(
            &self.propagation_context(),
            &mut run.graph,
            task_id,
            status,
        );
        self.run = Some(run);
        let change = change?;

        let updated_schedule = if change.completion.is_some() {
            self.recompute_if_pending(None)?
        } else {
            None
        };
        Ok(StatusUpdate {
            task_id: change.task_id,
            from: change.from,
            to: change.to,
            triggered_tasks: change.completion.map(|c| c.triggered).unwrap_or_default(),
            updated_schedule,
        })
    }

    /// Handle a completion signal end to end.
    pub fn on_task_completed(&mut self, task_id: &str) -> Result<CompletionReport> {
        let outcome = self.complete_task(task_id)?;
        let updated_schedule = self.recompute_if_pending(None)?;
        Ok(CompletionReport {
            task_id: outcome.task_id,
            triggered_tasks: outcome.triggered,
            updated_schedule,
        })
    }

    /// Recompute if a critical task completed since the last successful
    /// recompute. A failed or cancelled recompute leaves the request pending.
    pub fn recompute_if_pending(
        &mut self,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<OrchestrationResult>> {
        let run = self.run.as_ref().ok_or(OrchestrationError::NoActiveRun)?;
        if !run.propagator.recompute_pending() {
            return Ok(None);
        }
        self.recompute(cancel).map(Some)
    }

    pub fn recompute_pending(&self) -> bool {
        self.run.as_ref().is_some_and(|r| r.propagator.recompute_pending())
    }

    /// Recompute critical path and schedule from realised progress.
    pub fn recompute_critical_path(&mut self) -> Result<OrchestrationResult> {
        self.recompute(None)
    }

    pub fn recompute_cancellable(&mut self, cancel: &CancellationToken) -> Result<OrchestrationResult> {
        self.recompute(Some(cancel))
    }

    fn recompute(&mut self, cancel: Option<&CancellationToken>) -> Result<OrchestrationResult> {
        let mut run = self.run.take().ok_or(OrchestrationError::NoActiveRun)?;
        let now_offset = run.graph.offset_of(self.collaborators.clock.now()).max(0.0);
        log_changes!(self.config.verbosity, project_id = %self.project_id, now_offset, "recomputing critical path");
        let result = self.plan(&mut run, now_offset, cancel);
        if result.is_ok() {
            run.propagator.clear_recompute();
        }
        self.run = Some(run);
        result
    }
}

fn cycle_warning(graph: &TaskGraph, cycle: &[NodeId]) -> OrchestrationWarning {
    let err = CycleError::from_ids(graph, cycle);
    OrchestrationWarning {
        kind: WarningKind::DependencyLoop,
        severity: Severity::Critical,
        description: err.to_string(),
        affected_tasks: err.members,
        mitigation: vec![
            "Remove or invert one dependency in the loop".to_string(),
            "Review the workflow template that created it".to_string(),
        ],
    }
}
