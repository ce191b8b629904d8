//! Async front end: one engine actor per project.
//!
//! Each project gets its own tokio task that owns an [`Orchestrator`] and
//! serves commands in arrival order, so operations on one project never
//! interleave while different projects proceed in parallel. Algorithmic work
//! runs on the blocking pool. Completion signals arriving within the debounce
//! window of each other are applied together and followed by a single
//! critical-path recompute.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::{EngineConfig, SchedulingOptions};
use crate::conflict::ResolutionReport;
use crate::engine::{Collaborators, CompletionReport, Orchestrator, StatusUpdate};
use crate::error::{OrchestrationError, Result};
use crate::models::{
    DependencyAnalysis, DependencyPair, OrchestrationResult, Recommendation, TaskRecord,
    TaskStatus,
};

const COMMAND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Orchestrate {
        tasks: Vec<TaskRecord>,
        dependencies: Vec<DependencyPair>,
        options: SchedulingOptions,
        reply: Reply<OrchestrationResult>,
    },
    OrchestrateProject {
        options: SchedulingOptions,
        reply: Reply<OrchestrationResult>,
    },
    Complete {
        task_id: String,
        reply: Reply<CompletionReport>,
    },
    UpdateStatus {
        task_id: String,
        status: TaskStatus,
        reply: Reply<StatusUpdate>,
    },
    ResolveConflicts {
        task_ids: Vec<String>,
        reply: Reply<ResolutionReport>,
    },
    Analyze {
        reply: Reply<Vec<DependencyAnalysis>>,
    },
    Recommendations {
        reply: Reply<Vec<Recommendation>>,
    },
    Recompute {
        reply: Reply<OrchestrationResult>,
    },
}

pub struct OrchestrationService {
    collaborators: Collaborators,
    config: EngineConfig,
    actors: Mutex<HashMap<String, mpsc::Sender<Command>>>,
    shutdown: CancellationToken,
}

impl OrchestrationService {
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Self {
        Self {
            collaborators,
            config,
            actors: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop every actor and cancel in-flight runs. Later calls fail with
    /// [`OrchestrationError::ServiceClosed`].
    pub fn shutdown(&self) {
        tracing::info!("orchestration service shutting down");
        self.shutdown.cancel();
        if let Ok(mut actors) = self.actors.lock() {
            actors.clear();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub async fn orchestrate(
        &self,
        project_id: &str,
        tasks: Vec<TaskRecord>,
        dependencies: Vec<DependencyPair>,
        options: SchedulingOptions,
    ) -> Result<OrchestrationResult> {
        self.request(project_id, |reply| Command::Orchestrate {
            tasks,
            dependencies,
            options,
            reply,
        })
        .await
    }

    pub async fn orchestrate_project(
        &self,
        project_id: &str,
        options: SchedulingOptions,
    ) -> Result<OrchestrationResult> {
        self.request(project_id, |reply| Command::OrchestrateProject { options, reply })
            .await
    }

    pub async fn on_task_completed(&self, project_id: &str, task_id: &str) -> Result<CompletionReport> {
        let task_id = task_id.to_string();
        self.request(project_id, |reply| Command::Complete { task_id, reply })
            .await
    }

    pub async fn update_task_status(
        &self,
        project_id: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<StatusUpdate> {
        let task_id = task_id.to_string();
        self.request(project_id, |reply| Command::UpdateStatus {
            task_id,
            status,
            reply,
        })
        .await
    }

    pub async fn resolve_conflicts(
        &self,
        project_id: &str,
        task_ids: Vec<String>,
    ) -> Result<ResolutionReport> {
        self.request(project_id, |reply| Command::ResolveConflicts { task_ids, reply })
            .await
    }

    pub async fn analyze_dependencies(&self, project_id: &str) -> Result<Vec<DependencyAnalysis>> {
        self.request(project_id, |reply| Command::Analyze { reply }).await
    }

    pub async fn get_recommendations(&self, project_id: &str) -> Result<Vec<Recommendation>> {
        self.request(project_id, |reply| Command::Recommendations { reply })
            .await
    }

    pub async fn recompute_critical_path(&self, project_id: &str) -> Result<OrchestrationResult> {
        self.request(project_id, |reply| Command::Recompute { reply }).await
    }

    async fn request<T>(
        &self,
        project_id: &str,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T> {
        let actor = self.actor(project_id)?;
        let (reply, response) = oneshot::channel();
        actor
            .send(command(reply))
            .await
            .map_err(|_| OrchestrationError::ServiceClosed)?;
        response.await.map_err(|_| OrchestrationError::ServiceClosed)?
    }

    /// Sender for the project's actor, spawning it on first use.
    fn actor(&self, project_id: &str) -> Result<mpsc::Sender<Command>> {
        if self.shutdown.is_cancelled() {
            return Err(OrchestrationError::ServiceClosed);
        }
        let mut actors = self
            .actors
            .lock()
            .map_err(|_| OrchestrationError::ServiceClosed)?;
        if let Some(tx) = actors.get(project_id).filter(|tx| !tx.is_closed()) {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let engine = Orchestrator::new(project_id, self.collaborators.clone(), self.config.clone());
        tokio::spawn(run_actor(
            engine,
            rx,
            self.shutdown.child_token(),
            self.config.propagation.debounce,
        ));
        actors.insert(project_id.to_string(), tx.clone());
        Ok(tx)
    }
}

impl Drop for OrchestrationService {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Run `op` against the engine on the blocking pool and hand the engine back.
async fn on_engine<T, F>(engine: Orchestrator, op: F) -> Option<(Orchestrator, T)>
where
    T: Send + 'static,
    F: FnOnce(&mut Orchestrator) -> T + Send + 'static,
{
    let joined = tokio::task::spawn_blocking(move || {
        let mut engine = engine;
        let out = op(&mut engine);
        (engine, out)
    })
    .await;
    match joined {
        Ok(pair) => Some(pair),
        Err(err) => {
            tracing::error!(error = %err, "engine task failed");
            None
        }
    }
}

async fn run_actor(
    mut engine: Orchestrator,
    mut rx: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
    debounce: Duration,
) {
    let project_id = engine.project_id().to_string();
    tracing::debug!(project_id = %project_id, "project actor started");
    let mut stashed: Option<Command> = None;

    loop {
        let command = match stashed.take() {
            Some(command) => command,
            None => tokio::select! {
                _ = shutdown.cancelled() => break,
                received = rx.recv() => match received {
                    Some(command) => command,
                    None => break,
                },
            },
        };

        let run = shutdown.child_token();
        let next = match command {
            Command::Complete { task_id, reply } => {
                let mut burst = vec![(task_id, reply)];
                loop {
                    match tokio::time::timeout(debounce, rx.recv()).await {
                        Ok(Some(Command::Complete { task_id, reply })) => burst.push((task_id, reply)),
                        Ok(Some(other)) => {
                            stashed = Some(other);
                            break;
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
                tracing::debug!(project_id = %project_id, completions = burst.len(), "completion burst");
                complete_burst(engine, burst, run).await
            }
            Command::Orchestrate {
                tasks,
                dependencies,
                options,
                reply,
            } => {
                respond(engine, reply, move |e| {
                    e.orchestrate_cancellable(&tasks, &dependencies, options, &run)
                })
                .await
            }
            Command::OrchestrateProject { options, reply } => {
                respond(engine, reply, move |e| e.orchestrate_project(options, Some(&run))).await
            }
            Command::UpdateStatus {
                task_id,
                status,
                reply,
            } => respond(engine, reply, move |e| e.update_task_status(&task_id, status)).await,
            Command::ResolveConflicts { task_ids, reply } => {
                respond(engine, reply, move |e| e.resolve_conflicts(&task_ids)).await
            }
            Command::Analyze { reply } => respond(engine, reply, |e| e.analyze_dependencies()).await,
            Command::Recommendations { reply } => {
                respond(engine, reply, |e| e.get_recommendations()).await
            }
            Command::Recompute { reply } => {
                respond(engine, reply, move |e| e.recompute_cancellable(&run)).await
            }
        };

        match next {
            Some(e) => engine = e,
            None => break,
        }
    }

    tracing::debug!(project_id = %project_id, "project actor stopped");
}

async fn respond<T, F>(engine: Orchestrator, reply: Reply<T>, op: F) -> Option<Orchestrator>
where
    T: Send + 'static,
    F: FnOnce(&mut Orchestrator) -> Result<T> + Send + 'static,
{
    let (engine, out) = on_engine(engine, op).await?;
    // The caller may have stopped waiting.
    let _ = reply.send(out);
    Some(engine)
}

/// Apply every completion of a burst, then recompute at most once.
async fn complete_burst(
    engine: Orchestrator,
    burst: Vec<(String, Reply<CompletionReport>)>,
    run: CancellationToken,
) -> Option<Orchestrator> {
    let (ids, replies): (Vec<String>, Vec<Reply<CompletionReport>>) = burst.into_iter().unzip();
    let (engine, (outcomes, updated)) = on_engine(engine, move |e| {
        let outcomes: Vec<_> = ids.iter().map(|id| e.complete_task(id)).collect();
        let updated = match e.recompute_if_pending(Some(&run)) {
            Ok(updated) => updated,
            Err(err) => {
                tracing::warn!(project_id = e.project_id(), error = %err, "recompute after completions failed, still pending");
                None
            }
        };
        (outcomes, updated)
    })
    .await?;

    for (outcome, reply) in outcomes.into_iter().zip(replies) {
        let report = outcome.map(|o| CompletionReport {
            task_id: o.task_id,
            triggered_tasks: o.triggered,
            updated_schedule: updated.clone(),
        });
        let _ = reply.send(report);
    }
    Some(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DomainEvent, RecordingSink};
    use crate::store::{FixedClock, InMemoryDependencyStore, InMemoryTaskStore, StaticDirectory};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    type Project = (&'static str, Vec<TaskRecord>, Vec<DependencyPair>);

    fn service_for(
        projects: Vec<Project>,
    ) -> (OrchestrationService, Arc<InMemoryTaskStore>, Arc<RecordingSink>) {
        let store = Arc::new(InMemoryTaskStore::new());
        let dependencies = Arc::new(InMemoryDependencyStore::new());
        for (project_id, tasks, deps) in projects {
            store.insert_project(project_id, tasks);
            dependencies.insert_project(project_id, deps);
        }
        let sink = Arc::new(RecordingSink::new());
        let collaborators = Collaborators {
            tasks: store.clone(),
            dependencies,
            directory: Arc::new(StaticDirectory::professional_defaults()),
            sink: sink.clone(),
            clock: Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap())),
        };
        (OrchestrationService::new(collaborators, EngineConfig::default()), store, sink)
    }

    fn service(tasks: Vec<TaskRecord>, deps: Vec<DependencyPair>) -> (OrchestrationService, Arc<RecordingSink>) {
        let (svc, _store, sink) = service_for(vec![("p1", tasks, deps)]);
        (svc, sink)
    }

    fn two_chains() -> (Vec<TaskRecord>, Vec<DependencyPair>) {
        (
            vec![
                TaskRecord::new("a", 2.0),
                TaskRecord::new("b", 3.0),
                TaskRecord::new("x", 5.0),
            ],
            vec![DependencyPair::new("a", "b")],
        )
    }

    fn completed_runs(sink: &RecordingSink) -> usize {
        sink.events()
            .iter()
            .filter(|e| matches!(e, DomainEvent::OrchestrationCompleted { .. }))
            .count()
    }

    #[tokio::test]
    async fn test_project_roundtrip() {
        let (tasks, deps) = two_chains();
        let (svc, sink) = service(tasks, deps);
        let result = svc.orchestrate_project("p1", SchedulingOptions::default()).await.unwrap();
        assert_eq!(result.scheduled_tasks.len(), 3);

        let report = svc.on_task_completed("p1", "a").await.unwrap();
        assert_eq!(report.triggered_tasks, vec!["b".to_string()]);
        assert!(report.updated_schedule.is_some());
        assert_eq!(sink.ready_tasks(), vec!["b".to_string()]);

        let analyses = svc.analyze_dependencies("p1").await.unwrap();
        assert_eq!(analyses.len(), 3);
    }

    #[tokio::test]
    async fn test_completion_burst_recomputes_once() {
        let (tasks, deps) = two_chains();
        let (svc, sink) = service(tasks.clone(), deps.clone());
        svc.orchestrate("p1", tasks, deps, SchedulingOptions::default())
            .await
            .unwrap();
        assert_eq!(completed_runs(&sink), 1);

        let (first, second) = tokio::join!(
            svc.on_task_completed("p1", "a"),
            svc.on_task_completed("p1", "x"),
        );
        let first = first.unwrap();
        let second = second.unwrap();
        assert_eq!(first.triggered_tasks, vec!["b".to_string()]);
        assert!(second.triggered_tasks.is_empty());
        assert_eq!(first.updated_schedule, second.updated_schedule);
        assert_eq!(completed_runs(&sink), 2);
    }

    #[tokio::test]
    async fn test_errors_reach_the_caller() {
        let (tasks, deps) = two_chains();
        let (svc, _sink) = service(tasks.clone(), deps.clone());
        assert!(matches!(
            svc.analyze_dependencies("p1").await,
            Err(OrchestrationError::NoActiveRun)
        ));

        svc.orchestrate("p1", tasks, deps, SchedulingOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            svc.on_task_completed("p1", "b").await,
            Err(OrchestrationError::InvalidTransition { .. })
        ));
        assert!(matches!(
            svc.on_task_completed("p1", "ghost").await,
            Err(OrchestrationError::TaskNotFound(_))
        ));
        assert!(matches!(
            svc.get_recommendations("p2").await,
            Err(OrchestrationError::NoActiveRun)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_closes_service() {
        let (tasks, deps) = two_chains();
        let (svc, _sink) = service(tasks.clone(), deps.clone());
        svc.orchestrate("p1", tasks.clone(), deps.clone(), SchedulingOptions::default())
            .await
            .unwrap();

        svc.shutdown();
        assert!(svc.is_shut_down());
        assert!(matches!(
            svc.orchestrate("p1", tasks, deps, SchedulingOptions::default()).await,
            Err(OrchestrationError::ServiceClosed)
        ));
    }

    #[tokio::test]
    async fn test_projects_with_shared_task_ids_stay_apart() {
        let (tasks, deps) = two_chains();
        let mut survey_first = tasks.clone();
        survey_first.push(TaskRecord::new("survey", 1.0));
        let second = vec![
            TaskRecord::new("survey", 4.0),
            TaskRecord::new("valuation", 2.0),
        ];
        let (svc, store, _sink) = service_for(vec![
            ("p1", survey_first, deps),
            ("p2", second, vec![DependencyPair::new("survey", "valuation")]),
        ]);

        let (one, two) = tokio::join!(
            svc.orchestrate_project("p1", SchedulingOptions::default()),
            svc.orchestrate_project("p2", SchedulingOptions::default()),
        );
        assert_eq!(one.unwrap().scheduled_tasks.len(), 4);
        assert_eq!(two.unwrap().scheduled_tasks.len(), 2);

        let report = svc.on_task_completed("p1", "survey").await.unwrap();
        assert!(report.triggered_tasks.is_empty());
        assert_eq!(store.status("p1", "survey"), Some(TaskStatus::Completed));
        assert_eq!(store.status("p2", "survey"), Some(TaskStatus::Pending));

        assert_eq!(svc.analyze_dependencies("p1").await.unwrap().len(), 4);
        assert_eq!(svc.analyze_dependencies("p2").await.unwrap().len(), 2);

        let started = svc
            .update_task_status("p2", "survey", TaskStatus::InProgress)
            .await
            .unwrap();
        assert_eq!(started.to, TaskStatus::InProgress);
        assert_eq!(store.status("p1", "survey"), Some(TaskStatus::Completed));
        assert_eq!(store.status("p2", "survey"), Some(TaskStatus::InProgress));
        assert!(matches!(
            svc.update_task_status("p2", "valuation", TaskStatus::InProgress).await,
            Err(OrchestrationError::InvalidTransition { .. })
        ));
    }
}
