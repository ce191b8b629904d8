//! Task orchestration engine for property-development workflows.
//!
//! Builds a dependency graph from task records, finds circular dependencies
//! and the critical path, levels professional-role capacity with delays and
//! reassignments, and keeps the plan current as completions arrive.
//!
//! [`engine::Orchestrator`] is the synchronous core for one project;
//! [`service::OrchestrationService`] runs one orchestrator actor per project
//! on tokio.

#[macro_use]
pub mod logging;

pub mod cancel;
pub mod config;
pub mod conflict;
pub mod critical_path;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod interner;
pub mod metrics;
pub mod models;
pub mod propagation;
pub mod resources;
pub mod scheduler;
pub mod service;
pub mod store;

pub use config::{
    EngineConfig, LevelingConfig, ParallelizationLevel, PropagationConfig, ResourceConstraint,
    RiskTolerance, SchedulingOptions, TimeConstraint, TimeConstraintKind,
};
pub use conflict::{ConflictResolution, ResolutionAction, ResolutionReport};
pub use engine::{Collaborators, CompletionReport, Orchestrator, StatusUpdate};
pub use error::{OrchestrationError, Result};
pub use events::{DomainEvent, NotificationSink, RecordingSink, TracingSink};
pub use logging::init_logging;
pub use models::{
    DependencyAnalysis, DependencyPair, DependencyType, OrchestrationMetrics,
    OrchestrationResult, OrchestrationWarning, Recommendation, ScheduledTask, Severity,
    TaskRecord, TaskStatus, WarningKind,
};
pub use propagation::StatusTransition;
pub use resources::RoleCapacity;
pub use service::OrchestrationService;
pub use store::{
    Clock, DependencyStore, FixedClock, InMemoryDependencyStore, InMemoryTaskStore,
    PersistenceError, ResourceDirectory, StaticDirectory, SystemClock, TaskStore,
};
