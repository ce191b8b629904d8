//! Crate-level error type.
//!
//! Stage errors (graph, cycle, leveling) are non-fatal and surface as
//! warnings in the run result; only the variants here abort an operation.

use thiserror::Error;

use crate::critical_path::CriticalPathError;
use crate::models::TaskStatus;
use crate::scheduler::SchedulerError;
use crate::store::PersistenceError;

#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid transition for task {task_id}: {from:?} -> {to:?} ({reason})")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
        reason: String,
    },

    #[error("No orchestration run available; call orchestrate first")]
    NoActiveRun,

    #[error("Orchestration cancelled")]
    Cancelled,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Orchestration service closed")]
    ServiceClosed,
}

pub type Result<T> = std::result::Result<T, OrchestrationError>;

impl From<CriticalPathError> for OrchestrationError {
    fn from(err: CriticalPathError) -> Self {
        match err {
            CriticalPathError::Cancelled => OrchestrationError::Cancelled,
        }
    }
}

impl From<SchedulerError> for OrchestrationError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Cancelled => OrchestrationError::Cancelled,
        }
    }
}
