//! Typed domain events and the publish-only sink they go through.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::OrchestrationWarning;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    CriticalPathChanged {
        project_id: String,
        previous: Vec<String>,
        current: Vec<String>,
        estimated_completion: DateTime<Utc>,
    },
    TaskReady {
        project_id: String,
        task_id: String,
        /// Task whose completion unlocked this one.
        unlocked_by: String,
        at: DateTime<Utc>,
    },
    ConflictUnresolved {
        project_id: String,
        task_id: String,
        critical: bool,
        reason: String,
    },
    OrchestrationCompleted {
        project_id: String,
        scheduled: usize,
        critical_path_length: usize,
        estimated_completion: DateTime<Utc>,
    },
    CriticalWarning {
        project_id: String,
        warning: OrchestrationWarning,
    },
}

impl DomainEvent {
    pub fn project_id(&self) -> &str {
        match self {
            Self::CriticalPathChanged { project_id, .. }
            | Self::TaskReady { project_id, .. }
            | Self::ConflictUnresolved { project_id, .. }
            | Self::OrchestrationCompleted { project_id, .. }
            | Self::CriticalWarning { project_id, .. } => project_id,
        }
    }
}

/// Publish-only delivery of domain events. Implementations must not block
/// for long; the engine publishes from inside a run.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: DomainEvent);
}

/// Logs every event and drops it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn publish(&self, event: DomainEvent) {
        tracing::info!(project_id = event.project_id(), ?event, "domain event");
    }
}

/// Keeps every published event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Ids of every task announced as ready, in publish order.
    pub fn ready_tasks(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DomainEvent::TaskReady { task_id, .. } => Some(task_id),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl NotificationSink for RecordingSink {
    fn publish(&self, event: DomainEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink() {
        let sink = RecordingSink::new();
        sink.publish(DomainEvent::TaskReady {
            project_id: "p".to_string(),
            task_id: "b".to_string(),
            unlocked_by: "a".to_string(),
            at: Utc::now(),
        });
        sink.publish(DomainEvent::ConflictUnresolved {
            project_id: "p".to_string(),
            task_id: "c".to_string(),
            critical: true,
            reason: "no capacity".to_string(),
        });

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.ready_tasks(), vec!["b".to_string()]);
        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = DomainEvent::ConflictUnresolved {
            project_id: "p".to_string(),
            task_id: "c".to_string(),
            critical: false,
            reason: "no capacity".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "conflict_unresolved");
        assert_eq!(event.project_id(), "p");
    }
}
