//! Graph construction from flat task and dependency lists.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::interner::{NodeId, TaskIdInterner};
use crate::models::{
    ConstraintImpact, ConstraintType, DependencyPair, ResourceRequirement, ResourceType,
    TaskConstraint, TaskRecord,
};

use super::{TaskGraph, TaskNode};

/// Non-fatal problems found while building the graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Dependency {parent} -> {child} references unknown task {missing}")]
    UnknownTask {
        parent: String,
        child: String,
        missing: String,
    },
    #[error("Duplicate task id {0}; keeping the first record")]
    DuplicateTask(String),
}

/// A built graph together with the skipped inputs.
#[derive(Debug)]
pub struct GraphBuild {
    pub graph: TaskGraph,
    pub errors: Vec<GraphError>,
}

/// Build the dependency graph.
///
/// Unknown task references are skipped and reported; duplicate edges collapse
/// to one. A self-dependency is kept as an edge so the cycle detector can
/// report it.
pub fn build_graph(
    tasks: &[TaskRecord],
    dependencies: &[DependencyPair],
    anchor: DateTime<Utc>,
) -> GraphBuild {
    let mut index = TaskIdInterner::with_capacity(tasks.len());
    let mut nodes: Vec<TaskNode> = Vec::with_capacity(tasks.len());
    let mut errors = Vec::new();

    for task in tasks {
        let (id, fresh) = index.intern(&task.id);
        if !fresh {
            tracing::warn!(task_id = %task.id, "duplicate task id skipped");
            errors.push(GraphError::DuplicateTask(task.id.clone()));
            continue;
        }
        nodes.push(TaskNode {
            id,
            task: task.clone(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
            estimated_start: anchor,
            estimated_end: anchor,
            slack_hours: 0.0,
            critical_path: false,
            in_cycle: false,
            resource_requirements: resource_requirements(task),
            constraints: task_constraints(task),
        });
    }

    let mut seen: FxHashSet<(NodeId, NodeId)> = FxHashSet::default();
    for dep in dependencies {
        let (parent, child) = match (index.get(&dep.parent), index.get(&dep.child)) {
            (Some(p), Some(c)) => (p, c),
            (p, _) => {
                let missing = if p.is_none() { &dep.parent } else { &dep.child };
                tracing::warn!(
                    parent = %dep.parent,
                    child = %dep.child,
                    missing = %missing,
                    "dependency references unknown task; skipped"
                );
                errors.push(GraphError::UnknownTask {
                    parent: dep.parent.clone(),
                    child: dep.child.clone(),
                    missing: missing.clone(),
                });
                continue;
            }
        };

        if !seen.insert((parent, child)) {
            continue;
        }
        nodes[child as usize].dependencies.push(parent);
        nodes[parent as usize].dependents.push(child);
    }

    GraphBuild {
        graph: TaskGraph::from_parts(index, nodes, anchor),
        errors,
    }
}

/// Every task with an assigned role needs one unit of that professional.
fn resource_requirements(task: &TaskRecord) -> Vec<ResourceRequirement> {
    match &task.assigned_role {
        Some(role) => vec![ResourceRequirement {
            resource_type: ResourceType::Professional,
            resource_id: role.clone(),
            quantity: 1,
            duration_hours: task.duration_hours,
            availability: Vec::new(),
        }],
        None => Vec::new(),
    }
}

fn task_constraints(task: &TaskRecord) -> Vec<TaskConstraint> {
    let mut constraints = task.constraints.clone();

    if task.template_category.as_deref() == Some("legal") {
        constraints.push(TaskConstraint {
            kind: ConstraintType::Regulatory,
            description: "Legal compliance required".to_string(),
            impact: ConstraintImpact::Blocking,
            resolution: vec![
                "Legal review".to_string(),
                "Compliance verification".to_string(),
            ],
            deadline: task.deadline,
        });
    }

    if let Some(deadline) = task.deadline {
        constraints.push(TaskConstraint {
            kind: ConstraintType::Time,
            description: format!("Due by {}", deadline.to_rfc3339()),
            impact: ConstraintImpact::Delaying,
            resolution: vec!["Add buffer time".to_string()],
            deadline: Some(deadline),
        });
    }

    constraints
}
