//! Per-task dependency classification.

use crate::interner::NodeId;
use crate::models::{ConstraintType, DependencyAnalysis, DependencyType};

use super::TaskGraph;

/// Classify every task's place in the graph.
///
/// A task under a regulatory constraint is `Regulatory`; one that shares its
/// resource with a prerequisite is `Resource`; everything else is `Hard`.
/// Critical dependencies are prerequisites on the critical path, optional
/// ones are prerequisites with positive slack. Timings must be current.
pub fn analyze_dependencies(graph: &TaskGraph, cycles: &[Vec<NodeId>]) -> Vec<DependencyAnalysis> {
    graph
        .nodes()
        .map(|node| {
            let names = |ids: &[NodeId]| -> Vec<String> {
                ids.iter().map(|&id| graph.task_id(id).to_string()).collect()
            };

            let regulatory = node
                .constraints
                .iter()
                .any(|c| c.kind == ConstraintType::Regulatory);
            let shares_resource = node.primary_resource().is_some_and(|own| {
                node.dependencies
                    .iter()
                    .any(|&dep| graph.node(dep).primary_resource() == Some(own))
            });
            let dependency_type = if regulatory {
                DependencyType::Regulatory
            } else if shares_resource {
                DependencyType::Resource
            } else {
                DependencyType::Hard
            };

            let critical: Vec<NodeId> = node
                .dependencies
                .iter()
                .copied()
                .filter(|&dep| graph.node(dep).critical_path)
                .collect();
            let optional: Vec<NodeId> = node
                .dependencies
                .iter()
                .copied()
                .filter(|&dep| graph.node(dep).slack_hours > 0.0)
                .collect();

            DependencyAnalysis {
                task_id: node.task_id().to_string(),
                dependency_type,
                prerequisite_tasks: names(&node.dependencies[..]),
                blocked_tasks: names(&node.dependents[..]),
                circular_dependencies: cycles
                    .iter()
                    .filter(|cycle| cycle.contains(&node.id))
                    .map(|cycle| names(cycle.as_slice()))
                    .collect(),
                critical_dependencies: names(&critical[..]),
                optional_dependencies: names(&optional[..]),
            }
        })
        .collect()
}
