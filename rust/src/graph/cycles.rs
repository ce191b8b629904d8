//! Circular dependency detection.

use thiserror::Error;

use crate::interner::NodeId;

use super::TaskGraph;

/// A circular dependency chain, in traversal order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Circular dependency: {}", members.join(" -> "))]
pub struct CycleError {
    pub members: Vec<String>,
}

impl CycleError {
    pub fn from_ids(graph: &TaskGraph, ids: &[NodeId]) -> Self {
        Self {
            members: ids.iter().map(|&id| graph.task_id(id).to_string()).collect(),
        }
    }
}

/// Find circular dependency chains.
///
/// Depth-first over the dependency (parent) direction with an explicit
/// recursion stack. Reaching a node that is still on the stack yields the
/// stack slice from that node's first occurrence. A self-dependency is a
/// one-node cycle. Each node is expanded at most once, so this is
/// O(nodes + edges).
pub fn detect_cycles(graph: &TaskGraph) -> Vec<Vec<NodeId>> {
    let n = graph.len();
    let mut visited = vec![false; n];
    let mut on_stack = vec![false; n];
    // Position of each on-stack node within `path`.
    let mut position = vec![usize::MAX; n];
    let mut path: Vec<NodeId> = Vec::new();
    // Frames: (node, index of next dependency to explore).
    let mut frames: Vec<(NodeId, usize)> = Vec::new();
    let mut cycles = Vec::new();

    for root in 0..n as NodeId {
        if visited[root as usize] {
            continue;
        }

        visited[root as usize] = true;
        on_stack[root as usize] = true;
        position[root as usize] = path.len();
        path.push(root);
        frames.push((root, 0));

        while let Some(frame) = frames.last_mut() {
            let (node, next) = *frame;
            let deps = &graph.node(node).dependencies;

            if next < deps.len() {
                frame.1 += 1;
                let dep = deps[next];
                let idx = dep as usize;
                if on_stack[idx] {
                    cycles.push(path[position[idx]..].to_vec());
                } else if !visited[idx] {
                    visited[idx] = true;
                    on_stack[idx] = true;
                    position[idx] = path.len();
                    path.push(dep);
                    frames.push((dep, 0));
                }
            } else {
                frames.pop();
                path.pop();
                on_stack[node as usize] = false;
                position[node as usize] = usize::MAX;
            }
        }
    }

    cycles
}

/// Flag every cycle member so later stages can exclude it.
pub fn mark_cycles(graph: &mut TaskGraph, cycles: &[Vec<NodeId>]) {
    for cycle in cycles {
        for &id in cycle {
            graph.node_mut(id).in_cycle = true;
        }
    }
}
