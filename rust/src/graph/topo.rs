//! Topological ordering.

use crate::interner::NodeId;

use super::TaskGraph;

/// Order nodes so every active parent precedes its children.
///
/// Reverse DFS postorder over the dependents direction. Disconnected
/// subgraphs are handled by restarting from every unvisited node; the result
/// is only a partial order across components. Edges between cycle members
/// are skipped, which keeps the order well defined once cycles are marked.
pub fn topological_order(graph: &TaskGraph) -> Vec<NodeId> {
    let n = graph.len();
    let mut visited = vec![false; n];
    let mut postorder: Vec<NodeId> = Vec::with_capacity(n);
    let mut frames: Vec<(NodeId, usize)> = Vec::new();

    for root in 0..n as NodeId {
        if visited[root as usize] {
            continue;
        }
        visited[root as usize] = true;
        frames.push((root, 0));

        while let Some(frame) = frames.last_mut() {
            let (node, next) = *frame;
            let children = &graph.node(node).dependents;

            if next < children.len() {
                frame.1 += 1;
                let child = children[next];
                if !visited[child as usize] && graph.edge_active(node, child) {
                    visited[child as usize] = true;
                    frames.push((child, 0));
                }
            } else {
                frames.pop();
                postorder.push(node);
            }
        }
    }

    postorder.reverse();
    postorder
}
