//! Topological sorting for directed acyclic graphs.

use std::collections::VecDeque;

use crate::utils::graph::{GraphBase, NodeId, Predecessors, Successors};

/// Computes a topological ordering of all nodes of the graph with Kahn's algorithm.
///
/// Nodes with equal rank are emitted by ascending index, so the order is deterministic.
///
/// # Arguments
///
/// * `graph` - The graph to sort topologically
///
/// # Returns
///
/// `Some(order)` where every edge `(u, v)` has `u` before `v`, or `None` if the graph
/// contains a cycle.
///
/// # Complexity
///
/// - Time: O(V + E)
/// - Space: O(V)
pub fn topological_sort<G>(graph: &G) -> Option<Vec<NodeId>>
where
    G: GraphBase + Successors + Predecessors,
{
    let node_count = graph.node_count();
    let mut live = vec![false; node_count];
    let mut in_degree = vec![0usize; node_count];
    for node in graph.node_ids() {
        live[node.index()] = true;
        in_degree[node.index()] = graph.predecessors(node).count();
    }

    let mut queue: VecDeque<NodeId> = graph
        .node_ids()
        .filter(|n| in_degree[n.index()] == 0)
        .collect();
    let mut result = Vec::with_capacity(node_count);

    while let Some(node) = queue.pop_front() {
        result.push(node);
        for succ in graph.successors(node) {
            let degree = &mut in_degree[succ.index()];
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(succ);
            }
        }
    }

    if result.len() == live.iter().filter(|&&l| l).count() {
        Some(result)
    } else {
        None
    }
}
