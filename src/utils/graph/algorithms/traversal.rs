//! Depth-first traversal orders.

use crate::utils::graph::{NodeId, Successors};

/// Computes the postorder traversal of nodes reachable from `start`.
///
/// A node is emitted after all of its successors have been emitted (back edges aside).
/// Successors are explored in the order the graph yields them.
///
/// # Arguments
///
/// * `graph` - The graph to traverse
/// * `start` - The starting node for traversal
///
/// # Returns
///
/// A vector of `NodeId` in postorder; empty if `start` is out of range.
///
/// # Examples
///
/// ```rust,ignore
/// let order = postorder(&cfg, cfg.entry_node());
/// // the entry block is always last
/// assert_eq!(order.last(), Some(&cfg.entry_node()));
/// ```
#[allow(clippy::items_after_statements)]
pub fn postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let node_count = graph.node_count();
    if start.index() >= node_count {
        return Vec::new();
    }

    let mut visited = vec![false; node_count];
    let mut result = Vec::with_capacity(node_count);

    #[derive(Clone, Copy)]
    enum State {
        Enter,
        Exit,
    }

    let mut stack = vec![(start, State::Enter)];
    while let Some((node, state)) = stack.pop() {
        match state {
            State::Enter => {
                if visited[node.index()] {
                    continue;
                }
                visited[node.index()] = true;
                stack.push((node, State::Exit));

                let successors: Vec<NodeId> = graph.successors(node).collect();
                for &succ in successors.iter().rev() {
                    if !visited[succ.index()] {
                        stack.push((succ, State::Enter));
                    }
                }
            }
            State::Exit => result.push(node),
        }
    }

    result
}

/// Computes the reverse postorder traversal of nodes reachable from `start`.
///
/// Reverse postorder is the preferred iteration order for forward dataflow analyses: in an
/// acyclic region every node comes after all of its predecessors.
///
/// # Arguments
///
/// * `graph` - The graph to traverse
/// * `start` - The starting node for traversal
pub fn reverse_postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut result = postorder(graph, start);
    result.reverse();
    result
}
