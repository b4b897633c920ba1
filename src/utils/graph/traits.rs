//! Trait definitions for graph abstractions.
//!
//! By programming against these traits, traversal and dominator algorithms are shared
//! between the control-flow graph and the inliner's call graph.

use crate::utils::graph::NodeId;

/// Base trait providing core graph properties.
pub trait GraphBase {
    /// Returns an upper bound on node indices: every valid [`NodeId`] has
    /// `index() < node_count()`.
    fn node_count(&self) -> usize;

    /// Returns an iterator over all live node identifiers, by ascending index.
    fn node_ids(&self) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs that support forward edge traversal.
pub trait Successors: GraphBase {
    /// Returns an iterator over the successor nodes of the given node.
    ///
    /// A node reached through several parallel edges may be yielded more than once.
    ///
    /// # Arguments
    ///
    /// * `node` - The node whose successors to iterate
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs that support backward edge traversal.
pub trait Predecessors: GraphBase {
    /// Returns an iterator over the predecessor nodes of the given node.
    ///
    /// # Arguments
    ///
    /// * `node` - The node whose predecessors to iterate
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs with a designated entry node.
///
/// Required for dominator computation, where all dominance relations are relative to the
/// entry.
pub trait RootedGraph: Successors + Predecessors {
    /// Returns the entry node of the graph.
    fn entry(&self) -> NodeId;
}
