//! Graph abstractions and algorithms.
//!
//! Algorithms in [`algorithms`] are written against the small trait hierarchy in this
//! module rather than against a concrete graph type:
//!
//! - [`GraphBase`] - node count and node iteration
//! - [`Successors`] / [`Predecessors`] - adjacency queries
//! - [`RootedGraph`] - graphs with a designated entry node
//!
//! The control-flow graph implements all four over its block ids; the inliner's
//! caller/callee graph implements them over method nodes.

pub mod algorithms;
mod node;
mod traits;

pub use node::NodeId;
pub use traits::{GraphBase, Predecessors, RootedGraph, Successors};
