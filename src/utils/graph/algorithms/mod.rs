//! Graph algorithms.
//!
//! - [`postorder`] / [`reverse_postorder`] - depth-first orders from a start node
//! - [`immediate_dominators`] - iterative dominator computation over reverse postorder
//! - [`topological_sort`] - Kahn's algorithm; `None` on cyclic graphs

mod dominators;
mod topological;
mod traversal;

pub use dominators::immediate_dominators;
pub use topological::topological_sort;
pub use traversal::{postorder, reverse_postorder};
