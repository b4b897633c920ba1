//! Generic utilities shared across the crate.
//!
//! - [`BitSet`] - dense bit vectors for reachability and liveness sets
//! - [`graph`] - graph traits and algorithms (traversal orders, dominators, topological
//!   sorting) that work on any type implementing the traits, including the control-flow
//!   graph and the caller/callee graph of the inliner

mod bitset;
pub mod graph;

pub use bitset::{BitSet, BitSetIter};
