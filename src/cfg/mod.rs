//! Editable control-flow graphs of method bodies.
//!
//! A [`ControlFlowGraph`] is built from linear code with [`ControlFlowGraph::build`], edited
//! through the mutation API, canonicalized with [`ControlFlowGraph::simplify`] and lowered
//! back with [`ControlFlowGraph::linearize`]. Branch targets, gotos and try/catch markers
//! live on typed [`Edge`]s rather than in the blocks.
//!
//! # Key Components
//!
//! - [`ControlFlowGraph`] - Block and edge arenas, read-side queries, sanity checking
//! - [`Block`] / [`InsnPos`] - Basic blocks and instruction positions
//! - [`Edge`] / [`EdgeKind`] - Goto, branch, throw and ghost edges
//! - [`inline_cfg`] - Splices a callee graph into a caller at an invoke
//!
//! # Examples
//!
//! ```rust
//! use redex::{ir::parse_code, model::DexContext};
//!
//! let ctx = DexContext::new();
//! let mut code = parse_code(&ctx, "((const v0 0) (if-eqz v0 :a) (:a) (return-void))")?;
//! code.build_cfg()?;
//! let cfg = code.cfg_mut().unwrap();
//! cfg.simplify();
//! assert_eq!(cfg.num_blocks(), 1);
//! code.clear_cfg()?;
//! # Ok::<(), redex::Error>(())
//! ```

mod block;
mod builder;
mod edge;
mod graph;
mod inliner;
mod linearize;
mod mutation;
mod simplify;

use crate::utils::graph::NodeId;

/// Identifies a block within its [`ControlFlowGraph`].
pub type BlockId = NodeId;

pub use block::{Block, InsnPos};
pub use edge::{Edge, EdgeId, EdgeKind};
pub use graph::{ControlFlowGraph, InstructionIterator};
pub use inliner::{
    inline_cfg, inline_cfg_with_plugin, CfgInlinerPlugin, FieldRegisterPlugin, InlineOptions,
    InlineResult,
};
