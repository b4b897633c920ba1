//! Duplicate block elimination.
//!
//! Two blocks with the same instructions and the same outgoing edges compute the same
//! thing from the same registers. Every predecessor of the later one is sent to the
//! earlier one and the later block goes away.
//!
//! # Example
//!
//! Before:
//! ```text
//! (if-eqz v0 :a)
//! (const v1 0)
//! (return v1)
//! (:a)
//! (const v1 0)
//! (return v1)
//! ```
//!
//! After:
//! ```text
//! (if-eqz v0 :a)
//! (:a)
//! (const v1 0)
//! (return v1)
//! ```
//!
//! which [`ControlFlowGraph::simplify`] then collapses to a single block.
//!
//! The entry block, handler blocks, blocks that receive a result from their predecessor
//! and blocks that loop onto themselves are never merged.

use std::collections::HashMap;

use crate::{
    cfg::{BlockId, ControlFlowGraph, EdgeKind},
    compiler::ShrinkPass,
    ir::IrInstruction,
    Result,
};

/// Merges blocks with identical bodies and identical successors.
#[derive(Debug, Default, Clone, Copy)]
pub struct DedupBlocksPass;

#[derive(PartialEq, Eq, Hash)]
struct BlockShape {
    insns: Vec<IrInstruction>,
    succs: Vec<(EdgeKind, BlockId)>,
}

impl DedupBlocksPass {
    fn shape(cfg: &ControlFlowGraph, block: BlockId) -> Option<BlockShape> {
        let b = cfg.block(block);
        if block == cfg.entry()
            || b.is_empty()
            || cfg.is_catch(block)
            || cfg.is_ghost(block)
            || b.starts_with_move_result()
            || b.starts_with_move_exception()
        {
            return None;
        }
        let mut succs: Vec<(EdgeKind, BlockId)> = b
            .succs()
            .iter()
            .map(|&e| {
                let edge = cfg.edge(e);
                (edge.kind().clone(), edge.target())
            })
            .collect();
        if succs.iter().any(|(_, target)| *target == block) {
            return None;
        }
        succs.sort_by_key(|(kind, target)| {
            (*target, kind.is_goto(), kind.case_key(), kind.throw_index())
        });
        Some(BlockShape {
            insns: b.insns().map(|(_, insn)| insn.clone()).collect(),
            succs,
        })
    }
}

impl ShrinkPass for DedupBlocksPass {
    fn name(&self) -> &'static str {
        "dedup-blocks"
    }

    fn description(&self) -> &'static str {
        "Merges blocks with identical instructions and successors"
    }

    fn should_run(&self, cfg: &ControlFlowGraph) -> bool {
        cfg.num_blocks() > 2
    }

    fn run(&self, cfg: &mut ControlFlowGraph) -> Result<usize> {
        let mut canonical: HashMap<BlockShape, BlockId> = HashMap::new();
        let mut duplicates: Vec<(BlockId, BlockId)> = Vec::new();
        for block in cfg.block_ids() {
            let Some(shape) = Self::shape(cfg, block) else {
                continue;
            };
            match canonical.get(&shape) {
                Some(&first) => duplicates.push((block, first)),
                None => {
                    canonical.insert(shape, block);
                }
            }
        }

        for &(dup, first) in &duplicates {
            for e in cfg.block(dup).preds().to_vec() {
                cfg.set_edge_target(e, first);
            }
            cfg.remove_block(dup);
        }
        if !duplicates.is_empty() {
            log::trace!("dedup-blocks: merged {} blocks", duplicates.len());
        }
        Ok(duplicates.len())
    }
}
