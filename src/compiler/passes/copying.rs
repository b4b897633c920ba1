//! Copy propagation.
//!
//! Within each block, uses of a `move`/`move-object` destination are rewritten to read the
//! move's source while neither register has been overwritten. The moves themselves stay;
//! once nothing reads them, dead code elimination removes them.
//!
//! # Example
//!
//! Before:
//! ```text
//! (move v1 v0)
//! (add-int/lit v2 v1 5)
//! (return v1)
//! ```
//!
//! After:
//! ```text
//! (move v1 v0)          ; now dead
//! (add-int/lit v2 v0 5)
//! (return v0)
//! ```
//!
//! # Algorithm
//!
//! A forward walk over each block keeps a map from copy destination to copy source:
//!
//! 1. Rewrite every narrow source operand found in the map
//! 2. Drop the map entries that mention a register the instruction writes
//! 3. Record the instruction if it is a narrow move
//!
//! A move that reads its own destination after rewriting changes nothing and is deleted.
//!
//! Chains resolve as they are walked: `v2 = v1; v1 = v0` rewrites the second move to read
//! `v0` before it is recorded. Wide moves are not tracked.
//!
//! # Complexity
//!
//! - Time: O(n × c) where n is the number of instructions and c the number of live copies
//! - Space: O(c)

use std::collections::HashMap;

use crate::{
    cfg::{BlockId, ControlFlowGraph, InsnPos},
    compiler::ShrinkPass,
    ir::{IrOpcode, Reg},
    Result,
};

/// Block-local copy propagation over narrow moves.
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyPropagationPass;

impl CopyPropagationPass {
    fn propagate_block(cfg: &mut ControlFlowGraph, block: BlockId) -> Result<usize> {
        let mut copies: HashMap<Reg, Reg> = HashMap::new();
        let mut self_moves = Vec::new();
        let mut changes = 0;

        let indices: Vec<usize> = cfg.block(block).insns().map(|(i, _)| i).collect();
        for index in indices {
            let Some(insn) = cfg.block_mut(block).items[index].insn_mut() else {
                continue;
            };
            for i in 0..insn.srcs().len() {
                if insn.src_is_wide(i) {
                    continue;
                }
                if let Some(&src) = copies.get(&insn.src(i)) {
                    insn.set_src(i, src);
                    changes += 1;
                }
            }

            let is_move = matches!(insn.opcode(), IrOpcode::Move | IrOpcode::MoveObject);
            if is_move && insn.dest() == Some(insn.src(0)) {
                self_moves.push(index);
                continue;
            }

            if let Some(dest) = insn.dest() {
                let high = insn.opcode().dest_is_wide().then_some(dest + 1);
                let clobbered = |r: Reg| r == dest || Some(r) == high;
                copies.retain(|&d, &mut s| !clobbered(d) && !clobbered(s));
                if is_move {
                    copies.insert(dest, insn.src(0));
                }
            }
        }

        for index in self_moves.into_iter().rev() {
            cfg.remove_insn(InsnPos::new(block, index))?;
            changes += 1;
        }
        Ok(changes)
    }
}

impl ShrinkPass for CopyPropagationPass {
    fn name(&self) -> &'static str {
        "copy-prop"
    }

    fn description(&self) -> &'static str {
        "Rewrites uses of copies to read the copied register"
    }

    fn should_run(&self, cfg: &ControlFlowGraph) -> bool {
        cfg.instructions()
            .any(|(_, i)| matches!(i.opcode(), IrOpcode::Move | IrOpcode::MoveObject))
    }

    fn run(&self, cfg: &mut ControlFlowGraph) -> Result<usize> {
        let mut changes = 0;
        for block in cfg.block_ids() {
            changes += Self::propagate_block(cfg, block)?;
        }
        Ok(changes)
    }
}
