//! Dead code elimination.
//!
//! Removes instructions whose only effect is to write a register that no path reads
//! afterwards. Unreachable blocks are left to [`ControlFlowGraph::simplify`].
//!
//! # Example
//!
//! Before:
//! ```text
//! (const v1 3)
//! (move v2 v1)          ; v2 never read
//! (add-int/lit v3 v1 1)
//! (return v3)
//! ```
//!
//! After:
//! ```text
//! (const v1 3)
//! (add-int/lit v3 v1 1)
//! (return v3)
//! ```
//!
//! # Algorithm
//!
//! Liveness is solved once. Each block is then walked backward from its live-out set;
//! a removable instruction whose destination is dead is dropped without contributing its
//! uses, so chains of dead definitions inside one block go in a single walk.
//!
//! An instruction is removable when it writes its own destination, has no side effects
//! and cannot throw. Parameter loads, `move-result*` and `move-exception` always stay.

use crate::{
    analysis::dataflow::{step_backward, Liveness},
    cfg::{BlockId, ControlFlowGraph, InsnPos},
    compiler::ShrinkPass,
    ir::{IrInstruction, IrOpcode},
    utils::BitSet,
    Result,
};

/// Removes side-effect-free definitions that are never read.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadCodeEliminationPass;

fn is_removable(insn: &IrInstruction) -> bool {
    let op = insn.opcode();
    op.has_dest()
        && !op.has_side_effects()
        && !op.can_throw()
        && !op.is_load_param()
        && !op.is_move_result_any()
        && op != IrOpcode::MoveException
}

fn is_dead(insn: &IrInstruction, live: &BitSet) -> bool {
    let Some(dest) = insn.dest() else {
        return false;
    };
    let dest = dest as usize;
    let live_at = |r: usize| r < live.len() && live.contains(r);
    !live_at(dest) && !(insn.opcode().dest_is_wide() && live_at(dest + 1))
}

impl DeadCodeEliminationPass {
    fn dead_in_block(cfg: &ControlFlowGraph, liveness: &Liveness, block: BlockId) -> Vec<usize> {
        let mut live = liveness.live_out(block);
        let insns: Vec<(usize, &IrInstruction)> = cfg.block(block).insns().collect();
        let mut dead = Vec::new();
        for (index, insn) in insns.into_iter().rev() {
            if is_removable(insn) && is_dead(insn, &live) {
                dead.push(index);
                continue;
            }
            step_backward(&mut live, insn);
        }
        dead
    }
}

impl ShrinkPass for DeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        "local-dce"
    }

    fn description(&self) -> &'static str {
        "Removes side-effect-free definitions whose value is never read"
    }

    fn run(&self, cfg: &mut ControlFlowGraph) -> Result<usize> {
        let liveness = Liveness::compute(cfg);
        let mut changes = 0;
        for block in cfg.block_ids() {
            // Indices come out descending, so earlier removals do not shift later ones.
            let dead = Self::dead_in_block(cfg, &liveness, block);
            for index in dead {
                cfg.remove_insn(InsnPos::new(block, index))?;
                changes += 1;
            }
        }
        if changes > 0 {
            log::trace!("local-dce: removed {changes} instructions");
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::passes::test_support::{build, canonical, printed},
        model::DexContext,
    };

    #[test]
    fn test_removes_dead_chain() {
        let ctx = DexContext::new();
        let mut cfg = build(
            &ctx,
            r#"((load-param v0)
                (const v1 3)
                (move v2 v1)
                (add-int/lit v4 v2 9)
                (add-int/lit v3 v1 1)
                (return v3))"#,
        );
        assert_eq!(DeadCodeEliminationPass.run(&mut cfg).unwrap(), 2);
        assert_eq!(
            printed(&cfg),
            canonical(
                &ctx,
                "((load-param v0) (const v1 3) (add-int/lit v3 v1 1) (return v3))"
            )
        );
        assert_eq!(DeadCodeEliminationPass.run(&mut cfg).unwrap(), 0);
    }

    #[test]
    fn test_keeps_effects_and_live_values() {
        let ctx = DexContext::new();
        let text = r#"((load-param-object v0)
            (invoke-static (v0) "LFoo;.bar:(Ljava/lang/Object;)I")
            (move-result v1)
            (iget v0 "LFoo;.f:I")
            (move-result-pseudo v2)
            (if-eqz v2 :a)
            (const v3 1)
            (return v3)
            (:a)
            (const v3 2)
            (return v3))"#;
        let mut cfg = build(&ctx, text);
        assert_eq!(DeadCodeEliminationPass.run(&mut cfg).unwrap(), 0);
        assert_eq!(printed(&cfg), canonical(&ctx, text));
    }

    #[test]
    fn test_live_across_blocks() {
        let ctx = DexContext::new();
        let text = r#"((load-param v0)
            (const v1 7)
            (if-eqz v0 :a)
            (const v1 8)
            (:a)
            (return v1))"#;
        let mut cfg = build(&ctx, text);
        assert_eq!(DeadCodeEliminationPass.run(&mut cfg).unwrap(), 0);
    }
}
