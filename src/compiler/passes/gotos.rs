//! Goto reduction by hoisting tiny branch arms.
//!
//! A conditional branch often selects between two short arms that differ only in which
//! constant they load before joining again. One arm must end in a goto back to the join.
//! When that arm's writes are harmless on the other path, its instructions move in front
//! of the branch and the branch jumps straight to the join, which removes a goto from the
//! laid-out code.
//!
//! # Example
//!
//! Before:
//! ```text
//! (if-eqz v0 :t)
//! (const v1 0)
//! (:end)
//! (return v1)
//! (:t)
//! (const v1 1)
//! (goto :end)
//! ```
//!
//! After:
//! ```text
//! (const v1 1)
//! (if-eqz v0 :end)
//! (const v1 0)
//! (:end)
//! (return v1)
//! ```
//!
//! # Conditions
//!
//! The hoisted arm is entered only from the branch, holds at most [`MAX_HOISTED`] narrow
//! `const`/`move` instructions, cannot throw and continues by goto. None of its
//! destinations may be read by the branch itself or be live on entry to the other
//! successor. The taken side is tried before the fall-through.

use crate::{
    analysis::dataflow::Liveness,
    cfg::{BlockId, ControlFlowGraph, EdgeId},
    compiler::ShrinkPass,
    ir::{IrInstruction, IrOpcode, MethodItem},
    Result,
};

/// Largest arm, in instructions, that is hoisted.
pub const MAX_HOISTED: usize = 2;

/// Hoists tiny branch arms above their branch so the arm's goto disappears.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReduceGotosPass;

fn is_hoistable(insn: &IrInstruction) -> bool {
    matches!(
        insn.opcode(),
        IrOpcode::Const | IrOpcode::Move | IrOpcode::MoveObject
    )
}

impl ReduceGotosPass {
    /// Returns the instructions of the arm behind `edge` and the arm's goto target if the
    /// arm may be hoisted above the branch of `block`.
    fn hoistable_arm(
        cfg: &ControlFlowGraph,
        liveness: &Liveness,
        block: BlockId,
        edge: EdgeId,
        other: BlockId,
    ) -> Option<(Vec<IrInstruction>, BlockId)> {
        let arm = cfg.edge(edge).target();
        if arm == block || arm == cfg.entry() || cfg.block(arm).preds() != [edge] {
            return None;
        }
        let join = cfg.goto_target(arm)?;
        if join == arm || cfg.block(arm).succs().len() != 1 {
            return None;
        }
        let items = cfg.block(arm).items();
        if items.is_empty() || items.len() > MAX_HOISTED {
            return None;
        }
        let insns: Vec<IrInstruction> = items
            .iter()
            .map(|item| match item {
                MethodItem::Opcode(insn) if is_hoistable(insn) => Some(insn.clone()),
                _ => None,
            })
            .collect::<Option<_>>()?;

        let (_, branch) = cfg.block(block).branch_insn()?;
        let live_other = liveness.live_in(other);
        let conflicts = insns.iter().filter_map(IrInstruction::dest).any(|d| {
            branch.srcs().contains(&d)
                || ((d as usize) < live_other.len() && live_other.contains(d as usize))
        });
        (!conflicts).then_some((insns, join))
    }

    fn reduce_block(cfg: &mut ControlFlowGraph, liveness: &Liveness, block: BlockId) -> Result<bool> {
        let Some((_, branch)) = cfg.block(block).branch_insn() else {
            return Ok(false);
        };
        if !branch.opcode().is_conditional_branch() {
            return Ok(false);
        }
        let branches = cfg.branch_edges(block);
        let (Some(goto), &[taken]) = (cfg.goto_edge(block), branches.as_slice()) else {
            return Ok(false);
        };

        for (side, other) in [(taken, goto), (goto, taken)] {
            let other = cfg.edge(other).target();
            let Some((insns, join)) = Self::hoistable_arm(cfg, liveness, block, side, other) else {
                continue;
            };
            let arm = cfg.edge(side).target();
            cfg.push_back(block, insns)?;
            cfg.set_edge_target(side, join);
            cfg.remove_block(arm);
            return Ok(true);
        }
        Ok(false)
    }
}

impl ShrinkPass for ReduceGotosPass {
    fn name(&self) -> &'static str {
        "reduce-gotos"
    }

    fn description(&self) -> &'static str {
        "Hoists tiny branch arms so their gotos disappear"
    }

    fn should_run(&self, cfg: &ControlFlowGraph) -> bool {
        cfg.blocks()
            .any(|b| b.branch_insn().is_some_and(|(_, i)| i.opcode().is_conditional_branch()))
    }

    fn run(&self, cfg: &mut ControlFlowGraph) -> Result<usize> {
        let mut liveness = Liveness::compute(cfg);
        let mut changes = 0;
        for block in cfg.block_ids() {
            if cfg.get_block(block).is_none() {
                continue;
            }
            if Self::reduce_block(cfg, &liveness, block)? {
                changes += 1;
                liveness = Liveness::compute(cfg);
            }
        }
        Ok(changes)
    }
}
