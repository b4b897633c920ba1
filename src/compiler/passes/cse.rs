//! Local common subexpression elimination.
//!
//! Numbers the pure arithmetic of each block by opcode, operands and literal. When a block
//! recomputes a value that is still held in a register, the recomputation becomes a move
//! from that register.
//!
//! # Example
//!
//! Before:
//! ```text
//! (add-int v2 v0 v1)
//! (add-int v3 v0 v1)
//! ```
//!
//! After:
//! ```text
//! (add-int v2 v0 v1)
//! (move v3 v2)
//! ```
//!
//! Only non-throwing unary, binary and literal arithmetic is numbered; constants are left
//! to constant propagation. An entry dies as soon as one of its operands or its holding
//! register is overwritten.

use crate::{
    cfg::{BlockId, ControlFlowGraph},
    compiler::ShrinkPass,
    ir::{IrInstruction, IrOpcode, MethodItem, Reg},
    Result,
};

#[derive(Debug, PartialEq, Eq)]
struct ValueKey {
    opcode: IrOpcode,
    srcs: Vec<Reg>,
    literal: Option<i64>,
}

struct Available {
    key: ValueKey,
    reads: Vec<Reg>,
    holder: Reg,
    wide: bool,
}

impl Available {
    fn touches(&self, written: &[Reg]) -> bool {
        let holder_high = self.wide.then_some(self.holder + 1);
        written
            .iter()
            .any(|r| self.reads.contains(r) || *r == self.holder || Some(*r) == holder_high)
    }
}

fn is_numbered(insn: &IrInstruction) -> bool {
    let op = insn.opcode();
    (op.is_unop() || op.is_binop() || op.is_binop_lit()) && !op.can_throw() && op.has_dest()
}

fn written_regs(insn: &IrInstruction) -> Vec<Reg> {
    match insn.dest() {
        Some(d) if insn.opcode().dest_is_wide() => vec![d, d + 1],
        Some(d) => vec![d],
        None => Vec::new(),
    }
}

/// Block-local value numbering over pure arithmetic.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalCsePass;

impl LocalCsePass {
    fn eliminate_block(cfg: &mut ControlFlowGraph, block: BlockId) -> usize {
        let mut table: Vec<Available> = Vec::new();
        let mut changes = 0;

        let indices: Vec<usize> = cfg.block(block).insns().map(|(i, _)| i).collect();
        for index in indices {
            let Some(insn) = cfg.block(block).items[index].insn() else {
                continue;
            };
            let written = written_regs(insn);
            if !is_numbered(insn) {
                table.retain(|a| !a.touches(&written));
                continue;
            }
            let Some(dest) = insn.dest() else {
                continue;
            };
            let wide = insn.opcode().dest_is_wide();
            let key = ValueKey {
                opcode: insn.opcode(),
                srcs: insn.srcs().to_vec(),
                literal: insn.literal(),
            };
            let reads = insn.used_regs();

            if let Some(hit) = table.iter().find(|a| a.key == key) {
                let holder = hit.holder;
                if holder != dest {
                    let mv = if wide { IrOpcode::MoveWide } else { IrOpcode::Move };
                    let replacement = IrInstruction::new(mv).with_dest(dest).with_srcs(vec![holder]);
                    cfg.block_mut(block).items[index] = MethodItem::Opcode(replacement);
                    changes += 1;
                }
                table.retain(|a| !a.touches(&written));
                continue;
            }

            table.retain(|a| !a.touches(&written));
            if !written.iter().any(|r| reads.contains(r)) {
                table.push(Available {
                    key,
                    reads,
                    holder: dest,
                    wide,
                });
            }
        }
        changes
    }
}

impl ShrinkPass for LocalCsePass {
    fn name(&self) -> &'static str {
        "cse"
    }

    fn description(&self) -> &'static str {
        "Replaces recomputed arithmetic with moves from the register holding it"
    }

    fn run(&self, cfg: &mut ControlFlowGraph) -> Result<usize> {
        let mut changes = 0;
        for block in cfg.block_ids() {
            changes += Self::eliminate_block(cfg, block);
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
    fn test_reuses_value() {
        let ctx = DexContext::new();
        let mut cfg = build(
            &ctx,
            r#"((load-param v0) (load-param v1)
                (add-int v2 v0 v1) (add-int v3 v0 v1) (mul-int v4 v2 v3) (return v4))"#,
        );
        assert_eq!(LocalCsePass.run(&mut cfg).unwrap(), 1);
        assert_eq!(
            printed(&cfg),
            canonical(
                &ctx,
                r#"((load-param v0) (load-param v1)
                    (add-int v2 v0 v1) (move v3 v2) (mul-int v4 v2 v3) (return v4))"#
            )
        );
        assert_eq!(LocalCsePass.run(&mut cfg).unwrap(), 0);
    }

    #[test]
    fn test_operand_overwrite_kills_value() {
        let ctx = DexContext::new();
        let text = r#"((load-param v0)
            (add-int/lit v1 v0 1) (const v0 5) (add-int/lit v2 v0 1)
            (add-int v3 v1 v2) (return v3))"#;
        let mut cfg = build(&ctx, text);
        assert_eq!(LocalCsePass.run(&mut cfg).unwrap(), 0);
        assert_eq!(printed(&cfg), canonical(&ctx, text));
    }

    #[test]
    fn test_throwing_division_is_not_numbered() {
        let ctx = DexContext::new();
        let text = r#"((load-param v0)
            (div-int/lit v0 3) (move-result-pseudo v1)
            (div-int/lit v0 3) (move-result-pseudo v2)
            (add-int v3 v1 v2) (return v3))"#;
        let mut cfg = build(&ctx, text);
        assert_eq!(LocalCsePass.run(&mut cfg).unwrap(), 0);
    }
}
