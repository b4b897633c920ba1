//! Constant branch folding.
//!
//! Runs edge-sensitive constant propagation over the method and removes every branch edge
//! the analysis proves infeasible. A conditional branch left with one feasible successor
//! becomes a plain fall-through; a switch keeps its surviving cases.
//!
//! # Example
//!
//! Before:
//! ```text
//! (const v0 0)
//! (if-nez v0 :dead)
//! (return v0)
//! (:dead)
//! (const v1 7)
//! (return v1)
//! ```
//!
//! After:
//! ```text
//! (const v0 0)
//! (return v0)
//! ```
//!
//! Parameters are unknown, so only branches on values computed inside the method fold.
//! Arithmetic itself is left alone; only control flow changes.

use crate::{
    analysis::{ConstantAnalysis, ConstantValue},
    cfg::{BlockId, ControlFlowGraph, EdgeId, EdgeKind},
    compiler::ShrinkPass,
    model::DexContext,
    Result,
};

/// Removes branch edges that constant propagation proves are never taken.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConstantBranchFoldingPass;

impl ConstantBranchFoldingPass {
    /// Folds one block's branch given its infeasible edges; returns the number of edges
    /// removed.
    fn fold_block(cfg: &mut ControlFlowGraph, block: BlockId, infeasible: &[EdgeId]) -> usize {
        let Some((index, insn)) = cfg.block(block).branch_insn() else {
            return 0;
        };
        let is_switch = insn.opcode().is_switch();
        let feasible: Vec<EdgeId> = cfg
            .succ_edges_if(block, |e| e.kind().is_branch() || e.kind().is_goto())
            .into_iter()
            .filter(|e| !infeasible.contains(e))
            .collect();

        if let [only] = feasible.as_slice() {
            // A single way out: the branch instruction goes, the survivor becomes the goto.
            let target = cfg.edge(*only).target();
            let removed = infeasible.len();
            cfg.block_mut(block).items.remove(index);
            for e in cfg.succ_edges_if(block, |e| e.kind().is_branch() || e.kind().is_goto()) {
                cfg.delete_edge(e);
            }
            cfg.add_edge(block, target, EdgeKind::Goto);
            cfg.prune_throw_edges(block);
            return removed;
        }

        if is_switch {
            let dead: Vec<EdgeId> = infeasible
                .iter()
                .copied()
                .filter(|&e| cfg.edge(e).kind().is_branch())
                .collect();
            for &e in &dead {
                cfg.delete_edge(e);
            }
            if !dead.is_empty() {
                cfg.cleanup_branch(block);
            }
            return dead.len();
        }
        0
    }
}

impl ShrinkPass for ConstantBranchFoldingPass {
    fn name(&self) -> &'static str {
        "const-prop"
    }

    fn description(&self) -> &'static str {
        "Folds branches whose outcome is known from constant propagation"
    }

    fn should_run(&self, cfg: &ControlFlowGraph) -> bool {
        cfg.blocks().any(|b| b.branch_insn().is_some())
    }

    fn run(&self, cfg: &mut ControlFlowGraph) -> Result<usize> {
        Ok(fold_constant_branches(cfg, Vec::new(), None))
    }
}

/// Folds every branch edge proven infeasible when the parameters hold `params`; returns the
/// number of edges removed. Parameters past the end of `params` are unknown.
///
/// Used directly to specialize a callee for the constant arguments of one call site.
pub(crate) fn fold_constant_branches(
    cfg: &mut ControlFlowGraph,
    params: Vec<ConstantValue>,
    ctx: Option<&DexContext>,
) -> usize {
    let infeasible = {
        let analysis = ConstantAnalysis::run(cfg, params, ctx);
        analysis.infeasible_edges(cfg)
    };
    if infeasible.is_empty() {
        return 0;
    }

    let mut blocks: Vec<BlockId> = infeasible.iter().map(|&e| cfg.edge(e).src()).collect();
    blocks.sort_unstable();
    blocks.dedup();

    let mut changes = 0;
    for block in blocks {
        let edges: Vec<EdgeId> = infeasible
            .iter()
            .copied()
            .filter(|&e| cfg.has_edge(e) && cfg.edge(e).src() == block)
            .collect();
        changes += ConstantBranchFoldingPass::fold_block(cfg, block, &edges);
    }
    if changes > 0 {
        let (removed, _) = cfg.remove_unreachable_blocks();
        log::trace!("const-prop: folded {changes} edges, removed {removed} instructions");
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::passes::test_support::{build, canonical, printed},
        model::DexContext,
    };

    #[test]
    fn test_folds_known_condition() {
        let ctx = DexContext::new();
        let mut cfg = build(
            &ctx,
            "((const v0 0) (if-nez v0 :dead) (return v0) (:dead) (const v1 7) (return v1))",
        );
        let changes = ConstantBranchFoldingPass.run(&mut cfg).unwrap();
        assert_eq!(changes, 1);
        cfg.simplify();
        assert_eq!(printed(&cfg), canonical(&ctx, "((const v0 0) (return v0))"));
        cfg.sanity_check().unwrap();
    }

    #[test]
    fn test_keeps_unknown_condition() {
        let ctx = DexContext::new();
        let text = "((load-param v0) (if-nez v0 :a) (return v0) (:a) (const v1 7) (return v1))";
        let mut cfg = build(&ctx, text);
        assert_eq!(ConstantBranchFoldingPass.run(&mut cfg).unwrap(), 0);
        assert_eq!(printed(&cfg), canonical(&ctx, text));
    }

    #[test]
    fn test_prunes_dead_switch_cases() {
        let ctx = DexContext::new();
        let mut cfg = build(
            &ctx,
            r#"((load-param v0)
                (if-gez v0 :pos)
                (const v0 -1)
                (:pos)
                (const v1 3)
                (switch v1 (:a :b))
                (return v0)
                (:a 3)
                (const v0 1)
                (return v0)
                (:b 4)
                (const v0 2)
                (return v0))"#,
        );
        assert!(ConstantBranchFoldingPass.run(&mut cfg).unwrap() > 0);
        cfg.simplify();
        assert!(cfg
            .instructions()
            .all(|(_, i)| !i.opcode().is_switch() && i.literal() != Some(2)));
        cfg.sanity_check().unwrap();
    }
}
