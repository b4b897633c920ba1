//! Canonicalization of an edited graph.

use crate::cfg::{BlockId, ControlFlowGraph, EdgeKind};

impl ControlFlowGraph {
    /// Brings the graph into canonical form.
    ///
    /// Drops the ghost exit and unreachable blocks, bypasses blocks without instructions,
    /// removes branches whose every successor is the fall-through, merges straight-line
    /// chains, and finally recomputes the exit block.
    pub fn simplify(&mut self) {
        self.remove_ghost_exit_block();
        self.remove_unreachable_blocks();
        let bypassed = self.remove_empty_blocks();
        let collapsed = self.collapse_trivial_branches();
        let merged = self.merge_chains();
        self.remove_unreachable_blocks();
        self.calculate_exit_block();
        log::trace!(
            "simplify: bypassed {bypassed} empty blocks, collapsed {collapsed} branches, merged {merged} blocks"
        );
    }

    /// Redirects the predecessors of every instruction-free block to its goto target.
    ///
    /// Positions and other non-instruction items move to the front of the target when it
    /// can take them; otherwise they are dropped.
    fn remove_empty_blocks(&mut self) -> usize {
        let mut removed = 0;
        for b in self.block_ids() {
            if self.get_block(b).map_or(true, |block| !block.is_empty()) {
                continue;
            }
            let Some(target) = self.goto_target(b) else {
                continue;
            };
            if target == b || self.block(b).succs.len() != 1 {
                continue;
            }
            for e in self.block(b).preds.clone() {
                self.set_edge_target(e, target);
            }
            let items = std::mem::take(&mut self.block_mut(b).items);
            let carry = !items.is_empty()
                && !self.block(target).starts_with_move_result()
                && !self.block(target).starts_with_move_exception();
            if carry {
                let dest = &mut self.block_mut(target).items;
                dest.splice(0..0, items);
            }
            if self.entry == b {
                self.entry = target;
            }
            self.remove_block(b);
            removed += 1;
        }
        removed
    }

    /// Removes branch edges that lead where the goto leads, and the branch instruction if
    /// none remain.
    fn collapse_trivial_branches(&mut self) -> usize {
        let mut collapsed = 0;
        for b in self.block_ids() {
            if self.block(b).branch_insn().is_none() {
                continue;
            }
            let Some(fallthrough) = self.goto_target(b) else {
                continue;
            };
            let redundant = self.succ_edges_if(b, |e| e.kind.is_branch() && e.target == fallthrough);
            if redundant.is_empty() {
                continue;
            }
            for e in redundant {
                self.delete_edge(e);
            }
            self.cleanup_branch(b);
            collapsed += 1;
        }
        collapsed
    }

    /// Merges every block into its goto predecessor where [`ControlFlowGraph::merge_blocks`]
    /// allows it.
    fn merge_chains(&mut self) -> usize {
        let mut merged = 0;
        let mut changed = true;
        while changed {
            changed = false;
            for b in self.block_ids() {
                if self.get_block(b).is_none() {
                    continue;
                }
                while let Some(succ) = self.mergeable_successor(b) {
                    if self.merge_blocks(b, succ).is_err() {
                        break;
                    }
                    merged += 1;
                    changed = true;
                }
            }
        }
        merged
    }

    fn mergeable_successor(&self, block: BlockId) -> Option<BlockId> {
        let goto = self.goto_edge(block)?;
        let succ = self.edge(goto).target;
        if succ == block || succ == self.entry {
            return None;
        }
        let only_succ = self
            .block(block)
            .succs
            .iter()
            .all(|&e| e == goto || matches!(self.edge(e).kind, EdgeKind::Throw { .. }));
        let only_pred = self.block(succ).preds.as_slice() == [goto];
        if !only_succ || !only_pred {
            return None;
        }
        let pred_throws = !self.throw_edges(block).is_empty();
        let succ_throws = !self.throw_edges(succ).is_empty();
        if pred_throws && !self.block(succ).is_empty() {
            return None;
        }
        if succ_throws && self.block(block).can_throw() {
            return None;
        }
        Some(succ)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        cfg::{ControlFlowGraph, EdgeKind},
        ir::{parse_code, IrInstruction, IrOpcode, MethodItem},
        model::DexContext,
    };

    fn build(ctx: &DexContext, text: &str) -> ControlFlowGraph {
        let code = parse_code(ctx, text).unwrap();
        ControlFlowGraph::build(code.items(), code.registers_size()).unwrap()
    }

    #[test]
    fn test_branch_to_fallthrough_collapses() {
        let ctx = DexContext::new();
        let mut cfg = build(&ctx, "((load-param v0) (if-eqz v0 :a) (:a) (return-void))");
        assert_eq!(cfg.num_blocks(), 2);
        cfg.simplify();
        assert_eq!(cfg.num_blocks(), 1);
        assert!(cfg.instructions().all(|(_, i)| !i.opcode().is_branch()));
        assert_eq!(cfg.exit(), Some(cfg.entry()));
        cfg.sanity_check().unwrap();
    }

    #[test]
    fn test_empty_block_is_bypassed() {
        let ctx = DexContext::new();
        let mut cfg = build(
            &ctx,
            "((load-param v0) (if-eqz v0 :a) (const v0 1) (:a) (return v0))",
        );
        let entry = cfg.entry();
        let fallthrough = cfg.goto_target(entry).unwrap();
        let join = cfg.goto_target(fallthrough).unwrap();
        let empty = cfg.create_block();
        let e = cfg.goto_edge(fallthrough).unwrap();
        cfg.set_edge_target(e, empty);
        cfg.add_edge(empty, join, EdgeKind::Goto);
        let before = cfg.num_blocks();

        cfg.simplify();
        assert!(cfg.get_block(empty).is_none());
        assert!(cfg.num_blocks() < before);
        cfg.sanity_check().unwrap();
    }

    #[test]
    fn test_chain_merges_but_not_across_covered_throw() {
        let ctx = DexContext::new();
        let mut cfg = build(
            &ctx,
            r#"((load-param v0)
                (.try_start c0)
                (invoke-static (v0) "LFoo;.a:(I)I")
                (move-result v1)
                (.try_end c0)
                (const v2 2)
                (return v1)
                (.catch (c0))
                (const v1 0)
                (return v1))"#,
        );
        cfg.simplify();
        let invoke_block = cfg
            .instructions()
            .find(|(_, i)| i.opcode() == IrOpcode::InvokeStatic)
            .map(|(p, _)| p.block())
            .unwrap();
        assert_eq!(cfg.throw_edges(invoke_block).len(), 1);
        let follower = cfg.goto_target(invoke_block).unwrap();
        assert!(cfg.block(follower).starts_with_move_result());
        assert_eq!(cfg.block(follower).num_opcodes(), 3);
        cfg.sanity_check().unwrap();
    }

    #[test]
    fn test_positions_move_with_empty_block() {
        let ctx = DexContext::new();
        let mut cfg = ControlFlowGraph::new(1);
        let entry = cfg.entry();
        cfg.push_back(entry, vec![IrInstruction::new(IrOpcode::Const).with_dest(0).with_literal(1)])
            .unwrap();
        let middle = cfg.create_block();
        let last = cfg.create_block();
        let method = ctx.make_method_from_str("LFoo;.a:()V").unwrap();
        let pos = crate::ir::DexPosition {
            method,
            file: ctx.make_string("Foo.java"),
            line: 3,
            parent: None,
        };
        cfg.block_mut(middle)
            .items
            .push(MethodItem::Position(std::sync::Arc::new(pos)));
        cfg.push_back(last, vec![IrInstruction::new(IrOpcode::Return).with_srcs(vec![0])])
            .unwrap();
        cfg.add_edge(entry, middle, EdgeKind::Goto);
        cfg.add_edge(middle, last, EdgeKind::Goto);

        cfg.simplify();
        assert_eq!(cfg.num_blocks(), 1);
        let items = cfg.block(cfg.entry()).items();
        assert!(matches!(items[1], MethodItem::Position(_)));
    }
}
