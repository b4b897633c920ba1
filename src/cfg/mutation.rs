//! Structural edits: insertion, splitting, merging and removal.

use std::collections::HashSet;

use crate::{
    cfg::{Block, BlockId, ControlFlowGraph, Edge, EdgeKind, InsnPos},
    ir::{IrInstruction, IrOpcode, MethodItem},
    Result,
};

impl ControlFlowGraph {
    /// Removes a block together with all its incoming and outgoing edges.
    ///
    /// Removing the entry block leaves the graph without an entry; callers must not do
    /// that.
    pub fn remove_block(&mut self, block: BlockId) {
        let Some(b) = self.get_block(block) else {
            return;
        };
        let edges: Vec<_> = b.preds.iter().chain(&b.succs).copied().collect();
        for e in edges {
            self.delete_edge(e);
        }
        self.blocks[block.index()] = None;
        if self.exit == Some(block) {
            self.exit = None;
        }
    }

    /// Removes every block not reachable from the entry.
    ///
    /// Returns the number of instructions removed and whether the register count may now
    /// be larger than necessary.
    pub fn remove_unreachable_blocks(&mut self) -> (usize, bool) {
        let reachable = self.visit();
        let dead: Vec<BlockId> = self
            .blocks()
            .map(Block::id)
            .filter(|b| !reachable.contains(b.index()))
            .collect();
        let mut removed = 0;
        let mut may_shrink = false;
        for b in dead {
            for (_, insn) in self.block(b).insns() {
                removed += 1;
                may_shrink |= insn.max_reg_bound() >= self.registers_size;
            }
            self.remove_block(b);
        }
        if removed > 0 {
            log::trace!("removed {removed} unreachable instructions");
        }
        (removed, may_shrink)
    }

    /// Splits `block` so that items from `index` on move to a fresh block.
    ///
    /// All outgoing edges move to the new block, a goto links the original block to it,
    /// and throw edges are copied back to the original. Afterwards each side keeps throw
    /// edges only if it still contains an instruction that may throw.
    pub(crate) fn split_at(&mut self, block: BlockId, index: usize) -> BlockId {
        let new = self.create_block();
        let tail = self.block_mut(block).items.split_off(index);
        self.block_mut(new).items = tail;

        let succs = self.block(block).succs.clone();
        let mut throws = Vec::new();
        for e in succs {
            let edge = self.edge(e);
            if edge.kind.is_throw() {
                throws.push((edge.target, edge.kind.clone()));
            }
            self.set_edge_source(e, new);
        }
        self.add_edge(block, new, EdgeKind::Goto);
        for (target, kind) in throws {
            self.add_edge(block, target, kind);
        }
        self.prune_throw_edges(block);
        self.prune_throw_edges(new);
        if self.exit == Some(block) {
            self.exit = Some(new);
        }
        new
    }

    /// Splits the block after the instruction at `pos`; returns the new successor block.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidCfg`] if `pos` is a branch, `return` or `throw`.
    pub fn split_block(&mut self, pos: InsnPos) -> Result<BlockId> {
        let op = self.insn(pos).opcode();
        if op.is_branch() || op.ends_control_flow() {
            return Err(invalid_cfg!("cannot split after `{op}` at {pos:?}"));
        }
        Ok(self.split_at(pos.block, pos.index + 1))
    }

    /// Splits the block before the instruction at `pos`; returns the new block, which
    /// starts with that instruction.
    pub fn split_block_before(&mut self, pos: InsnPos) -> BlockId {
        self.split_at(pos.block, pos.index)
    }

    /// Deletes the throw edges of `block` if it has no instruction that may throw.
    pub(crate) fn prune_throw_edges(&mut self, block: BlockId) {
        if !self.block(block).can_throw() {
            for e in self.succ_edges_if(block, |e| e.kind.is_throw()) {
                self.delete_edge(e);
            }
        }
    }

    /// Merges `succ` into `pred`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidCfg`] unless `pred` continues only into `succ` by its
    /// goto and `succ` is entered only by that goto. Merging must also keep try coverage
    /// intact: instructions may not follow a covered throwing instruction, and a throwing
    /// instruction of `pred` may not come under the handlers of `succ`.
    pub fn merge_blocks(&mut self, pred: BlockId, succ: BlockId) -> Result<()> {
        if pred == succ || succ == self.entry {
            return Err(invalid_cfg!("cannot merge {succ} into {pred}"));
        }
        let Some(goto) = self.goto_edge(pred) else {
            return Err(invalid_cfg!("{pred} has no goto to merge along"));
        };
        if self.edge(goto).target != succ {
            return Err(invalid_cfg!("{pred} does not continue into {succ}"));
        }
        if self
            .block(pred)
            .succs
            .iter()
            .any(|&e| e != goto && !self.edge(e).kind.is_throw())
        {
            return Err(invalid_cfg!("{pred} has more than one successor"));
        }
        if self.block(succ).preds.as_slice() != [goto] {
            return Err(invalid_cfg!("{succ} has more than one predecessor"));
        }
        if !self.throw_edges(pred).is_empty() && !self.block(succ).is_empty() {
            return Err(invalid_cfg!("{pred} ends with a covered throwing instruction"));
        }
        if !self.throw_edges(succ).is_empty() && self.block(pred).can_throw() {
            return Err(invalid_cfg!("{pred} would move under the handlers of {succ}"));
        }

        let was_exit = self.exit == Some(succ);
        self.delete_edge(goto);
        let items = std::mem::take(&mut self.block_mut(succ).items);
        self.block_mut(pred).items.extend(items);
        for e in self.block(succ).succs.clone() {
            self.set_edge_source(e, pred);
        }
        self.remove_block(succ);
        if was_exit {
            self.exit = Some(pred);
        }
        Ok(())
    }

    /// Inserts instructions before the instruction at `pos`.
    ///
    /// A throwing instruction inserted into a block covered by a try region ends its
    /// block; the rest of the block and the remaining insertions continue in a new block.
    /// A `return` or `throw` discards what follows it in the block and removes the
    /// block's normal successor edges. Branches must be added with
    /// [`ControlFlowGraph::create_branch`].
    ///
    /// Returns `true` if positions into this graph were invalidated.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidCfg`] for branch instructions and for instructions
    /// following a `return` or `throw` in `insns`.
    pub fn insert_before(&mut self, pos: InsnPos, insns: Vec<IrInstruction>) -> Result<bool> {
        self.insert_at(pos.block, pos.index, insns)
    }

    /// Inserts instructions after the instruction at `pos`.
    ///
    /// If the instruction delivers its result through a `move-result*`, the insertion
    /// happens after that follower. See [`ControlFlowGraph::insert_before`] for the
    /// splitting rules.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidCfg`] when inserting after a branch, `return` or
    /// `throw`, and for the cases listed on [`ControlFlowGraph::insert_before`].
    pub fn insert_after(&mut self, pos: InsnPos, insns: Vec<IrInstruction>) -> Result<bool> {
        let anchor = self.move_result_of(pos).unwrap_or(pos);
        let op = self.insn(anchor).opcode();
        if op.is_branch() || op.ends_control_flow() {
            return Err(invalid_cfg!("cannot insert after `{op}` at {anchor:?}"));
        }
        let is_last = self.block(anchor.block).last_insn().map(|(i, _)| i) == Some(anchor.index);
        if is_last && self.insn(anchor).may_throw() && !self.throw_edges(anchor.block).is_empty() {
            let new = self.split_at(anchor.block, anchor.index + 1);
            self.insert_at(new, 0, insns)?;
            return Ok(true);
        }
        self.insert_at(anchor.block, anchor.index + 1, insns)
    }

    /// Inserts instructions at the start of `block`, after any leading `load-param*`,
    /// `move-exception` or result follower, which must stay first.
    ///
    /// # Errors
    ///
    /// See [`ControlFlowGraph::insert_before`].
    pub fn push_front(&mut self, block: BlockId, insns: Vec<IrInstruction>) -> Result<bool> {
        let b = self.block(block);
        let mut index = 0;
        for (i, item) in b.items.iter().enumerate() {
            let Some(insn) = item.insn() else {
                continue;
            };
            let op = insn.opcode();
            if op.is_load_param() || op.is_move_result_any() || op == IrOpcode::MoveException {
                index = i + 1;
            } else {
                break;
            }
        }
        self.insert_at(block, index, insns)
    }

    /// Appends instructions to `block`, before a final branch, `return` or `throw`.
    ///
    /// # Errors
    ///
    /// See [`ControlFlowGraph::insert_before`].
    pub fn push_back(&mut self, block: BlockId, insns: Vec<IrInstruction>) -> Result<bool> {
        match self.block(block).last_insn() {
            Some((i, insn)) if insn.opcode().is_branch() || insn.opcode().ends_control_flow() => {
                self.insert_at(block, i, insns)
            }
            Some((i, _)) => self.insert_after(InsnPos::new(block, i), insns),
            None => {
                let end = self.block(block).items.len();
                self.insert_at(block, end, insns)
            }
        }
    }

    fn insert_at(
        &mut self,
        mut block: BlockId,
        mut index: usize,
        insns: Vec<IrInstruction>,
    ) -> Result<bool> {
        let mut invalidated = false;
        let mut pending = insns.into_iter().peekable();
        while let Some(insn) = pending.next() {
            let op = insn.opcode();
            if op.is_branch() {
                return Err(invalid_cfg!("`{op}` must be added with create_branch"));
            }
            if op.ends_control_flow() {
                self.block_mut(block).items.insert(index, MethodItem::Opcode(insn));
                if pending.peek().is_some() {
                    return Err(invalid_cfg!("instructions follow `{op}`"));
                }
                self.block_mut(block).items.truncate(index + 1);
                for e in self.succ_edges_if(block, |e| !e.kind.is_throw()) {
                    self.delete_edge(e);
                }
                self.prune_throw_edges(block);
                invalidated = true;
            } else if insn.may_throw() && !self.throw_edges(block).is_empty() {
                let thrower_before = self.block(block).items[..index]
                    .iter()
                    .filter_map(MethodItem::insn)
                    .any(IrInstruction::may_throw);
                if thrower_before {
                    block = self.split_at(block, index);
                    index = 0;
                    invalidated = true;
                }
                self.block_mut(block).items.insert(index, MethodItem::Opcode(insn));
                let more_after = self.block(block).items[index + 1..]
                    .iter()
                    .any(|item| item.insn().is_some());
                if more_after || pending.peek().is_some() {
                    block = self.split_at(block, index + 1);
                    index = 0;
                    invalidated = true;
                } else {
                    index += 1;
                }
            } else {
                self.block_mut(block).items.insert(index, MethodItem::Opcode(insn));
                index += 1;
            }
        }
        Ok(invalidated)
    }

    /// Replaces the instruction at `pos` with `insns`.
    ///
    /// # Errors
    ///
    /// See [`ControlFlowGraph::remove_insn`] and [`ControlFlowGraph::insert_before`].
    pub fn replace_insn(&mut self, pos: InsnPos, insns: Vec<IrInstruction>) -> Result<bool> {
        let op = self.insn(pos).opcode();
        if op.is_branch() || op.ends_control_flow() {
            return Err(invalid_cfg!("cannot replace `{op}`"));
        }
        self.block_mut(pos.block).items.remove(pos.index);
        let invalidated = self.insert_at(pos.block, pos.index, insns)?;
        self.prune_throw_edges(pos.block);
        Ok(invalidated)
    }

    /// Removes the instruction at `pos`.
    ///
    /// Removing a conditional branch or switch deletes its branch edges. Removing an
    /// instruction that delivers its result through a follower removes the follower too.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidCfg`] for `return` and `throw`, which cannot be
    /// removed without leaving the block without a continuation.
    pub fn remove_insn(&mut self, pos: InsnPos) -> Result<()> {
        let op = self.insn(pos).opcode();
        if op.ends_control_flow() {
            return Err(invalid_cfg!("cannot remove `{op}` at {pos:?}"));
        }
        if let Some(follower) = self.move_result_of(pos) {
            self.block_mut(follower.block).items.remove(follower.index);
        }
        self.block_mut(pos.block).items.remove(pos.index);
        if op.is_conditional_branch() || op.is_switch() {
            for e in self.branch_edges(pos.block) {
                self.delete_edge(e);
            }
        }
        self.prune_throw_edges(pos.block);
        Ok(())
    }

    /// Appends a conditional branch or switch to `block` and wires its edges.
    ///
    /// For `if-*`, `cases` holds exactly one `(key, target)` pair whose key is ignored.
    /// With `goto_block == None` the block's existing goto edge becomes the fall-through.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidCfg`] if `insn` is not a conditional branch or
    /// switch, the block already ends its control flow, no fall-through is available, or
    /// switch keys repeat.
    pub fn create_branch(
        &mut self,
        block: BlockId,
        insn: IrInstruction,
        goto_block: Option<BlockId>,
        cases: &[(i32, BlockId)],
    ) -> Result<()> {
        let op = insn.opcode();
        if !op.is_conditional_branch() && !op.is_switch() {
            return Err(invalid_cfg!("`{op}` is not a branch"));
        }
        let mut block = block;
        if let Some((i, last)) = self.block(block).last_insn() {
            let lop = last.opcode();
            if lop.is_branch() || lop.ends_control_flow() {
                return Err(invalid_cfg!("{block} already ends with `{lop}`"));
            }
            if last.may_throw() && !self.throw_edges(block).is_empty() {
                block = self.split_at(block, i + 1);
            }
        }
        if op.is_conditional_branch() && cases.len() != 1 {
            return Err(invalid_cfg!("`{op}` needs exactly one target"));
        }
        let mut keys = HashSet::new();
        if op.is_switch() && !cases.iter().all(|(k, _)| keys.insert(*k)) {
            return Err(invalid_cfg!("duplicate switch keys"));
        }
        match goto_block {
            Some(target) => {
                if let Some(old) = self.goto_edge(block) {
                    self.delete_edge(old);
                }
                self.add_edge(block, target, EdgeKind::Goto);
            }
            None => {
                if self.goto_edge(block).is_none() {
                    return Err(invalid_cfg!("{block} has no fall-through for `{op}`"));
                }
            }
        }
        self.block_mut(block).items.push(MethodItem::Opcode(insn));
        for &(key, target) in cases {
            let case_key = op.is_switch().then_some(key);
            self.add_edge(block, target, EdgeKind::Branch { case_key });
        }
        Ok(())
    }

    /// Deletes the outgoing edges of `block` matching `predicate`; returns how many.
    ///
    /// With `cleanup`, a conditional branch left with a single successor becomes a plain
    /// fall-through and a switch left with only its default is removed.
    pub fn delete_succ_edges_if<F>(&mut self, block: BlockId, predicate: F, cleanup: bool) -> usize
    where
        F: FnMut(&Edge) -> bool,
    {
        let edges = self.succ_edges_if(block, predicate);
        let count = edges.len();
        for e in edges {
            self.delete_edge(e);
        }
        if cleanup {
            self.cleanup_branch(block);
        }
        count
    }

    /// Deletes the incoming edges of `block` matching `predicate`; returns how many.
    ///
    /// `cleanup` applies to each affected source block as in
    /// [`ControlFlowGraph::delete_succ_edges_if`].
    pub fn delete_pred_edges_if<F>(&mut self, block: BlockId, predicate: F, cleanup: bool) -> usize
    where
        F: FnMut(&Edge) -> bool,
    {
        let edges = self.pred_edges_if(block, predicate);
        let count = edges.len();
        let mut sources = Vec::new();
        for e in edges {
            let src = self.edge(e).src;
            if !sources.contains(&src) {
                sources.push(src);
            }
            self.delete_edge(e);
        }
        if cleanup {
            for src in sources {
                self.cleanup_branch(src);
            }
        }
        count
    }

    /// Deletes all edges from `src` to `target`.
    pub fn delete_edges_between(&mut self, src: BlockId, target: BlockId) {
        for e in self.succ_edges_if(src, |e| e.target == target) {
            self.delete_edge(e);
        }
    }

    /// Rewrites a trailing conditional branch or switch whose edges no longer need it.
    pub(crate) fn cleanup_branch(&mut self, block: BlockId) {
        let Some((index, insn)) = self.block(block).branch_insn() else {
            self.prune_throw_edges(block);
            return;
        };
        let is_switch = insn.opcode().is_switch();
        let branches = self.branch_edges(block);
        let goto = self.goto_edge(block);
        let remove = if is_switch {
            branches.is_empty()
        } else {
            match (branches.as_slice(), goto) {
                ([], _) => true,
                ([only], None) => {
                    self.set_edge_kind(*only, EdgeKind::Goto);
                    true
                }
                ([only], Some(g)) if self.edge(*only).target == self.edge(g).target => {
                    self.delete_edge(*only);
                    true
                }
                _ => false,
            }
        };
        if remove {
            self.block_mut(block).items.remove(index);
        }
        self.prune_throw_edges(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ir::parse_code, model::DexContext};

    fn build(ctx: &DexContext, text: &str) -> ControlFlowGraph {
        let code = parse_code(ctx, text).unwrap();
        ControlFlowGraph::build(code.items(), code.registers_size()).unwrap()
    }

    fn find(cfg: &ControlFlowGraph, op: IrOpcode) -> InsnPos {
        cfg.instructions().find(|(_, i)| i.opcode() == op).map(|(p, _)| p).unwrap()
    }

    #[test]
    fn test_insert_return_truncates() {
        let ctx = DexContext::new();
        let mut cfg = build(&ctx, "((const v0 0) (const v1 1) (goto :a) (:a) (return v1))");
        let pos = find(&cfg, IrOpcode::Const);
        let invalidated = cfg
            .insert_after(pos, vec![IrInstruction::new(IrOpcode::Return).with_srcs(vec![0])])
            .unwrap();
        assert!(invalidated);
        assert_eq!(cfg.block(cfg.entry()).num_opcodes(), 2);
        assert!(cfg.block(cfg.entry()).succs().is_empty());
        cfg.remove_unreachable_blocks();
        assert_eq!(cfg.num_blocks(), 1);
        cfg.sanity_check().unwrap();
    }

    #[test]
    fn test_insert_throwing_in_try_splits() {
        let ctx = DexContext::new();
        let mut cfg = build(
            &ctx,
            r#"((load-param v0)
                (.try_start c0)
                (invoke-static (v0) "LFoo;.a:(I)V")
                (.try_end c0)
                (return-void)
                (.catch (c0))
                (return-void))"#,
        );
        let invoke = find(&cfg, IrOpcode::InvokeStatic);
        let before = cfg.num_blocks();
        let m = ctx.make_method_from_str("LFoo;.b:(I)V").unwrap();
        let invalidated = cfg
            .insert_before(
                invoke,
                vec![IrInstruction::new(IrOpcode::InvokeStatic).with_srcs(vec![0]).with_method(m)],
            )
            .unwrap();
        assert!(invalidated);
        assert_eq!(cfg.num_blocks(), before + 1);
        let throwing: Vec<_> = cfg.blocks().filter(|b| b.can_throw()).map(Block::id).collect();
        assert_eq!(throwing.len(), 2);
        for b in throwing {
            assert_eq!(cfg.throw_edges(b).len(), 1);
        }
        cfg.sanity_check().unwrap();
    }

    #[test]
    fn test_split_and_merge() {
        let ctx = DexContext::new();
        let mut cfg = build(&ctx, "((const v0 0) (const v1 1) (return v1))");
        let entry = cfg.entry();
        let new = cfg.split_block(InsnPos::new(entry, 0)).unwrap();
        assert_eq!(cfg.goto_target(entry), Some(new));
        assert_eq!(cfg.block(new).num_opcodes(), 2);
        assert_eq!(cfg.exit(), Some(new));
        cfg.sanity_check().unwrap();

        cfg.merge_blocks(entry, new).unwrap();
        assert_eq!(cfg.num_blocks(), 1);
        assert_eq!(cfg.block(entry).num_opcodes(), 3);
        cfg.sanity_check().unwrap();
    }

    #[test]
    fn test_merge_rejects_join_point() {
        let ctx = DexContext::new();
        let mut cfg = build(&ctx, "((load-param v0) (if-eqz v0 :a) (const v0 1) (:a) (return v0))");
        let entry = cfg.entry();
        let join = cfg.goto_target(cfg.goto_target(entry).unwrap()).unwrap();
        assert!(cfg.merge_blocks(entry, join).is_err());
    }

    #[test]
    fn test_delete_branch_edge_with_cleanup() {
        let ctx = DexContext::new();
        let mut cfg = build(&ctx, "((load-param v0) (if-eqz v0 :a) (return v0) (:a) (const v0 1) (return v0))");
        let entry = cfg.entry();
        let deleted = cfg.delete_succ_edges_if(entry, |e| e.kind().is_branch(), true);
        assert_eq!(deleted, 1);
        assert!(cfg.block(entry).branch_insn().is_none());
        cfg.remove_unreachable_blocks();
        cfg.sanity_check().unwrap();

        let mut cfg = build(&ctx, "((load-param v0) (if-eqz v0 :a) (return v0) (:a) (const v0 1) (return v0))");
        let entry = cfg.entry();
        cfg.delete_succ_edges_if(entry, |e| e.kind().is_goto(), true);
        assert!(cfg.block(entry).branch_insn().is_none());
        assert!(cfg.goto_edge(entry).is_some());
        cfg.remove_unreachable_blocks();
        cfg.sanity_check().unwrap();
    }

    #[test]
    fn test_create_branch() {
        let mut cfg = ControlFlowGraph::new(1);
        let entry = cfg.entry();
        let a = cfg.create_block();
        let b = cfg.create_block();
        cfg.push_back(a, vec![IrInstruction::new(IrOpcode::ReturnVoid)]).unwrap();
        cfg.push_back(b, vec![IrInstruction::new(IrOpcode::ReturnVoid)]).unwrap();
        cfg.create_branch(
            entry,
            IrInstruction::new(IrOpcode::Switch).with_srcs(vec![0]),
            Some(a),
            &[(1, b), (2, a)],
        )
        .unwrap();
        assert_eq!(cfg.branch_edges(entry).len(), 2);
        cfg.sanity_check().unwrap();

        let err = cfg.create_branch(
            a,
            IrInstruction::new(IrOpcode::IfEqz).with_srcs(vec![0]),
            None,
            &[(0, b)],
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_remove_insn_removes_follower() {
        let ctx = DexContext::new();
        let mut cfg = build(
            &ctx,
            r#"((load-param v0) (invoke-static (v0) "LFoo;.a:(I)I") (move-result v1) (return v0))"#,
        );
        let invoke = find(&cfg, IrOpcode::InvokeStatic);
        cfg.remove_insn(invoke).unwrap();
        assert!(cfg.instructions().all(|(_, i)| !i.opcode().is_move_result()));
        let ret = find(&cfg, IrOpcode::Return);
        assert!(cfg.remove_insn(ret).is_err());
    }

    #[test]
    fn test_remove_unreachable_blocks() {
        let ctx = DexContext::new();
        let mut cfg = build(&ctx, "((load-param v0) (if-eqz v0 :a) (const v1 1) (return v1) (:a) (const v2 2) (return v2))");
        let entry = cfg.entry();
        cfg.delete_succ_edges_if(entry, |e| e.kind().is_branch(), true);
        let (removed, may_shrink) = cfg.remove_unreachable_blocks();
        assert_eq!(removed, 2);
        assert!(may_shrink);
        cfg.recompute_registers_size();
        assert_eq!(cfg.registers_size(), 2);
    }
}
