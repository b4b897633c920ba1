//! Construction of a graph from linear code.

use std::collections::{HashMap, HashSet};

use crate::{
    cfg::{BlockId, ControlFlowGraph, EdgeKind},
    ir::{BranchTarget, CatchEntry, CatchId, Label, MethodItem, Payload},
    utils::graph::NodeId,
    Result,
};

/// A block under construction.
struct PendingBlock {
    items: Vec<MethodItem>,
    targets: Vec<BranchTarget>,
    catches: Vec<CatchId>,
    try_region: Option<CatchId>,
    has_content: bool,
}

impl PendingBlock {
    fn new(try_region: Option<CatchId>) -> Self {
        PendingBlock {
            items: Vec::new(),
            targets: Vec::new(),
            catches: Vec::new(),
            try_region,
            has_content: false,
        }
    }
}

#[derive(Default)]
struct Slicer {
    blocks: Vec<PendingBlock>,
    active_try: Option<CatchId>,
    force_new: bool,
}

impl Slicer {
    /// Starts a new block unless the current one is still empty, in which case it adopts
    /// the current try region.
    fn boundary(&mut self) {
        match self.blocks.last_mut() {
            Some(current) if !current.has_content && !self.force_new => {
                current.try_region = self.active_try;
            }
            _ => self.blocks.push(PendingBlock::new(self.active_try)),
        }
        self.force_new = false;
    }

    fn current(&mut self) -> &mut PendingBlock {
        if self.force_new || self.blocks.is_empty() {
            self.boundary();
        }
        let last = self.blocks.len() - 1;
        &mut self.blocks[last]
    }
}

impl ControlFlowGraph {
    /// Builds an editable graph from linear code.
    ///
    /// Blocks start at branch targets, catch entries and try boundaries, and after
    /// branches, returns, throws and (inside a try region) every instruction that may
    /// throw. Gotos, targets and try/catch markers are turned into edges and dropped from
    /// the blocks. Throw edges are added per handler of the covering region in chain order,
    /// stopping after a catch-all and skipping repeated catch types, then dropped again from
    /// blocks where no instruction may throw. Unreachable blocks are removed and the exit
    /// block is computed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for dangling labels, unbalanced or nested try
    /// markers, broken catch chains, duplicate switch keys, or code that falls off the end.
    pub fn build(items: &[MethodItem], registers_size: u32) -> Result<ControlFlowGraph> {
        let mut slicer = Slicer::default();
        let mut catch_entries: HashMap<CatchId, CatchEntry> = HashMap::new();

        for item in items {
            match item {
                MethodItem::Target(target) => {
                    slicer.boundary();
                    slicer.current().targets.push(*target);
                }
                MethodItem::TryStart(id) => {
                    if let Some(open) = slicer.active_try {
                        return Err(malformed_error!("try region {id} starts inside {open}"));
                    }
                    slicer.active_try = Some(*id);
                    slicer.boundary();
                }
                MethodItem::TryEnd(id) => {
                    if slicer.active_try != Some(*id) {
                        return Err(malformed_error!("try_end {id} without matching try_start"));
                    }
                    slicer.active_try = None;
                    slicer.boundary();
                }
                MethodItem::Catch(entry) => {
                    if catch_entries.insert(entry.id, entry.clone()).is_some() {
                        return Err(malformed_error!("catch entry {} defined twice", entry.id));
                    }
                    slicer.boundary();
                    slicer.current().catches.push(entry.id);
                }
                MethodItem::Opcode(insn) => {
                    let op = insn.opcode();
                    let in_try = slicer.active_try.is_some();
                    let current = slicer.current();
                    current.items.push(item.clone());
                    current.has_content = true;
                    if op.is_branch() || op.ends_control_flow() || (in_try && insn.may_throw()) {
                        slicer.force_new = true;
                    }
                }
                MethodItem::Position(_) | MethodItem::Debug(_) | MethodItem::SourceBlock(_) => {
                    let current = slicer.current();
                    current.items.push(item.clone());
                    current.has_content = true;
                }
            }
        }
        if let Some(open) = slicer.active_try {
            return Err(malformed_error!("try region {open} is never closed"));
        }

        let pending = slicer.blocks;
        let mut label_blocks: HashMap<Label, (usize, Option<i32>)> = HashMap::new();
        let mut catch_blocks: HashMap<CatchId, usize> = HashMap::new();
        for (i, block) in pending.iter().enumerate() {
            for target in &block.targets {
                if label_blocks.insert(target.label, (i, target.case_key)).is_some() {
                    return Err(malformed_error!("label {} defined twice", target.label));
                }
            }
            for &id in &block.catches {
                catch_blocks.insert(id, i);
            }
        }

        let mut cfg = ControlFlowGraph {
            blocks: Vec::with_capacity(pending.len()),
            edges: Vec::new(),
            entry: NodeId::new(0),
            exit: None,
            registers_size,
        };
        let count = pending.len().max(1);
        for _ in 0..count {
            cfg.create_block();
        }
        let id = NodeId::new;

        for (i, mut block) in pending.into_iter().enumerate() {
            let next = (i + 1 < count).then(|| id(i + 1));
            let last = block
                .items
                .iter()
                .rposition(|item| item.insn().is_some());
            let lookup = |label: &Label| {
                label_blocks
                    .get(label)
                    .copied()
                    .ok_or_else(|| malformed_error!("branch to undefined label {label}"))
            };
            let fallthrough = |next: Option<BlockId>| {
                next.ok_or_else(|| malformed_error!("block {i} falls off the end of the code"))
            };

            let mut edges: Vec<(BlockId, EdgeKind)> = Vec::new();
            match last.and_then(|l| block.items[l].insn().map(|insn| (l, insn.clone()))) {
                Some((l, insn)) if insn.opcode().is_goto() => {
                    let [label] = insn.targets() else {
                        return Err(malformed_error!("goto needs exactly one target"));
                    };
                    edges.push((id(lookup(label)?.0), EdgeKind::Goto));
                    block.items.remove(l);
                }
                Some((l, insn)) if insn.opcode().is_conditional_branch() => {
                    let [label] = insn.targets() else {
                        return Err(malformed_error!("`{}` needs exactly one target", insn.opcode()));
                    };
                    edges.push((id(lookup(label)?.0), EdgeKind::Branch { case_key: None }));
                    edges.push((fallthrough(next)?, EdgeKind::Goto));
                    if let Some(insn) = block.items[l].insn_mut() {
                        insn.set_payload(Payload::None);
                    }
                }
                Some((l, insn)) if insn.opcode().is_switch() => {
                    let mut keys = HashSet::new();
                    for label in insn.targets() {
                        let (target, key) = lookup(label)?;
                        let Some(key) = key else {
                            return Err(malformed_error!("switch target {label} has no case key"));
                        };
                        if !keys.insert(key) {
                            return Err(malformed_error!("duplicate switch case key {key}"));
                        }
                        edges.push((id(target), EdgeKind::Branch { case_key: Some(key) }));
                    }
                    edges.push((fallthrough(next)?, EdgeKind::Goto));
                    if let Some(insn) = block.items[l].insn_mut() {
                        insn.set_payload(Payload::None);
                    }
                }
                Some((_, insn)) if insn.opcode().ends_control_flow() => {}
                Some(_) => edges.push((fallthrough(next)?, EdgeKind::Goto)),
                None => {
                    if let Some(next) = next {
                        edges.push((next, EdgeKind::Goto));
                    }
                }
            }

            if let Some(head) = block.try_region {
                let mut seen_types = HashSet::new();
                let mut visited = HashSet::new();
                let mut cursor = Some(head);
                let mut index = 0;
                while let Some(cid) = cursor {
                    if !visited.insert(cid) {
                        return Err(malformed_error!("catch chain of {head} is cyclic"));
                    }
                    let entry = catch_entries
                        .get(&cid)
                        .ok_or_else(|| malformed_error!("catch entry {cid} is never defined"))?;
                    let handler = catch_blocks
                        .get(&cid)
                        .copied()
                        .ok_or_else(|| malformed_error!("catch entry {cid} has no handler"))?;
                    if seen_types.insert(entry.catch_type.clone()) {
                        edges.push((
                            id(handler),
                            EdgeKind::Throw {
                                catch_type: entry.catch_type.clone(),
                                index,
                            },
                        ));
                        index += 1;
                    }
                    if entry.catch_type.is_none() {
                        break;
                    }
                    cursor = entry.next;
                }
            }

            let src = id(i);
            cfg.block_mut(src).items = block.items;
            for (target, kind) in edges {
                cfg.add_edge(src, target, kind);
            }
        }

        // Blocks with nothing that may throw keep no handler edges.
        for block in cfg.block_ids() {
            cfg.prune_throw_edges(block);
        }
        cfg.remove_unreachable_blocks();
        cfg.calculate_exit_block();
        log::trace!(
            "built cfg with {} blocks and {} edges",
            cfg.num_blocks(),
            cfg.num_edges()
        );
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ir::parse_code, model::DexContext, Error};

    fn build(text: &str) -> ControlFlowGraph {
        let ctx = DexContext::new();
        let code = parse_code(&ctx, text).unwrap();
        ControlFlowGraph::build(code.items(), code.registers_size()).unwrap()
    }

    #[test]
    fn test_if_creates_branch_and_goto() {
        let cfg = build("((load-param v0) (if-eqz v0 :t) (const v1 0) (return v1) (:t) (const v1 1) (return v1))");
        let entry = cfg.entry();
        assert_eq!(cfg.branch_edges(entry).len(), 1);
        assert!(cfg.goto_edge(entry).is_some());
        let (_, branch) = cfg.block(entry).last_insn().unwrap();
        assert!(branch.targets().is_empty());
        cfg.sanity_check().unwrap();
    }

    #[test]
    fn test_goto_is_removed() {
        let cfg = build("((goto :a) (:b) (return-void) (:a) (goto :b))");
        assert!(cfg.instructions().all(|(_, i)| !i.opcode().is_goto()));
        assert_eq!(cfg.num_opcodes(), 1);
        cfg.sanity_check().unwrap();
    }

    #[test]
    fn test_switch_case_keys() {
        let cfg = build(
            "((load-param v0) (switch v0 (:a :b)) (return-void) (:a 1) (return-void) (:b 5) (return-void))",
        );
        let keys: Vec<_> = cfg
            .branch_edges(cfg.entry())
            .into_iter()
            .map(|e| cfg.edge(e).kind().case_key())
            .collect();
        assert_eq!(keys, vec![Some(1), Some(5)]);
        cfg.sanity_check().unwrap();
    }

    #[test]
    fn test_throw_edges_follow_catch_chain() {
        let cfg = build(
            r#"((load-param v0)
                (.try_start c0)
                (invoke-static (v0) "LFoo;.a:(I)V")
                (invoke-static (v0) "LFoo;.b:(I)V")
                (.try_end c0)
                (return-void)
                (.catch (c0 c1) "Ljava/lang/Error;")
                (return-void)
                (.catch (c1 c2))
                (return-void)
                (.catch (c2) "Ljava/lang/Exception;")
                (return-void))"#,
        );
        let throwing: Vec<_> = cfg.blocks().filter(|b| b.can_throw()).map(|b| b.id()).collect();
        assert_eq!(throwing.len(), 2);
        for &b in &throwing {
            let edges = cfg.throw_edges(b);
            // The handler after the catch-all is never reached.
            assert_eq!(edges.len(), 2);
            assert!(cfg.edge(edges[1]).kind().is_catch_all());
        }
        assert_eq!(cfg.throw_signature(throwing[0]), cfg.throw_signature(throwing[1]));
        let real_blocks = cfg.blocks().filter(|b| !cfg.is_ghost(b.id())).count();
        assert_eq!(real_blocks, 6);
        cfg.sanity_check().unwrap();
    }

    #[test]
    fn test_move_result_pseudo_starts_successor_in_try() {
        let cfg = build(
            r#"((.try_start c0)
                (const-string "x")
                (move-result-pseudo-object v0)
                (.try_end c0)
                (return-object v0)
                (.catch (c0))
                (move-exception v1)
                (throw v1))"#,
        );
        let pos = cfg
            .instructions()
            .find(|(_, i)| i.opcode() == crate::ir::IrOpcode::ConstString)
            .map(|(p, _)| p)
            .unwrap();
        let follower = cfg.move_result_of(pos).unwrap();
        assert_ne!(follower.block(), pos.block());
        assert!(cfg.block(follower.block()).starts_with_move_result());
        cfg.sanity_check().unwrap();
    }

    #[test]
    fn test_malformed_inputs() {
        use crate::ir::{CatchId, IrInstruction, IrOpcode};
        let items = vec![MethodItem::Opcode(
            IrInstruction::new(IrOpcode::Const).with_dest(0).with_literal(0),
        )];
        assert!(matches!(
            ControlFlowGraph::build(&items, 1),
            Err(Error::Malformed { .. })
        ));
        let items = vec![
            MethodItem::TryStart(CatchId(3)),
            MethodItem::Opcode(IrInstruction::new(IrOpcode::ReturnVoid)),
        ];
        match ControlFlowGraph::build(&items, 0) {
            Err(Error::Malformed { message, .. }) => {
                assert_eq!(message, "try region c3 is never closed");
            }
            other => panic!("expected a malformed error, got {other:?}"),
        }
    }

    #[test]
    fn test_try_block_without_throwers_has_no_handler_edges() {
        let cfg = build(
            r#"((load-param v0)
                (.try_start c0)
                (invoke-static (v0) "LA;.f:(I)V")
                (const v1 1)
                (move v2 v1)
                (div-int/lit v3 v1 4)
                (.try_end c0)
                (return-void)
                (.catch (c0) "Ljava/lang/Exception;")
                (return-void))"#,
        );
        let (call, _) = cfg.instructions().find(|(_, i)| i.opcode().is_invoke()).unwrap();
        let (quiet, _) = cfg
            .instructions()
            .find(|(_, i)| i.opcode() == crate::ir::IrOpcode::DivIntLit)
            .unwrap();
        assert_ne!(call.block(), quiet.block());
        assert_eq!(cfg.throw_edges(call.block()).len(), 1);
        assert!(cfg.throw_edges(quiet.block()).is_empty());
        cfg.sanity_check().unwrap();

        let printed = crate::ir::print_items(&cfg.linearize().unwrap());
        let end = printed.find(".try_end").unwrap();
        assert!(end < printed.find("(const v1 1)").unwrap(), "{printed}");
    }
}
