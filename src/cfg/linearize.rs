//! Lowering a graph back to a linear instruction stream.

use std::collections::{HashMap, HashSet};

use crate::{
    cfg::{BlockId, ControlFlowGraph, EdgeKind},
    ir::{BranchTarget, CatchEntry, CatchId, IrInstruction, IrOpcode, Label, MethodItem, Payload},
    model::DexType,
    utils::BitSet,
    Result,
};

type ThrowSignature = Vec<(Option<DexType>, BlockId)>;

/// Label assignment for branch and goto targets.
#[derive(Default)]
struct Labels {
    plain: HashMap<BlockId, Label>,
    cases: HashMap<(BlockId, i32), Label>,
}

impl ControlFlowGraph {
    /// Produces linear code with the same behavior as the graph.
    ///
    /// Blocks are laid out as goto chains, started in reverse postorder from the entry, so
    /// that most gotos fall through and are omitted. Branch targets get `Target` items
    /// (one per switch case), and every run of consecutive blocks with the same throw
    /// edges is wrapped in a try region whose catch chain is emitted once per distinct
    /// handler list. Ghost blocks and unreachable blocks produce nothing.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidCfg`] if the throw edges of a block are inconsistent,
    /// a block has no continuation, or a `move-result*` cannot directly follow its
    /// producer.
    pub fn linearize(&self) -> Result<Vec<MethodItem>> {
        self.check_throw_edges()?;
        let order = self.block_order();
        let labels = self.assign_labels(&order);
        let (heads, handler_entries) = self.catch_chains(&order);

        let mut out = Vec::new();
        let mut open_try: Option<CatchId> = None;
        for (i, &b) in order.iter().enumerate() {
            let block = self.block(b);
            let sig = self.throw_signature(b);
            let head = (!sig.is_empty()).then(|| heads[&sig]);

            if let Some(open) = open_try {
                if head != Some(open) {
                    out.push(MethodItem::TryEnd(open));
                    open_try = None;
                }
            }
            if let Some(entries) = handler_entries.get(&b) {
                out.extend(entries.iter().cloned().map(MethodItem::Catch));
            }
            if let Some(&label) = labels.plain.get(&b) {
                out.push(MethodItem::Target(BranchTarget { label, case_key: None }));
            }
            let mut cases: Vec<_> = labels
                .cases
                .iter()
                .filter(|((target, _), _)| *target == b)
                .map(|(&(_, key), &label)| (key, label))
                .collect();
            cases.sort_unstable();
            for (key, label) in cases {
                out.push(MethodItem::Target(BranchTarget { label, case_key: Some(key) }));
            }
            if open_try.is_none() {
                if let Some(head) = head {
                    out.push(MethodItem::TryStart(head));
                    open_try = Some(head);
                }
            }

            let branch_at = block.branch_insn().map(|(index, _)| index);
            for (index, item) in block.items.iter().enumerate() {
                match (item, branch_at) {
                    (MethodItem::Opcode(insn), Some(at)) if at == index => {
                        out.push(MethodItem::Opcode(self.branch_with_targets(b, insn, &labels)));
                    }
                    _ => out.push(item.clone()),
                }
            }

            let next = order.get(i + 1).copied();
            match self.goto_target(b) {
                Some(target) if next == Some(target) => {}
                Some(target) => {
                    if self.block(target).starts_with_move_result() {
                        return Err(invalid_cfg!("{target} is separated from its result producer"));
                    }
                    let label = labels.plain[&target];
                    out.push(MethodItem::Opcode(
                        IrInstruction::new(IrOpcode::Goto).with_payload(Payload::Targets(vec![label])),
                    ));
                }
                None => {
                    let terminated = block
                        .last_insn()
                        .is_some_and(|(_, insn)| insn.opcode().ends_control_flow());
                    if !terminated {
                        return Err(invalid_cfg!("{b} has no continuation"));
                    }
                }
            }
        }
        if let Some(open) = open_try {
            out.push(MethodItem::TryEnd(open));
        }
        log::trace!("linearized {} blocks into {} items", order.len(), out.len());
        Ok(out)
    }

    /// Verifies that every block's throw edges describe a well-formed handler list.
    fn check_throw_edges(&self) -> Result<()> {
        for block in self.blocks() {
            let b = block.id();
            let edges = self.throw_edges(b);
            if edges.is_empty() {
                continue;
            }
            if !block.can_throw() {
                return Err(invalid_cfg!("{b} has throw edges but cannot throw"));
            }
            let mut indices = HashSet::new();
            let mut types = HashSet::new();
            for (n, &e) in edges.iter().enumerate() {
                let EdgeKind::Throw { catch_type, index } = &self.edge(e).kind else {
                    continue;
                };
                if !indices.insert(*index) {
                    return Err(invalid_cfg!("{b} has two handlers at index {index}"));
                }
                if !types.insert(catch_type.clone()) {
                    return Err(invalid_cfg!("{b} catches the same type twice"));
                }
                if catch_type.is_none() && n + 1 != edges.len() {
                    return Err(invalid_cfg!("{b} has handlers after its catch-all"));
                }
            }
        }
        Ok(())
    }

    /// Lays out reachable blocks as goto chains started in reverse postorder.
    fn block_order(&self) -> Vec<BlockId> {
        let mut placed = BitSet::new(self.blocks.len());
        let mut order = Vec::new();
        for start in self.reverse_postorder() {
            let mut current = start;
            while !self.is_ghost(current) && placed.insert(current.index()) {
                order.push(current);
                match self.goto_target(current) {
                    Some(next) => current = next,
                    None => break,
                }
            }
        }
        order
    }

    fn assign_labels(&self, order: &[BlockId]) -> Labels {
        let mut plain = HashSet::new();
        let mut cases: HashMap<BlockId, Vec<i32>> = HashMap::new();
        for (i, &b) in order.iter().enumerate() {
            for e in self.branch_edges(b) {
                let edge = self.edge(e);
                match edge.kind.case_key() {
                    Some(key) => cases.entry(edge.target).or_default().push(key),
                    None => {
                        plain.insert(edge.target);
                    }
                }
            }
            if let Some(target) = self.goto_target(b) {
                if order.get(i + 1) != Some(&target) {
                    plain.insert(target);
                }
            }
        }

        let mut labels = Labels::default();
        let mut next = 0;
        let mut fresh = || {
            let label = Label(next);
            next += 1;
            label
        };
        for &b in order {
            if plain.contains(&b) {
                labels.plain.insert(b, fresh());
            }
            if let Some(keys) = cases.get_mut(&b) {
                keys.sort_unstable();
                keys.dedup();
                for &key in keys.iter() {
                    labels.cases.insert((b, key), fresh());
                }
            }
        }
        labels
    }

    /// Assigns one catch chain per distinct throw signature, in layout order.
    fn catch_chains(
        &self,
        order: &[BlockId],
    ) -> (HashMap<ThrowSignature, CatchId>, HashMap<BlockId, Vec<CatchEntry>>) {
        let mut heads = HashMap::new();
        let mut entries: HashMap<BlockId, Vec<CatchEntry>> = HashMap::new();
        let mut next_id = 0u32;
        for &b in order {
            let sig = self.throw_signature(b);
            if sig.is_empty() || heads.contains_key(&sig) {
                continue;
            }
            let base = next_id;
            next_id += sig.len() as u32;
            for (i, (catch_type, handler)) in sig.iter().enumerate() {
                let id = CatchId(base + i as u32);
                let next = (i + 1 < sig.len()).then(|| CatchId(id.0 + 1));
                entries.entry(*handler).or_default().push(CatchEntry {
                    id,
                    catch_type: catch_type.clone(),
                    next,
                });
            }
            heads.insert(sig, CatchId(base));
        }
        (heads, entries)
    }

    fn branch_with_targets(&self, block: BlockId, insn: &IrInstruction, labels: &Labels) -> IrInstruction {
        let mut targets: Vec<(Option<i32>, Label)> = self
            .branch_edges(block)
            .into_iter()
            .map(|e| {
                let edge = self.edge(e);
                let key = edge.kind.case_key();
                let label = match key {
                    Some(k) => labels.cases[&(edge.target, k)],
                    None => labels.plain[&edge.target],
                };
                (key, label)
            })
            .collect();
        targets.sort_unstable();
        insn.clone()
            .with_payload(Payload::Targets(targets.into_iter().map(|(_, l)| l).collect()))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        cfg::{ControlFlowGraph, EdgeKind},
        ir::{parse_code, print_items, IrOpcode, MethodItem},
        model::DexContext,
        Error,
    };

    fn round_trip(ctx: &DexContext, text: &str) -> String {
        let code = parse_code(ctx, text).unwrap();
        let cfg = ControlFlowGraph::build(code.items(), code.registers_size()).unwrap();
        print_items(&cfg.linearize().unwrap())
    }

    fn canonical(ctx: &DexContext, text: &str) -> String {
        print_items(parse_code(ctx, text).unwrap().items())
    }

    #[test]
    fn test_straight_line_and_diamond() {
        let ctx = DexContext::new();
        let text = "((load-param v0) (if-eqz v0 :a) (const v1 0) (:a) (return v1))";
        assert_eq!(round_trip(&ctx, text), canonical(&ctx, text));
    }

    #[test]
    fn test_explicit_goto_for_non_adjacent_target() {
        let ctx = DexContext::new();
        let text = "((load-param v0) (if-eqz v0 :t) (const v1 0) (:end) (return v1) (:t) (const v1 1) (goto :end))";
        assert_eq!(round_trip(&ctx, text), canonical(&ctx, text));
    }

    #[test]
    fn test_switch_targets_carry_keys() {
        let ctx = DexContext::new();
        let text = "((load-param v0) (switch v0 (:a :b)) (return-void) (:a 1) (:b 2) (const v0 3) (return-void))";
        let printed = round_trip(&ctx, text);
        assert_eq!(printed, canonical(&ctx, text));
    }

    #[test]
    fn test_try_region_is_stable() {
        let ctx = DexContext::new();
        let text = r#"((load-param v0)
            (.try_start c0)
            (invoke-static (v0) "LFoo;.a:(I)V")
            (invoke-static (v0) "LFoo;.b:(I)V")
            (.try_end c0)
            (return-void)
            (.catch (c0 c1) "Ljava/lang/Error;")
            (return-void)
            (.catch (c1))
            (const v0 1)
            (return-void))"#;
        let once = round_trip(&ctx, text);
        let twice = round_trip(&ctx, &once);
        assert_eq!(once, twice);

        let code = parse_code(&ctx, &once).unwrap();
        let cfg = ControlFlowGraph::build(code.items(), code.registers_size()).unwrap();
        let invokes: Vec<_> = cfg
            .instructions()
            .filter(|(_, i)| i.opcode().is_invoke())
            .map(|(p, _)| p.block())
            .collect();
        assert_eq!(invokes.len(), 2);
        assert_eq!(cfg.throw_signature(invokes[0]), cfg.throw_signature(invokes[1]));
        assert_eq!(cfg.throw_edges(invokes[0]).len(), 2);
    }

    #[test]
    fn test_catch_chain_emitted_once() {
        let ctx = DexContext::new();
        let text = r#"((load-param v0)
            (.try_start c0)
            (invoke-static (v0) "LFoo;.a:(I)V")
            (const v1 0)
            (invoke-static (v0) "LFoo;.b:(I)V")
            (.try_end c0)
            (return-void)
            (.catch (c0))
            (return-void))"#;
        let code = parse_code(&ctx, text).unwrap();
        let cfg = ControlFlowGraph::build(code.items(), code.registers_size()).unwrap();
        let items = cfg.linearize().unwrap();
        let catches = items.iter().filter(|i| matches!(i, MethodItem::Catch(_))).count();
        assert_eq!(catches, 1);
        let starts = items.iter().filter(|i| matches!(i, MethodItem::TryStart(_))).count();
        let ends = items.iter().filter(|i| matches!(i, MethodItem::TryEnd(_))).count();
        assert_eq!(starts, ends);
    }

    #[test]
    fn test_inconsistent_throw_edges_rejected() {
        let ctx = DexContext::new();
        let code = parse_code(&ctx, "((load-param v0) (const v1 1) (return v1))").unwrap();
        let mut cfg = ControlFlowGraph::build(code.items(), code.registers_size()).unwrap();
        let handler = cfg.create_block();
        cfg.push_back(handler, vec![crate::ir::IrInstruction::new(IrOpcode::ReturnVoid)])
            .unwrap();
        let entry = cfg.entry();
        cfg.add_edge(entry, handler, EdgeKind::Throw { catch_type: None, index: 0 });
        assert!(matches!(cfg.linearize(), Err(Error::InvalidCfg(_))));
    }
}
