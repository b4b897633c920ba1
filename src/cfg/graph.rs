//! The control-flow graph container and its read-side operations.

use crate::{
    cfg::{Block, BlockId, Edge, EdgeId, EdgeKind, InsnPos},
    ir::{IrInstruction, IrOpcode, MethodItem, Reg},
    utils::{
        graph::{algorithms, GraphBase, NodeId, Predecessors, RootedGraph, Successors},
        BitSet,
    },
    Result,
};

/// An editable control-flow graph of one method body.
///
/// The graph owns two slab arenas, one for blocks and one for edges; neighbors refer to
/// each other by [`BlockId`] and [`EdgeId`]. Ids of removed blocks and edges are retired,
/// never reused, so a stale id is detected instead of silently aliasing a new node.
///
/// # Invariants
///
/// Between public operations:
///
/// - every edge appears exactly in its source's `succs` and its target's `preds`
/// - a block has at most one [`EdgeKind::Goto`] successor
/// - the outgoing non-throw edges of a block are `{}` (it ends in `return`/`throw`),
///   `{Goto}`, `{Goto, Branch}` (`if-*`), or `{Goto, Branch*}` (`switch`, distinct case keys)
/// - throw edges leave only blocks that contain an instruction that may throw, and target
///   catch blocks
/// - a `move-result*` or `move-result-pseudo*` is the first instruction of the goto
///   successor when its producer ends a block
///
/// [`ControlFlowGraph::sanity_check`] verifies these.
///
/// # Examples
///
/// ```rust
/// use redex::{ir::parse_code, model::DexContext};
///
/// let ctx = DexContext::new();
/// let mut code = parse_code(&ctx, "((load-param v0) (if-eqz v0 :a) (const v0 1) (:a) (return v0))")?;
/// code.build_cfg()?;
/// let cfg = code.cfg().unwrap();
/// assert_eq!(cfg.num_blocks(), 3);
/// cfg.sanity_check()?;
/// # Ok::<(), redex::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    pub(crate) blocks: Vec<Option<Block>>,
    pub(crate) edges: Vec<Option<Edge>>,
    pub(crate) entry: BlockId,
    pub(crate) exit: Option<BlockId>,
    pub(crate) registers_size: u32,
}

impl ControlFlowGraph {
    /// Creates a graph with a single empty entry block.
    #[must_use]
    pub fn new(registers_size: u32) -> Self {
        let mut cfg = ControlFlowGraph {
            blocks: Vec::new(),
            edges: Vec::new(),
            entry: NodeId::new(0),
            exit: None,
            registers_size,
        };
        cfg.entry = cfg.create_block();
        cfg
    }

    /// Returns the entry block.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// Sets the entry block.
    pub fn set_entry(&mut self, block: BlockId) {
        self.entry = block;
    }

    /// Returns the exit block, if one has been computed.
    ///
    /// See [`ControlFlowGraph::calculate_exit_block`].
    #[must_use]
    pub fn exit(&self) -> Option<BlockId> {
        self.exit
    }

    /// Returns the number of live blocks.
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.blocks.iter().flatten().count()
    }

    /// Returns the number of live edges.
    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.edges.iter().flatten().count()
    }

    /// Iterates over live blocks by ascending id.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().flatten()
    }

    /// Returns the ids of live blocks by ascending id.
    #[must_use]
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks().map(Block::id).collect()
    }

    /// Returns the block with the given id, if it is live.
    #[must_use]
    pub fn get_block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.index()).and_then(Option::as_ref)
    }

    /// Returns the block with the given id.
    ///
    /// # Panics
    ///
    /// Panics if the block was removed.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        match self.get_block(id) {
            Some(block) => block,
            None => panic!("block {id} is not part of this graph"),
        }
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> &mut Block {
        match self.blocks.get_mut(id.index()).and_then(Option::as_mut) {
            Some(block) => block,
            None => panic!("block {id} is not part of this graph"),
        }
    }

    /// Returns the edge with the given id.
    ///
    /// # Panics
    ///
    /// Panics if the edge was deleted.
    #[must_use]
    pub fn edge(&self, id: EdgeId) -> &Edge {
        match self.edges.get(id.index()).and_then(Option::as_ref) {
            Some(edge) => edge,
            None => panic!("edge {id:?} is not part of this graph"),
        }
    }

    /// Returns `true` if the edge is live.
    #[must_use]
    pub fn has_edge(&self, id: EdgeId) -> bool {
        self.edges.get(id.index()).is_some_and(Option::is_some)
    }

    /// Iterates over live edges.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (EdgeId(i as u32), e)))
    }

    /// Creates a fresh block with no items and no edges.
    pub fn create_block(&mut self) -> BlockId {
        let id = NodeId::new(self.blocks.len());
        self.blocks.push(Some(Block::new(id)));
        id
    }

    /// Adds an edge and returns its id.
    pub fn add_edge(&mut self, src: BlockId, target: BlockId, kind: EdgeKind) -> EdgeId {
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Some(Edge { src, target, kind }));
        self.block_mut(src).succs.push(id);
        self.block_mut(target).preds.push(id);
        id
    }

    /// Deletes an edge, unlinking it from both endpoints.
    pub fn delete_edge(&mut self, id: EdgeId) {
        let Some(edge) = self.edges.get_mut(id.index()).and_then(Option::take) else {
            return;
        };
        if let Some(Some(src)) = self.blocks.get_mut(edge.src.index()) {
            src.succs.retain(|&e| e != id);
        }
        if let Some(Some(target)) = self.blocks.get_mut(edge.target.index()) {
            target.preds.retain(|&e| e != id);
        }
    }

    /// Redirects an edge to a new target.
    pub fn set_edge_target(&mut self, id: EdgeId, target: BlockId) {
        let old = self.edge(id).target;
        if old == target {
            return;
        }
        self.block_mut(old).preds.retain(|&e| e != id);
        self.block_mut(target).preds.push(id);
        if let Some(Some(edge)) = self.edges.get_mut(id.index()) {
            edge.target = target;
        }
    }

    /// Moves an edge to a new source.
    pub fn set_edge_source(&mut self, id: EdgeId, src: BlockId) {
        let old = self.edge(id).src;
        if old == src {
            return;
        }
        self.block_mut(old).succs.retain(|&e| e != id);
        self.block_mut(src).succs.push(id);
        if let Some(Some(edge)) = self.edges.get_mut(id.index()) {
            edge.src = src;
        }
    }

    /// Changes the kind of an edge.
    pub fn set_edge_kind(&mut self, id: EdgeId, kind: EdgeKind) {
        if let Some(Some(edge)) = self.edges.get_mut(id.index()) {
            edge.kind = kind;
        }
    }

    /// Returns the incoming edges of `block` that satisfy `predicate`.
    pub fn pred_edges_if<F>(&self, block: BlockId, mut predicate: F) -> Vec<EdgeId>
    where
        F: FnMut(&Edge) -> bool,
    {
        self.block(block)
            .preds
            .iter()
            .copied()
            .filter(|&e| predicate(self.edge(e)))
            .collect()
    }

    /// Returns the outgoing edges of `block` that satisfy `predicate`.
    pub fn succ_edges_if<F>(&self, block: BlockId, mut predicate: F) -> Vec<EdgeId>
    where
        F: FnMut(&Edge) -> bool,
    {
        self.block(block)
            .succs
            .iter()
            .copied()
            .filter(|&e| predicate(self.edge(e)))
            .collect()
    }

    /// Returns the goto edge leaving `block`.
    #[must_use]
    pub fn goto_edge(&self, block: BlockId) -> Option<EdgeId> {
        self.block(block)
            .succs
            .iter()
            .copied()
            .find(|&e| self.edge(e).kind.is_goto())
    }

    /// Returns the target of the goto edge leaving `block`.
    #[must_use]
    pub fn goto_target(&self, block: BlockId) -> Option<BlockId> {
        self.goto_edge(block).map(|e| self.edge(e).target)
    }

    /// Returns the branch edges leaving `block`.
    #[must_use]
    pub fn branch_edges(&self, block: BlockId) -> Vec<EdgeId> {
        self.succ_edges_if(block, |e| e.kind.is_branch())
    }

    /// Returns the throw edges leaving `block`, ordered by handler index.
    #[must_use]
    pub fn throw_edges(&self, block: BlockId) -> Vec<EdgeId> {
        let mut edges = self.succ_edges_if(block, |e| e.kind.is_throw());
        edges.sort_by_key(|&e| self.edge(e).kind.throw_index());
        edges
    }

    /// Returns the distinct successor blocks of `block`, in edge order.
    #[must_use]
    pub fn succ_blocks(&self, block: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        for &e in &self.block(block).succs {
            let t = self.edge(e).target;
            if !out.contains(&t) {
                out.push(t);
            }
        }
        out
    }

    /// Returns the distinct predecessor blocks of `block`, in edge order.
    #[must_use]
    pub fn pred_blocks(&self, block: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        for &e in &self.block(block).preds {
            let s = self.edge(e).src;
            if !out.contains(&s) {
                out.push(s);
            }
        }
        out
    }

    /// Returns the `(catch_type, target)` list of `block`'s throw edges in handler order.
    ///
    /// Two blocks with equal lists are covered by the same try region.
    #[must_use]
    pub fn throw_signature(
        &self,
        block: BlockId,
    ) -> Vec<(Option<crate::model::DexType>, BlockId)> {
        self.throw_edges(block)
            .into_iter()
            .map(|e| {
                let edge = self.edge(e);
                match &edge.kind {
                    EdgeKind::Throw { catch_type, .. } => (catch_type.clone(), edge.target),
                    _ => (None, edge.target),
                }
            })
            .collect()
    }

    /// Returns `true` if `block` is entered by exception dispatch.
    #[must_use]
    pub fn is_catch(&self, block: BlockId) -> bool {
        self.block(block)
            .preds
            .iter()
            .any(|&e| self.edge(e).kind.is_throw())
    }

    /// Returns `true` if `block` is the synthesized exit block.
    #[must_use]
    pub fn is_ghost(&self, block: BlockId) -> bool {
        let b = self.block(block);
        b.items.is_empty()
            && !b.preds.is_empty()
            && b.preds.iter().all(|&e| self.edge(e).kind.is_ghost())
    }

    /// Returns the number of registers.
    #[must_use]
    pub fn registers_size(&self) -> u32 {
        self.registers_size
    }

    /// Sets the number of registers.
    pub fn set_registers_size(&mut self, size: u32) {
        self.registers_size = size;
    }

    /// Reserves a fresh register.
    pub fn allocate_temp(&mut self) -> Reg {
        let reg = self.registers_size;
        self.registers_size += 1;
        reg
    }

    /// Reserves a fresh register pair.
    pub fn allocate_wide_temp(&mut self) -> Reg {
        let reg = self.registers_size;
        self.registers_size += 2;
        reg
    }

    /// Recomputes the register count from the registers the instructions touch.
    pub fn recompute_registers_size(&mut self) {
        self.registers_size = self
            .instructions()
            .map(|(_, insn)| insn.max_reg_bound())
            .max()
            .unwrap_or(0);
    }

    /// Returns a structural copy with identical block and edge ids.
    #[must_use]
    pub fn deep_copy(&self) -> ControlFlowGraph {
        self.clone()
    }

    /// Iterates over every instruction in block-id order.
    #[must_use]
    pub fn instructions(&self) -> InstructionIterator<'_> {
        InstructionIterator {
            cfg: self,
            block: 0,
            index: 0,
        }
    }

    /// Iterates mutably over every instruction in block-id order.
    pub fn instructions_mut(&mut self) -> impl Iterator<Item = (InsnPos, &mut IrInstruction)> {
        self.blocks.iter_mut().flatten().flat_map(|block| {
            let id = block.id;
            block
                .items
                .iter_mut()
                .enumerate()
                .filter_map(move |(i, item)| item.insn_mut().map(|insn| (InsnPos::new(id, i), insn)))
        })
    }

    /// Returns the instruction at `pos`.
    ///
    /// # Panics
    ///
    /// Panics if `pos` does not name an instruction.
    #[must_use]
    pub fn insn(&self, pos: InsnPos) -> &IrInstruction {
        match self.block(pos.block).items.get(pos.index).and_then(MethodItem::insn) {
            Some(insn) => insn,
            None => panic!("{pos:?} is not an instruction"),
        }
    }

    /// Returns the instruction at `pos` mutably.
    ///
    /// # Panics
    ///
    /// Panics if `pos` does not name an instruction.
    pub fn insn_mut(&mut self, pos: InsnPos) -> &mut IrInstruction {
        match self
            .block_mut(pos.block)
            .items
            .get_mut(pos.index)
            .and_then(MethodItem::insn_mut)
        {
            Some(insn) => insn,
            None => panic!("{pos:?} is not an instruction"),
        }
    }

    /// Returns the instruction at `pos`, if `pos` names one.
    #[must_use]
    pub fn get_insn(&self, pos: InsnPos) -> Option<&IrInstruction> {
        self.get_block(pos.block)?.items.get(pos.index)?.insn()
    }

    /// Returns the position of the `move-result*`/`move-result-pseudo*` that receives the
    /// result of the instruction at `pos`.
    ///
    /// The follower is either the next instruction of the same block or, when `pos` ends
    /// its block, the first instruction of the goto successor.
    #[must_use]
    pub fn move_result_of(&self, pos: InsnPos) -> Option<InsnPos> {
        let insn = self.get_insn(pos)?;
        let op = insn.opcode();
        if !op.has_move_result() && !op.has_move_result_pseudo() {
            return None;
        }
        let block = self.block(pos.block);
        let next = block.items[pos.index + 1..]
            .iter()
            .enumerate()
            .find_map(|(i, item)| item.insn().map(|insn| (pos.index + 1 + i, insn)));
        let (candidate, follower) = match next {
            Some((i, follower)) => (InsnPos::new(pos.block, i), follower),
            None => {
                let succ = self.goto_target(pos.block)?;
                let (i, follower) = self.block(succ).first_insn()?;
                (InsnPos::new(succ, i), follower)
            }
        };
        let fop = follower.opcode();
        let matches = if op.has_move_result() {
            fop.is_move_result()
        } else {
            fop.is_move_result_pseudo()
        };
        matches.then_some(candidate)
    }

    /// Returns the positions of the `load-param*` instructions at the start of the entry
    /// block.
    #[must_use]
    pub fn param_positions(&self) -> Vec<InsnPos> {
        self.block(self.entry)
            .insns()
            .take_while(|(_, insn)| insn.opcode().is_load_param())
            .map(|(i, _)| InsnPos::new(self.entry, i))
            .collect()
    }

    /// Returns the blocks ending in `return*`.
    #[must_use]
    pub fn return_blocks(&self) -> Vec<BlockId> {
        self.blocks()
            .filter(|b| b.ends_with_return())
            .map(Block::id)
            .collect()
    }

    /// Returns the number of non-internal instructions.
    #[must_use]
    pub fn num_opcodes(&self) -> usize {
        self.blocks().map(Block::num_opcodes).sum()
    }

    /// Returns the estimated serialized size in code units.
    ///
    /// Gotos that linearization may materialize are not counted.
    #[must_use]
    pub fn estimate_code_units(&self) -> usize {
        self.blocks().map(|b| self.block_code_units(b.id())).sum()
    }

    /// Returns the estimated serialized size of one block, switch cases included.
    #[must_use]
    pub fn block_code_units(&self, block: BlockId) -> usize {
        let cases = self.switch_cases(block);
        self.block(block)
            .insns()
            .map(|(_, i)| i.size_with_cases(cases))
            .sum()
    }

    /// Returns the number of case edges of the switch ending `block`, or 0.
    #[must_use]
    pub fn switch_cases(&self, block: BlockId) -> usize {
        match self.block(block).last_insn() {
            Some((_, insn)) if insn.opcode().is_switch() => self.branch_edges(block).len(),
            _ => 0,
        }
    }

    /// Returns the set of blocks reachable from the entry, following all edge kinds.
    #[must_use]
    pub fn visit(&self) -> BitSet {
        let mut seen = BitSet::new(self.blocks.len());
        let mut stack = vec![self.entry];
        seen.insert(self.entry.index());
        while let Some(b) = stack.pop() {
            for &e in &self.block(b).succs {
                let t = self.edge(e).target;
                if seen.insert(t.index()) {
                    stack.push(t);
                }
            }
        }
        seen
    }

    /// Returns the immediate dominator of every block, indexed by block id.
    ///
    /// The entry maps to itself; unreachable and removed blocks map to `None`.
    #[must_use]
    pub fn immediate_dominators(&self) -> Vec<Option<BlockId>> {
        algorithms::immediate_dominators(self)
    }

    /// Returns the reachable blocks in reverse postorder from the entry.
    #[must_use]
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        algorithms::reverse_postorder(self, self.entry)
    }

    /// Recomputes the exit block.
    ///
    /// A single block without successors becomes the exit. Several such blocks get a fresh
    /// empty exit block linked from each by a ghost edge. Any previous ghost exit is
    /// removed first.
    pub fn calculate_exit_block(&mut self) {
        self.remove_ghost_exit_block();
        let exits: Vec<BlockId> = self
            .blocks()
            .filter(|b| {
                b.succs
                    .iter()
                    .all(|&e| self.edge(e).kind.is_throw())
                    && (b.ends_with_return() || b.ends_with_throw())
            })
            .map(Block::id)
            .collect();
        self.exit = match exits.as_slice() {
            [] => None,
            [single] => Some(*single),
            _ => {
                let ghost = self.create_block();
                for b in exits {
                    self.add_edge(b, ghost, EdgeKind::Ghost);
                }
                Some(ghost)
            }
        };
    }

    /// Removes a synthesized ghost exit block, if present.
    pub fn remove_ghost_exit_block(&mut self) {
        if let Some(exit) = self.exit {
            if self.get_block(exit).is_some() && self.is_ghost(exit) {
                self.remove_block(exit);
            }
        }
        self.exit = None;
    }

    /// Verifies the structural invariants.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidCfg`] describing the first violation found.
    pub fn sanity_check(&self) -> Result<()> {
        if self.get_block(self.entry).is_none() {
            return Err(invalid_cfg!("entry block {} was removed", self.entry));
        }
        for (id, edge) in self.edges() {
            let src = self
                .get_block(edge.src)
                .ok_or_else(|| invalid_cfg!("{id:?} leaves removed block {}", edge.src))?;
            let target = self
                .get_block(edge.target)
                .ok_or_else(|| invalid_cfg!("{id:?} enters removed block {}", edge.target))?;
            if src.succs.iter().filter(|&&e| e == id).count() != 1 {
                return Err(invalid_cfg!("{id:?} not listed once in succs of {}", edge.src));
            }
            if target.preds.iter().filter(|&&e| e == id).count() != 1 {
                return Err(invalid_cfg!("{id:?} not listed once in preds of {}", edge.target));
            }
        }
        for block in self.blocks() {
            let b = block.id;
            for &e in block.succs.iter().chain(&block.preds) {
                if !self.has_edge(e) {
                    return Err(invalid_cfg!("{b} lists deleted edge {e:?}"));
                }
            }
            self.check_block_shape(block)?;
        }
        Ok(())
    }

    fn check_block_shape(&self, block: &Block) -> Result<()> {
        let b = block.id;
        let insns: Vec<(usize, &IrInstruction)> = block.insns().collect();
        for (n, (_, insn)) in insns.iter().enumerate() {
            let op = insn.opcode();
            let last = n + 1 == insns.len();
            if op.is_goto() {
                return Err(invalid_cfg!("{b} contains a goto instruction"));
            }
            if (op.is_branch() || op.ends_control_flow()) && !last {
                return Err(invalid_cfg!("{b} has `{op}` before its end"));
            }
            if op.is_move_result_any() {
                let producer_ok = if n > 0 {
                    let prev = insns[n - 1].1.opcode();
                    if op.is_move_result() {
                        prev.has_move_result()
                    } else {
                        prev.has_move_result_pseudo()
                    }
                } else {
                    let preds = self.pred_blocks(b);
                    !preds.is_empty()
                        && preds.iter().all(|&p| {
                            self.goto_target(p) == Some(b)
                                && self.block(p).last_insn().is_some_and(|(_, i)| {
                                    i.opcode().has_move_result()
                                        || i.opcode().has_move_result_pseudo()
                                })
                        })
                };
                if !producer_ok {
                    return Err(invalid_cfg!("{b} has `{op}` without its producer"));
                }
            }
        }

        let mut gotos = 0;
        let mut keys = Vec::new();
        let mut branches = 0;
        let mut throws = 0;
        for &e in &block.succs {
            match &self.edge(e).kind {
                EdgeKind::Goto => gotos += 1,
                EdgeKind::Branch { case_key } => {
                    branches += 1;
                    if let Some(k) = case_key {
                        if keys.contains(k) {
                            return Err(invalid_cfg!("{b} has duplicate case key {k}"));
                        }
                        keys.push(*k);
                    }
                }
                EdgeKind::Throw { .. } => throws += 1,
                EdgeKind::Ghost => {}
            }
        }
        if gotos > 1 {
            return Err(invalid_cfg!("{b} has {gotos} goto edges"));
        }
        if throws > 0 && !block.can_throw() {
            return Err(invalid_cfg!("{b} has throw edges but no throwing instruction"));
        }
        let last_op = insns.last().map(|(_, i)| i.opcode());
        match last_op {
            Some(op) if op.is_conditional_branch() => {
                if branches != 1 || gotos != 1 {
                    return Err(invalid_cfg!("{b} ends in `{op}` without one branch and one goto"));
                }
            }
            Some(IrOpcode::Switch) => {
                if gotos != 1 {
                    return Err(invalid_cfg!("{b} ends in a switch without a default goto"));
                }
            }
            Some(op) if op.ends_control_flow() => {
                if gotos + branches > 0 {
                    return Err(invalid_cfg!("{b} ends in `{op}` but has successors"));
                }
            }
            _ => {
                if branches > 0 {
                    return Err(invalid_cfg!("{b} has branch edges without a branch"));
                }
            }
        }
        Ok(())
    }
}

/// Iterator over every instruction of a graph, in block-id order.
///
/// Yields the position (whose [`InsnPos::block`] recovers the containing block) with the
/// instruction.
pub struct InstructionIterator<'a> {
    cfg: &'a ControlFlowGraph,
    block: usize,
    index: usize,
}

impl<'a> Iterator for InstructionIterator<'a> {
    type Item = (InsnPos, &'a IrInstruction);

    fn next(&mut self) -> Option<Self::Item> {
        while self.block < self.cfg.blocks.len() {
            if let Some(block) = &self.cfg.blocks[self.block] {
                while self.index < block.items.len() {
                    let i = self.index;
                    self.index += 1;
                    if let Some(insn) = block.items[i].insn() {
                        return Some((InsnPos::new(block.id, i), insn));
                    }
                }
            }
            self.block += 1;
            self.index = 0;
        }
        None
    }
}

impl GraphBase for ControlFlowGraph {
    fn node_count(&self) -> usize {
        self.blocks.len()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        self.blocks().map(Block::id)
    }
}

impl Successors for ControlFlowGraph {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.block(node).succs.iter().map(|&e| self.edge(e).target)
    }
}

impl Predecessors for ControlFlowGraph {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.block(node).preds.iter().map(|&e| self.edge(e).src)
    }
}

impl RootedGraph for ControlFlowGraph {
    fn entry(&self) -> NodeId {
        self.entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrOpcode;

    fn insn(op: IrOpcode) -> MethodItem {
        MethodItem::Opcode(IrInstruction::new(op))
    }

    #[test]
    fn test_edge_bookkeeping() {
        let mut cfg = ControlFlowGraph::new(0);
        let a = cfg.entry();
        let b = cfg.create_block();
        let c = cfg.create_block();
        let e = cfg.add_edge(a, b, EdgeKind::Goto);
        assert_eq!(cfg.block(a).succs(), &[e]);
        assert_eq!(cfg.block(b).preds(), &[e]);

        cfg.set_edge_target(e, c);
        assert!(cfg.block(b).preds().is_empty());
        assert_eq!(cfg.block(c).preds(), &[e]);

        cfg.set_edge_source(e, b);
        assert!(cfg.block(a).succs().is_empty());
        assert_eq!(cfg.edge(e).src(), b);

        cfg.delete_edge(e);
        assert!(!cfg.has_edge(e));
        assert!(cfg.block(c).preds().is_empty());
        assert_eq!(cfg.num_edges(), 0);
    }

    #[test]
    fn test_visit_and_dominators() {
        let mut cfg = ControlFlowGraph::new(0);
        let a = cfg.entry();
        let b = cfg.create_block();
        let c = cfg.create_block();
        let d = cfg.create_block();
        let orphan = cfg.create_block();
        cfg.add_edge(a, b, EdgeKind::Goto);
        cfg.add_edge(a, c, EdgeKind::Branch { case_key: None });
        cfg.add_edge(b, d, EdgeKind::Goto);
        cfg.add_edge(c, d, EdgeKind::Goto);

        let seen = cfg.visit();
        assert!(seen.contains(d.index()));
        assert!(!seen.contains(orphan.index()));

        let idom = cfg.immediate_dominators();
        assert_eq!(idom[d.index()], Some(a));
        assert_eq!(idom[b.index()], Some(a));
        assert_eq!(idom[orphan.index()], None);
    }

    #[test]
    fn test_ghost_exit() {
        let mut cfg = ControlFlowGraph::new(0);
        let a = cfg.entry();
        let b = cfg.create_block();
        let c = cfg.create_block();
        cfg.block_mut(a).items.push(insn(IrOpcode::Nop));
        cfg.block_mut(b).items.push(insn(IrOpcode::ReturnVoid));
        cfg.block_mut(c).items.push(insn(IrOpcode::ReturnVoid));
        cfg.add_edge(a, b, EdgeKind::Goto);
        cfg.add_edge(a, c, EdgeKind::Branch { case_key: None });

        cfg.calculate_exit_block();
        let exit = cfg.exit().unwrap();
        assert!(cfg.is_ghost(exit));
        assert_eq!(cfg.num_blocks(), 4);

        cfg.remove_ghost_exit_block();
        assert_eq!(cfg.num_blocks(), 3);
        assert!(cfg.exit().is_none());
    }

    #[test]
    fn test_sanity_check_rejects_two_gotos() {
        let mut cfg = ControlFlowGraph::new(0);
        let a = cfg.entry();
        let b = cfg.create_block();
        cfg.block_mut(b).items.push(insn(IrOpcode::ReturnVoid));
        cfg.add_edge(a, b, EdgeKind::Goto);
        assert!(cfg.sanity_check().is_ok());
        cfg.add_edge(a, b, EdgeKind::Goto);
        assert!(cfg.sanity_check().is_err());
    }
}
