//! Basic blocks.

use std::fmt;

use crate::{
    cfg::{BlockId, EdgeId},
    ir::{IrInstruction, IrOpcode, MethodItem},
};

/// The position of an instruction: its block and its item index within the block.
///
/// Positions are invalidated by any mutation that reports invalidation (see
/// [`ControlFlowGraph::insert_before`](crate::cfg::ControlFlowGraph::insert_before)).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InsnPos {
    pub(crate) block: BlockId,
    pub(crate) index: usize,
}

impl InsnPos {
    /// Creates a position.
    #[must_use]
    pub const fn new(block: BlockId, index: usize) -> Self {
        InsnPos { block, index }
    }

    /// Returns the containing block.
    #[must_use]
    pub const fn block(self) -> BlockId {
        self.block
    }

    /// Returns the item index within the block.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index
    }
}

impl fmt::Debug for InsnPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.block, self.index)
    }
}

/// A basic block: straight-line items with one entry.
///
/// Only the last instruction may be a conditional branch, `switch`, `return` or `throw`.
/// Gotos, targets and try markers are never stored here; they are represented by edges.
#[derive(Debug, Clone)]
pub struct Block {
    pub(crate) id: BlockId,
    pub(crate) items: Vec<MethodItem>,
    pub(crate) preds: Vec<EdgeId>,
    pub(crate) succs: Vec<EdgeId>,
}

impl Block {
    pub(crate) fn new(id: BlockId) -> Self {
        Block {
            id,
            items: Vec::new(),
            preds: Vec::new(),
            succs: Vec::new(),
        }
    }

    /// Returns the block id.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Returns the items.
    #[must_use]
    pub fn items(&self) -> &[MethodItem] {
        &self.items
    }

    /// Returns the incoming edges.
    #[must_use]
    pub fn preds(&self) -> &[EdgeId] {
        &self.preds
    }

    /// Returns the outgoing edges.
    #[must_use]
    pub fn succs(&self) -> &[EdgeId] {
        &self.succs
    }

    /// Iterates over the instructions with their item indices.
    pub fn insns(&self) -> impl Iterator<Item = (usize, &IrInstruction)> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| item.insn().map(|insn| (i, insn)))
    }

    /// Returns `true` if the block holds no instruction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insns().next().is_none()
    }

    /// Returns the number of non-internal instructions.
    #[must_use]
    pub fn num_opcodes(&self) -> usize {
        self.insns().filter(|(_, i)| !i.opcode().is_internal()).count()
    }

    /// Returns the item index and instruction of the first instruction.
    #[must_use]
    pub fn first_insn(&self) -> Option<(usize, &IrInstruction)> {
        self.insns().next()
    }

    /// Returns the item index and instruction of the last instruction.
    #[must_use]
    pub fn last_insn(&self) -> Option<(usize, &IrInstruction)> {
        self.items
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, item)| item.insn().map(|insn| (i, insn)))
    }

    /// Returns `true` if the first instruction is a `move-result*` or
    /// `move-result-pseudo*`, which belongs to the last instruction of the predecessor.
    #[must_use]
    pub fn starts_with_move_result(&self) -> bool {
        self.first_insn()
            .is_some_and(|(_, i)| i.opcode().is_move_result_any())
    }

    /// Returns `true` if the first instruction is `move-exception`.
    #[must_use]
    pub fn starts_with_move_exception(&self) -> bool {
        self.first_insn()
            .is_some_and(|(_, i)| i.opcode() == IrOpcode::MoveException)
    }

    /// Returns `true` if the last instruction is a `return*`.
    #[must_use]
    pub fn ends_with_return(&self) -> bool {
        self.last_insn().is_some_and(|(_, i)| i.opcode().is_return())
    }

    /// Returns `true` if the last instruction is `throw`.
    #[must_use]
    pub fn ends_with_throw(&self) -> bool {
        self.last_insn().is_some_and(|(_, i)| i.opcode().is_throw())
    }

    /// Returns `true` if any instruction may throw.
    #[must_use]
    pub fn can_throw(&self) -> bool {
        self.insns().any(|(_, i)| i.may_throw())
    }

    /// Returns the last instruction if it is a conditional branch or `switch`.
    #[must_use]
    pub fn branch_insn(&self) -> Option<(usize, &IrInstruction)> {
        self.last_insn()
            .filter(|(_, i)| i.opcode().is_conditional_branch() || i.opcode().is_switch())
    }
}
