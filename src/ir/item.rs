//! Method items: the entries of a linear instruction stream and of a block.

use std::{fmt, sync::Arc};

use strum::{Display, EnumString};

use crate::{
    ir::{IrInstruction, Label, Reg},
    model::{DexMethodRef, DexString, DexType},
};

/// Names one entry of a catch-handler chain in linear code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CatchId(pub u32);

impl fmt::Display for CatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// A source position.
///
/// Positions of inlined code chain to the position of the call site through `parent`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DexPosition {
    /// The method the position belongs to.
    pub method: DexMethodRef,
    /// The source file.
    pub file: DexString,
    /// The line number.
    pub line: u32,
    /// The position of the call site this code was inlined into.
    pub parent: Option<Arc<DexPosition>>,
}

impl DexPosition {
    /// Returns a copy of this position whose outermost ancestor is re-parented onto
    /// `callsite`.
    #[must_use]
    pub fn rebased_onto(&self, callsite: &Arc<DexPosition>) -> DexPosition {
        let parent = match &self.parent {
            Some(parent) => Arc::new(parent.rebased_onto(callsite)),
            None => callsite.clone(),
        };
        DexPosition {
            method: self.method.clone(),
            file: self.file.clone(),
            line: self.line,
            parent: Some(parent),
        }
    }
}

/// Local-variable debug opcodes.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum DebugOpcode {
    #[strum(serialize = "DBG_START_LOCAL")]
    StartLocal,
    #[strum(serialize = "DBG_END_LOCAL")]
    EndLocal,
    #[strum(serialize = "DBG_RESTART_LOCAL")]
    RestartLocal,
    #[strum(serialize = "DBG_SET_PROLOGUE_END")]
    SetPrologueEnd,
    #[strum(serialize = "DBG_SET_EPILOGUE_BEGIN")]
    SetEpilogueBegin,
}

/// A debug event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebugInfo {
    /// The event.
    pub opcode: DebugOpcode,
    /// The register the event describes, for local-variable events.
    pub reg: Option<Reg>,
    /// The local's name (`DBG_START_LOCAL`).
    pub name: Option<DexString>,
    /// The local's type (`DBG_START_LOCAL`).
    pub ty: Option<DexType>,
}

/// A branch-target marker in linear code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BranchTarget {
    /// The label branches refer to.
    pub label: Label,
    /// The switch case key, for targets of switch cases.
    pub case_key: Option<i32>,
}

/// One handler in a catch chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatchEntry {
    /// This entry's id.
    pub id: CatchId,
    /// The caught type; `None` catches everything.
    pub catch_type: Option<DexType>,
    /// The next handler to consult.
    pub next: Option<CatchId>,
}

/// A profiling marker recording how often the surrounding code ran.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceBlock {
    /// The method the block was originally part of.
    pub src: DexMethodRef,
    /// The block id within that method.
    pub id: u32,
    /// The fraction of method invocations that reached this block, when profiled.
    pub hit: Option<f32>,
}

impl SourceBlock {
    /// Returns `true` if the block was reached in profiling.
    #[must_use]
    pub fn is_hot(&self) -> bool {
        self.hit.is_some_and(|h| h > 0.0)
    }
}

/// An entry of a linear instruction stream.
///
/// Inside an editable CFG only `Opcode` (excluding branches), `Position`, `Debug` and
/// `SourceBlock` appear; control flow and try/catch structure are carried by edges.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodItem {
    /// An instruction.
    Opcode(IrInstruction),
    /// A source position that applies to the instructions that follow.
    Position(Arc<DexPosition>),
    /// A debug event.
    Debug(DebugInfo),
    /// A branch target.
    Target(BranchTarget),
    /// Start of a try region whose handlers start at the given catch entry.
    TryStart(CatchId),
    /// End of a try region.
    TryEnd(CatchId),
    /// A catch handler entry.
    Catch(CatchEntry),
    /// A profiling marker.
    SourceBlock(SourceBlock),
}

impl MethodItem {
    /// Returns the instruction, if this item is one.
    #[must_use]
    pub fn insn(&self) -> Option<&IrInstruction> {
        match self {
            MethodItem::Opcode(insn) => Some(insn),
            _ => None,
        }
    }

    /// Returns the instruction mutably, if this item is one.
    pub fn insn_mut(&mut self) -> Option<&mut IrInstruction> {
        match self {
            MethodItem::Opcode(insn) => Some(insn),
            _ => None,
        }
    }

    /// Returns `true` for items that open a block in linear code.
    #[must_use]
    pub fn is_block_marker(&self) -> bool {
        matches!(
            self,
            MethodItem::Target(_) | MethodItem::TryStart(_) | MethodItem::TryEnd(_) | MethodItem::Catch(_)
        )
    }
}

impl From<IrInstruction> for MethodItem {
    fn from(insn: IrInstruction) -> Self {
        MethodItem::Opcode(insn)
    }
}
