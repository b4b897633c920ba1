//! Live register analysis.
//!
//! A register is *live* at a program point if some path from that point reads
//! it before writing it.
//!
//! # Algorithm
//!
//! This is a backward data flow analysis:
//!
//! - `USE[B]` = registers read in B before any write
//! - `DEF[B]` = registers written in B
//! - `OUT[B]` = ∪{IN[S] | S is a successor of B}
//! - `IN[B]` = USE[B] ∪ (OUT[B] - DEF[B])
//!
//! Throw edges are ordinary successors. A block with throw edges ends with its
//! only throwing instruction, and throwing instructions never write a register
//! themselves, so the state after the block is also the state at the throw.

use crate::{
    cfg::{Block, BlockId, ControlFlowGraph, InsnPos},
    ir::IrInstruction,
    utils::BitSet,
};

use super::{
    framework::{AnalysisResults, DataFlowAnalysis, Direction},
    solver::DataFlowSolver,
};

/// Live register analysis.
///
/// States are [`BitSet`]s over the method's registers.
pub struct LiveRegisters {
    registers: usize,
}

impl LiveRegisters {
    /// Creates a liveness analysis sized for `cfg`'s register frame.
    #[must_use]
    pub fn new(cfg: &ControlFlowGraph) -> Self {
        Self {
            registers: cfg.registers_size() as usize,
        }
    }
}

/// Applies one instruction backward: removes what it writes, adds what it reads.
///
/// Registers outside the frame are ignored.
pub(crate) fn step_backward(live: &mut BitSet, insn: &IrInstruction) {
    if let Some(dest) = insn.dest() {
        let width = if insn.opcode().dest_is_wide() { 2 } else { 1 };
        for reg in dest as usize..dest as usize + width {
            if reg < live.len() {
                live.remove(reg);
            }
        }
    }
    for reg in insn.used_regs() {
        if (reg as usize) < live.len() {
            live.insert(reg as usize);
        }
    }
}

impl DataFlowAnalysis for LiveRegisters {
    type Lattice = BitSet;
    const DIRECTION: Direction = Direction::Backward;

    fn boundary(&self, _cfg: &ControlFlowGraph) -> BitSet {
        BitSet::new(self.registers)
    }

    fn initial(&self, _cfg: &ControlFlowGraph) -> BitSet {
        BitSet::new(self.registers)
    }

    fn transfer(&self, block: &Block, input: &BitSet, _cfg: &ControlFlowGraph) -> BitSet {
        let mut live = input.clone();
        let insns: Vec<&IrInstruction> = block.insns().map(|(_, insn)| insn).collect();
        for insn in insns.into_iter().rev() {
            step_backward(&mut live, insn);
        }
        live
    }
}

/// Solved liveness for a graph, with per-instruction queries.
#[derive(Debug, Clone)]
pub struct Liveness {
    results: AnalysisResults<BitSet>,
    registers: usize,
}

impl Liveness {
    /// Runs the analysis over `cfg`.
    #[must_use]
    pub fn compute(cfg: &ControlFlowGraph) -> Self {
        let results = DataFlowSolver::new(LiveRegisters::new(cfg)).solve(cfg);
        Self {
            results,
            registers: cfg.registers_size() as usize,
        }
    }

    /// Registers live on entry to `block`.
    #[must_use]
    pub fn live_in(&self, block: BlockId) -> BitSet {
        self.results
            .in_state(block)
            .cloned()
            .unwrap_or_else(|| BitSet::new(self.registers))
    }

    /// Registers live on exit from `block`.
    #[must_use]
    pub fn live_out(&self, block: BlockId) -> BitSet {
        self.results
            .out_state(block)
            .cloned()
            .unwrap_or_else(|| BitSet::new(self.registers))
    }

    /// Registers live immediately after the instruction at `pos`.
    #[must_use]
    pub fn live_after(&self, cfg: &ControlFlowGraph, pos: InsnPos) -> BitSet {
        let mut live = self.live_out(pos.block());
        let later: Vec<&IrInstruction> = cfg
            .block(pos.block())
            .insns()
            .filter(|&(i, _)| i > pos.index())
            .map(|(_, insn)| insn)
            .collect();
        for insn in later.into_iter().rev() {
            step_backward(&mut live, insn);
        }
        live
    }

    /// Returns `true` if the value written by the instruction at `pos` is never read.
    ///
    /// Instructions without a destination are never dead by this measure.
    #[must_use]
    pub fn is_dead_def(&self, cfg: &ControlFlowGraph, pos: InsnPos) -> bool {
        let insn = cfg.insn(pos);
        let Some(dest) = insn.dest() else {
            return false;
        };
        let live = self.live_after(cfg, pos);
        let wide_live = insn.opcode().dest_is_wide() && live.contains(dest as usize + 1);
        !live.contains(dest as usize) && !wide_live
    }
}
