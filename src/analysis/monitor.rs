//! Monitor nesting analysis.
//!
//! Counts how many monitors are held at every point of a method. The verifier rejects code
//! that can throw while holding a monitor unless a catch-all handler covers it, so the
//! inliner must not move such instructions into a synchronized region of the caller.

use std::fmt;

use crate::{
    analysis::dataflow::{
        AnalysisResults, DataFlowAnalysis, DataFlowSolver, Direction, MeetSemiLattice,
    },
    cfg::{Block, BlockId, ControlFlowGraph, Edge, InsnPos},
    ir::{IrInstruction, IrOpcode},
};

/// The number of monitors held at a program point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorDepth {
    /// No execution reaches this point.
    Unreached,
    /// Exactly this many monitors are held on every path.
    Depth(u32),
    /// Paths disagree, or a monitor was released that was never acquired.
    Conflict,
}

impl MonitorDepth {
    /// Returns the depth if it is known.
    #[must_use]
    pub fn known(self) -> Option<u32> {
        match self {
            MonitorDepth::Depth(d) => Some(d),
            _ => None,
        }
    }

    fn step(self, insn: &IrInstruction) -> Self {
        match (self, insn.opcode()) {
            (MonitorDepth::Depth(d), IrOpcode::MonitorEnter) => MonitorDepth::Depth(d + 1),
            (MonitorDepth::Depth(0), IrOpcode::MonitorExit) => MonitorDepth::Conflict,
            (MonitorDepth::Depth(d), IrOpcode::MonitorExit) => MonitorDepth::Depth(d - 1),
            (state, _) => state,
        }
    }
}

impl MeetSemiLattice for MonitorDepth {
    fn meet(&self, other: &Self) -> Self {
        match (self, other) {
            (MonitorDepth::Unreached, x) | (x, MonitorDepth::Unreached) => *x,
            (MonitorDepth::Depth(a), MonitorDepth::Depth(b)) if a == b => *self,
            _ => MonitorDepth::Conflict,
        }
    }

    fn is_bottom(&self) -> bool {
        matches!(self, MonitorDepth::Conflict)
    }
}

impl fmt::Display for MonitorDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorDepth::Unreached => f.write_str("unreached"),
            MonitorDepth::Depth(d) => write!(f, "{d}"),
            MonitorDepth::Conflict => f.write_str("conflict"),
        }
    }
}

/// Forward analysis computing [`MonitorDepth`] per block.
pub struct MonitorCount;

impl DataFlowAnalysis for MonitorCount {
    type Lattice = MonitorDepth;
    const DIRECTION: Direction = Direction::Forward;

    fn boundary(&self, _cfg: &ControlFlowGraph) -> MonitorDepth {
        MonitorDepth::Depth(0)
    }

    fn initial(&self, _cfg: &ControlFlowGraph) -> MonitorDepth {
        MonitorDepth::Unreached
    }

    fn transfer(
        &self,
        block: &Block,
        input: &MonitorDepth,
        _cfg: &ControlFlowGraph,
    ) -> MonitorDepth {
        block
            .insns()
            .fold(*input, |depth, (_, insn)| depth.step(insn))
    }

    /// A throwing `monitor-enter` never acquired its monitor, and a throwing `monitor-exit`
    /// never released it.
    fn transfer_edge(
        &self,
        edge: &Edge,
        output: &MonitorDepth,
        cfg: &ControlFlowGraph,
    ) -> MonitorDepth {
        if !edge.kind().is_throw() {
            return *output;
        }
        let last = cfg.block(edge.src()).last_insn().map(|(_, i)| i.opcode());
        match (last, *output) {
            (Some(IrOpcode::MonitorEnter), MonitorDepth::Depth(d)) if d > 0 => {
                MonitorDepth::Depth(d - 1)
            }
            (Some(IrOpcode::MonitorExit), MonitorDepth::Depth(d)) => MonitorDepth::Depth(d + 1),
            _ => *output,
        }
    }
}

/// Solved monitor depths of one graph.
///
/// # Examples
///
/// ```rust
/// use redex::{analysis::MonitorAnalysis, ir::parse_code, model::DexContext};
///
/// let ctx = DexContext::new();
/// let mut code = parse_code(
///     &ctx,
///     "((load-param-object v0) (monitor-enter v0) (monitor-exit v0) (return-void))",
/// )?;
/// code.build_cfg()?;
/// let cfg = code.cfg().unwrap();
/// let monitors = MonitorAnalysis::run(cfg);
/// assert!(monitors.mismatches(cfg).is_empty());
/// # Ok::<(), redex::Error>(())
/// ```
pub struct MonitorAnalysis {
    results: AnalysisResults<MonitorDepth>,
}

impl MonitorAnalysis {
    /// Runs the analysis over `cfg`.
    #[must_use]
    pub fn run(cfg: &ControlFlowGraph) -> Self {
        MonitorAnalysis {
            results: DataFlowSolver::new(MonitorCount).solve(cfg),
        }
    }

    /// The depth on entry to `block`.
    #[must_use]
    pub fn entry_depth(&self, block: BlockId) -> MonitorDepth {
        self.results
            .in_state(block)
            .copied()
            .unwrap_or(MonitorDepth::Unreached)
    }

    /// The depth immediately before the instruction at `pos`.
    #[must_use]
    pub fn depth_before(&self, cfg: &ControlFlowGraph, pos: InsnPos) -> MonitorDepth {
        cfg.block(pos.block())
            .insns()
            .take_while(|&(i, _)| i < pos.index())
            .fold(self.entry_depth(pos.block()), |depth, (_, insn)| {
                depth.step(insn)
            })
    }

    /// Reachable blocks where the monitor count is inconsistent: paths disagree, a monitor
    /// is released without being held, or the method returns while holding one.
    #[must_use]
    pub fn mismatches(&self, cfg: &ControlFlowGraph) -> Vec<BlockId> {
        let mut blocks = Vec::new();
        for block in cfg.blocks() {
            let entry = self.entry_depth(block.id());
            if entry == MonitorDepth::Unreached {
                continue;
            }
            let exit = self
                .results
                .out_state(block.id())
                .copied()
                .unwrap_or(MonitorDepth::Unreached);
            let bad = entry == MonitorDepth::Conflict
                || exit == MonitorDepth::Conflict
                || (block.ends_with_return() && exit != MonitorDepth::Depth(0));
            if bad {
                blocks.push(block.id());
            }
        }
        blocks
    }

    /// Instructions that may throw while a monitor is held, in blocks without a catch-all
    /// handler. Invokes and the monitor instructions themselves are not counted.
    #[must_use]
    pub fn sketchy_insns(&self, cfg: &ControlFlowGraph) -> Vec<InsnPos> {
        let mut found = Vec::new();
        for block in cfg.blocks() {
            if has_catch_all(cfg, block.id()) {
                continue;
            }
            let mut depth = self.entry_depth(block.id());
            for (index, insn) in block.insns() {
                if depth.known().is_some_and(|d| d > 0) && is_sketchy_kind(insn) {
                    found.push(InsnPos::new(block.id(), index));
                }
                depth = depth.step(insn);
            }
        }
        found
    }
}

fn has_catch_all(cfg: &ControlFlowGraph, block: BlockId) -> bool {
    cfg.throw_edges(block)
        .iter()
        .any(|&e| cfg.edge(e).kind().is_catch_all())
}

fn is_sketchy_kind(insn: &IrInstruction) -> bool {
    let op = insn.opcode();
    op.can_throw() && !op.is_invoke() && !op.is_monitor()
}

/// Returns `true` if inlining `callee` at `callsite` would place a throwing instruction
/// inside one of the caller's monitors without catch-all coverage.
///
/// The callee's own uncovered throwing instructions count regardless of its own monitor
/// depth, since after inlining they run at the call site's depth.
#[must_use]
pub fn cannot_inline_sketchy_code(
    caller: &ControlFlowGraph,
    callee: &ControlFlowGraph,
    callsite: InsnPos,
) -> bool {
    let depth = MonitorAnalysis::run(caller).depth_before(caller, callsite);
    if depth.known() == Some(0) || depth == MonitorDepth::Unreached {
        return false;
    }
    if has_catch_all(caller, callsite.block()) {
        return false;
    }
    callee.blocks().any(|block| {
        !has_catch_all(callee, block.id()) && block.insns().any(|(_, i)| is_sketchy_kind(i))
    })
}
