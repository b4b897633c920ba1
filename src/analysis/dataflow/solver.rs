//! Worklist-based data flow solver.
//!
//! This module provides the iterative solver that computes fixpoints for
//! data flow analyses over a [`ControlFlowGraph`].
//!
//! # Algorithm
//!
//! 1. Initialize all blocks with the initial value
//! 2. Set the boundary value at entry (forward) or at blocks without successors (backward)
//! 3. Add all reachable blocks to the worklist in reverse postorder (forward) or
//!    postorder (backward)
//! 4. While the worklist is non-empty:
//!    a. Remove a block from the worklist
//!    b. Compute the input by meeting values from predecessors/successors
//!    c. Apply the transfer function to get the output
//!    d. If the output changed, add affected blocks to the worklist
//! 5. Call the finalize hook for post-processing
//!
//! # Complexity
//!
//! For most analyses on reducible CFGs, the solver converges in O(n) iterations
//! where n is the number of blocks. The total work is O(n * h) where h is the
//! lattice height.

use std::collections::VecDeque;

use crate::{
    cfg::{BlockId, ControlFlowGraph},
    utils::graph::{algorithms, GraphBase},
};

use super::{
    framework::{AnalysisResults, DataFlowAnalysis, Direction},
    lattice::MeetSemiLattice,
};

/// Worklist-based data flow solver.
///
/// # Usage
///
/// ```rust
/// use redex::{
///     analysis::dataflow::{DataFlowSolver, LiveRegisters},
///     ir::parse_code,
///     model::DexContext,
/// };
///
/// let ctx = DexContext::new();
/// let mut code = parse_code(&ctx, "((load-param v0) (const v1 1) (return v0))")?;
/// code.build_cfg()?;
/// let cfg = code.cfg().unwrap();
///
/// let results = DataFlowSolver::new(LiveRegisters::new(cfg)).solve(cfg);
/// let live = results.in_state(cfg.entry()).unwrap();
/// assert!(!live.contains(0));
/// # Ok::<(), redex::Error>(())
/// ```
pub struct DataFlowSolver<A: DataFlowAnalysis> {
    /// The analysis being solved.
    analysis: A,
    /// Input state for each block.
    in_states: Vec<A::Lattice>,
    /// Output state for each block.
    out_states: Vec<A::Lattice>,
    /// Worklist of blocks to process.
    worklist: VecDeque<usize>,
    /// Whether each block is currently in the worklist (for deduplication).
    in_worklist: Vec<bool>,
    /// Number of iterations performed.
    iterations: usize,
}

impl<A: DataFlowAnalysis> DataFlowSolver<A> {
    /// Creates a new solver for the given analysis.
    #[must_use]
    pub fn new(analysis: A) -> Self {
        Self {
            analysis,
            in_states: Vec::new(),
            out_states: Vec::new(),
            worklist: VecDeque::new(),
            in_worklist: Vec::new(),
            iterations: 0,
        }
    }

    /// Solves the data flow analysis to a fixpoint.
    ///
    /// Returns the analysis results containing input and output states
    /// for each basic block.
    pub fn solve(mut self, cfg: &ControlFlowGraph) -> AnalysisResults<A::Lattice> {
        self.run(cfg);
        AnalysisResults::new(self.in_states, self.out_states)
    }

    /// Solves the analysis and hands back the analysis object with the results.
    ///
    /// Useful for analyses that collect facts in [`DataFlowAnalysis::finalize`].
    pub fn solve_into(mut self, cfg: &ControlFlowGraph) -> (A, AnalysisResults<A::Lattice>) {
        self.run(cfg);
        (
            self.analysis,
            AnalysisResults::new(self.in_states, self.out_states),
        )
    }

    /// Returns the number of iterations performed.
    #[must_use]
    pub const fn iterations(&self) -> usize {
        self.iterations
    }

    fn run(&mut self, cfg: &ControlFlowGraph) {
        self.initialize(cfg);
        self.iterate(cfg);
        self.analysis
            .finalize(&self.in_states, &self.out_states, cfg);
        log::trace!(
            "dataflow fixpoint after {} iterations over {} blocks",
            self.iterations,
            cfg.num_blocks()
        );
    }

    /// Initializes the solver state.
    fn initialize(&mut self, cfg: &ControlFlowGraph) {
        let num_blocks = cfg.node_count();
        let initial = self.analysis.initial(cfg);
        let boundary = self.analysis.boundary(cfg);

        self.in_states = vec![initial.clone(); num_blocks];
        self.out_states = vec![initial; num_blocks];
        self.in_worklist = vec![false; num_blocks];
        self.worklist.clear();

        let order = match A::DIRECTION {
            Direction::Forward => {
                self.in_states[cfg.entry().index()] = boundary;
                algorithms::reverse_postorder(cfg, cfg.entry())
            }
            Direction::Backward => {
                for block in cfg.blocks() {
                    if block.succs().is_empty() {
                        self.out_states[block.id().index()] = boundary.clone();
                    }
                }
                algorithms::postorder(cfg, cfg.entry())
            }
        };

        for node in order {
            let idx = node.index();
            self.worklist.push_back(idx);
            self.in_worklist[idx] = true;
        }
    }

    /// Main iteration loop.
    fn iterate(&mut self, cfg: &ControlFlowGraph) {
        while let Some(block_idx) = self.worklist.pop_front() {
            self.in_worklist[block_idx] = false;
            self.iterations += 1;

            let changed = match A::DIRECTION {
                Direction::Forward => self.process_forward(block_idx, cfg),
                Direction::Backward => self.process_backward(block_idx, cfg),
            };

            if changed {
                self.add_affected_to_worklist(block_idx, cfg);
            }
        }
    }

    /// Processes a block in forward direction.
    ///
    /// Returns `true` if the output state changed.
    fn process_forward(&mut self, block_idx: usize, cfg: &ControlFlowGraph) -> bool {
        let id = BlockId::new(block_idx);
        let block = cfg.block(id);

        if id != cfg.entry() {
            let mut input = self.analysis.initial(cfg);
            for &e in block.preds() {
                let edge = cfg.edge(e);
                let along = self.analysis.transfer_edge(
                    edge,
                    &self.out_states[edge.src().index()],
                    cfg,
                );
                input = input.meet(&along);
            }
            self.in_states[block_idx] = input;
        }

        let output = self
            .analysis
            .transfer(block, &self.in_states[block_idx], cfg);
        let changed = output != self.out_states[block_idx];
        self.out_states[block_idx] = output;
        changed
    }

    /// Processes a block in backward direction.
    ///
    /// Returns `true` if the input state changed.
    fn process_backward(&mut self, block_idx: usize, cfg: &ControlFlowGraph) -> bool {
        let id = BlockId::new(block_idx);
        let block = cfg.block(id);

        if !block.succs().is_empty() {
            let mut output = self.analysis.initial(cfg);
            for &e in block.succs() {
                output = output.meet(&self.in_states[cfg.edge(e).target().index()]);
            }
            self.out_states[block_idx] = output;
        }

        let input = self
            .analysis
            .transfer(block, &self.out_states[block_idx], cfg);
        let changed = input != self.in_states[block_idx];
        self.in_states[block_idx] = input;
        changed
    }

    /// Adds affected blocks to the worklist after a change.
    fn add_affected_to_worklist(&mut self, block_idx: usize, cfg: &ControlFlowGraph) {
        let block = cfg.block(BlockId::new(block_idx));
        let affected: Vec<usize> = match A::DIRECTION {
            Direction::Forward => block
                .succs()
                .iter()
                .map(|&e| cfg.edge(e).target().index())
                .collect(),
            Direction::Backward => block
                .preds()
                .iter()
                .map(|&e| cfg.edge(e).src().index())
                .collect(),
        };
        for idx in affected {
            if !self.in_worklist[idx] {
                self.worklist.push_back(idx);
                self.in_worklist[idx] = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cfg::Block, ir::parse_code, model::DexContext};

    /// Counts how many blocks lie on the longest acyclic path to each block.
    #[derive(Debug, Clone, PartialEq)]
    enum Depth {
        Unreached,
        At(u32),
        Conflict,
    }

    impl MeetSemiLattice for Depth {
        fn meet(&self, other: &Self) -> Self {
            match (self, other) {
                (Depth::Unreached, x) | (x, Depth::Unreached) => x.clone(),
                (Depth::At(a), Depth::At(b)) if a == b => Depth::At(*a),
                _ => Depth::Conflict,
            }
        }

        fn is_bottom(&self) -> bool {
            matches!(self, Depth::Conflict)
        }
    }

    struct BlockCount;

    impl DataFlowAnalysis for BlockCount {
        type Lattice = Depth;
        const DIRECTION: Direction = Direction::Forward;

        fn boundary(&self, _cfg: &ControlFlowGraph) -> Depth {
            Depth::At(0)
        }

        fn initial(&self, _cfg: &ControlFlowGraph) -> Depth {
            Depth::Unreached
        }

        fn transfer(&self, _block: &Block, input: &Depth, _cfg: &ControlFlowGraph) -> Depth {
            match input {
                Depth::At(n) => Depth::At(n + 1),
                other => other.clone(),
            }
        }
    }

    #[test]
    fn test_forward_join_conflict() {
        let ctx = DexContext::new();
        let mut code = parse_code(
            &ctx,
            "((load-param v0) (if-eqz v0 :a) (const v0 1) (:a) (return v0))",
        )
        .unwrap();
        code.build_cfg().unwrap();
        let cfg = code.cfg().unwrap();

        let results = DataFlowSolver::new(BlockCount).solve(cfg);
        let exit = cfg.exit().unwrap();
        // Reached both directly from the entry and through the fallthrough block.
        assert_eq!(results.in_state(exit), Some(&Depth::Conflict));
        assert_eq!(results.out_state(cfg.entry()), Some(&Depth::At(1)));
    }

    #[test]
    fn test_solver_iterations() {
        let solver = DataFlowSolver::new(BlockCount);
        assert_eq!(solver.iterations(), 0);
    }
}
