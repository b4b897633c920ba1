//! Data flow analysis framework trait and direction.
//!
//! This module defines the core abstraction for data flow analyses. Any
//! specific analysis (liveness, constant propagation, monitor depth) implements
//! the [`DataFlowAnalysis`] trait to work with the solver.

use crate::cfg::{Block, BlockId, ControlFlowGraph, Edge};

use super::lattice::MeetSemiLattice;

/// Direction of data flow analysis.
///
/// The direction determines how information propagates through the CFG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Information flows forward, from entry to exit.
    ///
    /// At join points (blocks with multiple predecessors), values from
    /// all predecessors are combined using the meet operation.
    ///
    /// Examples: constant propagation, monitor depth, receiver initialization.
    Forward,

    /// Information flows backward, from exit to entry.
    ///
    /// At split points (blocks with multiple successors), values from
    /// all successors are combined.
    ///
    /// Examples: live registers.
    Backward,
}

/// A data flow analysis over a [`ControlFlowGraph`].
///
/// Implementations provide the transfer function and boundary conditions;
/// the solver handles iteration to a fixpoint.
///
/// # Transfer Functions
///
/// For forward analyses: `out[B] = transfer(B, in[B])`, and every successor
/// receives `transfer_edge(e, out[B])` along edge `e`.
///
/// For backward analyses: `in[B] = transfer(B, out[B])`.
///
/// # Example
///
/// ```rust,ignore
/// use redex::analysis::dataflow::{DataFlowAnalysis, Direction};
///
/// struct Reached;
///
/// impl DataFlowAnalysis for Reached {
///     type Lattice = Flag;
///     const DIRECTION: Direction = Direction::Forward;
///
///     fn boundary(&self, _cfg: &ControlFlowGraph) -> Flag { Flag::Set }
///     fn initial(&self, _cfg: &ControlFlowGraph) -> Flag { Flag::Unset }
///     fn transfer(&self, _block: &Block, input: &Flag, _cfg: &ControlFlowGraph) -> Flag {
///         input.clone()
///     }
/// }
/// ```
pub trait DataFlowAnalysis {
    /// The lattice type for this analysis.
    type Lattice: MeetSemiLattice;

    /// The direction of this analysis.
    const DIRECTION: Direction;

    /// Returns the value at the boundary of the method.
    ///
    /// For forward analyses, this is the value at the entry block.
    /// For backward analyses, this is the value after every block without
    /// successors.
    fn boundary(&self, cfg: &ControlFlowGraph) -> Self::Lattice;

    /// Returns the initial value for interior blocks.
    ///
    /// This is the identity of [`MeetSemiLattice::meet`]: a block that was
    /// never reached contributes nothing at a join.
    fn initial(&self, cfg: &ControlFlowGraph) -> Self::Lattice;

    /// Computes the transfer function for a basic block.
    ///
    /// # Arguments
    ///
    /// * `block` - The block being processed
    /// * `input` - The state flowing into (forward) or out of (backward) the block
    /// * `cfg` - The complete graph for context
    ///
    /// # Returns
    ///
    /// The abstract state after flowing through the block.
    fn transfer(&self, block: &Block, input: &Self::Lattice, cfg: &ControlFlowGraph)
        -> Self::Lattice;

    /// Refines the state leaving a block along one of its edges.
    ///
    /// Only consulted by forward analyses. The default passes the block's
    /// output unchanged.
    fn transfer_edge(
        &self,
        _edge: &Edge,
        output: &Self::Lattice,
        _cfg: &ControlFlowGraph,
    ) -> Self::Lattice {
        output.clone()
    }

    /// Called when analysis is complete.
    ///
    /// The default implementation does nothing.
    fn finalize(
        &mut self,
        _in_states: &[Self::Lattice],
        _out_states: &[Self::Lattice],
        _cfg: &ControlFlowGraph,
    ) {
    }
}

/// Results of a data flow analysis.
///
/// States are indexed by block id; ids of removed blocks hold the initial value.
#[derive(Debug, Clone)]
pub struct AnalysisResults<L> {
    /// Input state for each block (before transfer function).
    pub in_states: Vec<L>,
    /// Output state for each block (after transfer function).
    pub out_states: Vec<L>,
}

impl<L: Clone> AnalysisResults<L> {
    /// Creates new analysis results with the given states.
    ///
    /// # Arguments
    ///
    /// * `in_states` - The input states for each block
    /// * `out_states` - The output states for each block
    #[must_use]
    pub fn new(in_states: Vec<L>, out_states: Vec<L>) -> Self {
        Self {
            in_states,
            out_states,
        }
    }

    /// Returns the input state for a block, or `None` if the id is out of bounds.
    #[must_use]
    pub fn in_state(&self, block: BlockId) -> Option<&L> {
        self.in_states.get(block.index())
    }

    /// Returns the output state for a block, or `None` if the id is out of bounds.
    #[must_use]
    pub fn out_state(&self, block: BlockId) -> Option<&L> {
        self.out_states.get(block.index())
    }
}
