//! Built-in shrinker steps.
//!
//! Each step is a local optimization over one method's [`ControlFlowGraph`] and
//! implements [`ShrinkPass`](crate::compiler::ShrinkPass). The
//! [`Shrinker`](crate::compiler::Shrinker) runs them in the order below, round after round,
//! until a round changes nothing.
//!
//! | Step | Description |
//! |------|-------------|
//! | [`ConstantBranchFoldingPass`] | Folds branches whose outcome constant propagation proves |
//! | [`CopyPropagationPass`] | Reads copy sources instead of copy destinations |
//! | [`LocalCsePass`] | Replaces recomputed pure values with moves |
//! | [`DeadCodeEliminationPass`] | Removes side-effect-free definitions nobody reads |
//! | [`DedupBlocksPass`] | Merges blocks with identical bodies and successors |
//! | [`ReduceGotosPass`] | Hoists tiny branch arms to drop their gotos |
//!
//! Steps leave the graph possibly non-simplified; the shrinker calls
//! [`ControlFlowGraph::simplify`] around them.
//!
//! [`ControlFlowGraph`]: crate::cfg::ControlFlowGraph
//! [`ControlFlowGraph::simplify`]: crate::cfg::ControlFlowGraph::simplify

mod copying;
mod cse;
mod deadcode;
mod dedup;
mod gotos;
mod predicates;

pub use copying::CopyPropagationPass;
pub use cse::LocalCsePass;
pub use deadcode::DeadCodeEliminationPass;
pub use dedup::DedupBlocksPass;
pub use gotos::ReduceGotosPass;
pub use predicates::ConstantBranchFoldingPass;
pub(crate) use predicates::fold_constant_branches;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::{
        cfg::ControlFlowGraph,
        ir::{parse_code, print_items},
        model::DexContext,
    };

    pub fn build(ctx: &DexContext, text: &str) -> ControlFlowGraph {
        let code = parse_code(ctx, text).unwrap();
        ControlFlowGraph::build(code.items(), code.registers_size()).unwrap()
    }

    pub fn printed(cfg: &ControlFlowGraph) -> String {
        print_items(&cfg.linearize().unwrap())
    }

    pub fn canonical(ctx: &DexContext, text: &str) -> String {
        print_items(parse_code(ctx, text).unwrap().items())
    }
}
