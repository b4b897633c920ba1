//! The interface implemented by every shrinker step.

use crate::{cfg::ControlFlowGraph, Result};

/// A local transformation over one method's control-flow graph.
///
/// Steps are stateless and shared across worker threads. Each step returns how many
/// changes it made so the shrinker can detect its fixpoint; a step that reports zero
/// changes must have left the graph untouched.
pub trait ShrinkPass: Send + Sync {
    /// Returns the step's name, used in logs and events.
    fn name(&self) -> &'static str;

    /// Returns a short description of what the step does.
    fn description(&self) -> &'static str {
        "No description available"
    }

    /// Returns false if the step has nothing to do on `cfg`.
    fn should_run(&self, _cfg: &ControlFlowGraph) -> bool {
        true
    }

    /// Runs the step on `cfg`.
    ///
    /// # Returns
    ///
    /// The number of changes made.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidCfg`] if an edit would corrupt the graph.
    fn run(&self, cfg: &mut ControlFlowGraph) -> Result<usize>;
}
