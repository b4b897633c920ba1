//! The shrinker: local cleanup of a method body after inlining.
//!
//! Inlining leaves behind parameter moves, result moves, branches on constants that the
//! call site fixed, and duplicated return paths. The shrinker runs the built-in
//! [`passes`](crate::compiler::passes) over one [`ControlFlowGraph`] in a fixed order,
//! canonicalizing with [`ControlFlowGraph::simplify`] around them, and repeats until a
//! round changes nothing or [`ShrinkerConfig::max_rounds`] is reached.
//!
//! Shrinking is idempotent: shrinking an already shrunk graph reports no changes and
//! leaves it as it is.
//!
//! # Example
//!
//! ```rust
//! use redex::{
//!     compiler::{Shrinker, ShrinkerConfig},
//!     ir::{parse_code, print_items},
//!     model::DexContext,
//! };
//!
//! let ctx = DexContext::new();
//! let mut code = parse_code(
//!     &ctx,
//!     "((const v0 3) (move v1 v0) (add-int/lit v2 v1 1) (move v3 v2) (return v3))",
//! )?;
//! code.build_cfg()?;
//!
//! let shrinker = Shrinker::new(ShrinkerConfig::default());
//! let stats = shrinker.shrink(code.cfg_mut().unwrap())?;
//! assert!(stats.changed());
//!
//! code.clear_cfg()?;
//! assert_eq!(
//!     print_items(code.items()),
//!     "((const v0 3) (add-int/lit v2 v0 1) (return v2))"
//! );
//! # Ok::<(), redex::Error>(())
//! ```

use std::{collections::BTreeMap, fmt};

use crate::{
    cfg::ControlFlowGraph,
    compiler::{
        passes::{
            ConstantBranchFoldingPass, CopyPropagationPass, DeadCodeEliminationPass,
            DedupBlocksPass, LocalCsePass, ReduceGotosPass,
        },
        EventKind, EventLog, ShrinkPass, ShrinkerConfig,
    },
    ir::IrCode,
    model::DexMethodRef,
    Result,
};

/// What one call to [`Shrinker::shrink`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShrinkerStats {
    /// Rounds executed, including the final round that found nothing.
    pub rounds: usize,
    /// Changes reported per step, keyed by step name.
    pub changes: BTreeMap<&'static str, usize>,
    /// Opcodes before shrinking.
    pub opcodes_before: usize,
    /// Opcodes after shrinking.
    pub opcodes_after: usize,
}

impl ShrinkerStats {
    /// Total changes across all steps.
    #[must_use]
    pub fn total_changes(&self) -> usize {
        self.changes.values().sum()
    }

    /// Returns true if any step changed the graph.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.total_changes() > 0
    }

    /// Opcodes removed; zero if the body grew.
    #[must_use]
    pub fn opcodes_removed(&self) -> usize {
        self.opcodes_before.saturating_sub(self.opcodes_after)
    }

    /// Adds the counts of another run.
    pub fn merge(&mut self, other: &ShrinkerStats) {
        self.rounds += other.rounds;
        for (name, n) in &other.changes {
            *self.changes.entry(name).or_default() += n;
        }
        self.opcodes_before += other.opcodes_before;
        self.opcodes_after += other.opcodes_after;
    }
}

impl fmt::Display for ShrinkerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rounds, {} -> {} opcodes",
            self.rounds, self.opcodes_before, self.opcodes_after
        )?;
        for (name, n) in self.changes.iter().filter(|(_, n)| **n > 0) {
            write!(f, ", {name}: {n}")?;
        }
        Ok(())
    }
}

/// Runs the enabled shrinker steps over method bodies.
///
/// A `Shrinker` is immutable once built and can be shared by all inliner workers.
pub struct Shrinker {
    steps: Vec<Box<dyn ShrinkPass>>,
    max_rounds: usize,
}

impl Shrinker {
    /// Creates a shrinker running the steps `config` enables.
    #[must_use]
    pub fn new(config: ShrinkerConfig) -> Self {
        let mut steps: Vec<Box<dyn ShrinkPass>> = Vec::new();
        if config.run_const_prop {
            steps.push(Box::new(ConstantBranchFoldingPass));
        }
        if config.run_copy_prop {
            steps.push(Box::new(CopyPropagationPass));
        }
        if config.run_cse {
            steps.push(Box::new(LocalCsePass));
        }
        if config.run_local_dce {
            steps.push(Box::new(DeadCodeEliminationPass));
        }
        if config.run_dedup_blocks {
            steps.push(Box::new(DedupBlocksPass));
        }
        if config.run_reduce_gotos {
            steps.push(Box::new(ReduceGotosPass));
        }
        Self {
            steps,
            max_rounds: config.max_rounds.max(1),
        }
    }

    /// Adds a custom step, run after the built-in ones.
    #[must_use]
    pub fn with_step(mut self, step: Box<dyn ShrinkPass>) -> Self {
        self.steps.push(step);
        self
    }

    /// Returns the names of the configured steps in execution order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Returns true if the shrinker has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Shrinks `cfg` in place.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidCfg`] if a step attempts an invalid edit.
    pub fn shrink(&self, cfg: &mut ControlFlowGraph) -> Result<ShrinkerStats> {
        let mut stats = ShrinkerStats {
            opcodes_before: cfg.num_opcodes(),
            ..ShrinkerStats::default()
        };
        for step in &self.steps {
            stats.changes.insert(step.name(), 0);
        }

        cfg.simplify();
        while stats.rounds < self.max_rounds {
            stats.rounds += 1;
            let mut round_changes = 0;
            for step in &self.steps {
                if !step.should_run(cfg) {
                    continue;
                }
                let n = step.run(cfg)?;
                if n > 0 {
                    log::trace!("{}: {n} changes", step.name());
                    *stats.changes.entry(step.name()).or_default() += n;
                    round_changes += n;
                }
            }
            if round_changes == 0 {
                break;
            }
            cfg.simplify();
        }

        cfg.recompute_registers_size();
        stats.opcodes_after = cfg.num_opcodes();
        log::debug!("shrinker: {stats}");
        Ok(stats)
    }

    /// Shrinks `cfg` and records a [`EventKind::ShrinkerRun`] event for `method` if anything
    /// changed.
    ///
    /// # Errors
    ///
    /// See [`Shrinker::shrink`].
    pub fn shrink_logged(
        &self,
        cfg: &mut ControlFlowGraph,
        method: &DexMethodRef,
        log: &EventLog,
    ) -> Result<ShrinkerStats> {
        let stats = self.shrink(cfg)?;
        if stats.changed() {
            log.record(EventKind::ShrinkerRun)
                .method(method.clone())
                .message(stats.to_string())
                .pass("shrinker");
        }
        Ok(stats)
    }

    /// Shrinks a method body, building a CFG for it if needed.
    ///
    /// A body that arrived linear is linearized again afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be turned into a CFG and back, or if a step
    /// fails.
    pub fn shrink_code(&self, code: &mut IrCode) -> Result<ShrinkerStats> {
        let was_linear = code.cfg().is_none();
        code.build_cfg()?;
        let stats = match code.cfg_mut() {
            Some(cfg) => self.shrink(cfg)?,
            None => return Err(invalid_cfg!("body has no CFG after building one")),
        };
        if was_linear {
            code.clear_cfg()?;
        }
        Ok(stats)
    }
}

impl Default for Shrinker {
    fn default() -> Self {
        Self::new(ShrinkerConfig::default())
    }
}

impl fmt::Debug for Shrinker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shrinker")
            .field("steps", &self.step_names())
            .field("max_rounds", &self.max_rounds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::passes::test_support::{build, canonical, printed},
        model::DexContext,
    };

    #[test]
    fn test_default_steps_in_order() {
        let shrinker = Shrinker::default();
        assert_eq!(
            shrinker.step_names(),
            vec![
                "const-prop",
                "copy-prop",
                "cse",
                "local-dce",
                "dedup-blocks",
                "reduce-gotos"
            ]
        );
        assert!(Shrinker::new(ShrinkerConfig::disabled()).is_empty());
    }

    #[test]
    fn test_reduce_gotos_inversion() {
        let ctx = DexContext::new();
        let mut cfg = build(
            &ctx,
            "((if-eqz v0 :t) (const v1 0) (:end) (return v1) (:t) (const v1 1) (goto :end))",
        );
        let shrinker = Shrinker::default();
        let stats = shrinker.shrink(&mut cfg).unwrap();
        assert_eq!(stats.changes["reduce-gotos"], 1);
        assert_eq!(
            printed(&cfg),
            canonical(
                &ctx,
                "((const v1 1) (if-eqz v0 :end) (const v1 0) (:end) (return v1))"
            )
        );
    }

    #[test]
    fn test_idempotent() {
        let ctx = DexContext::new();
        let texts = [
            "((if-eqz v0 :t) (const v1 0) (:end) (return v1) (:t) (const v1 1) (goto :end))",
            r#"((load-param v0) (move v1 v0) (const v2 0)
                (if-eqz v2 :a) (add-int/lit v3 v1 1) (return v3)
                (:a) (const v3 9) (return v3))"#,
            r#"((load-param v0) (load-param v1)
                (add-int v2 v0 v1) (add-int v3 v0 v1)
                (if-eqz v0 :a) (return v2) (:a) (return v3))"#,
        ];
        let shrinker = Shrinker::default();
        for text in texts {
            let mut cfg = build(&ctx, text);
            shrinker.shrink(&mut cfg).unwrap();
            let once = printed(&cfg);
            let again = shrinker.shrink(&mut cfg).unwrap();
            assert!(!again.changed(), "second run changed {text}: {again}");
            assert_eq!(printed(&cfg), once);
            cfg.sanity_check().unwrap();
        }
    }

    #[test]
    fn test_inlined_leftovers_disappear() {
        let ctx = DexContext::new();
        let mut cfg = build(
            &ctx,
            r#"((const v0 3)
                (move v1 v0)
                (add-int/lit v2 v1 1)
                (move v3 v2)
                (return v3))"#,
        );
        Shrinker::default().shrink(&mut cfg).unwrap();
        assert_eq!(
            printed(&cfg),
            canonical(&ctx, "((const v0 3) (add-int/lit v2 v0 1) (return v2))")
        );
        assert_eq!(cfg.registers_size(), 3);
    }

    #[test]
    fn test_disabled_only_simplifies() {
        let ctx = DexContext::new();
        let text = "((load-param v0) (move v1 v0) (return v1))";
        let mut cfg = build(&ctx, text);
        let stats = Shrinker::new(ShrinkerConfig::disabled()).shrink(&mut cfg).unwrap();
        assert!(!stats.changed());
        assert_eq!(printed(&cfg), canonical(&ctx, text));
    }

    #[test]
    fn test_shrink_code_keeps_linear_form() {
        let ctx = DexContext::new();
        let mut code = crate::ir::parse_code(&ctx, "((const v0 1) (const v1 2) (return v0))")
            .unwrap();
        let stats = Shrinker::default().shrink_code(&mut code).unwrap();
        assert_eq!(stats.opcodes_removed(), 1);
        assert!(code.cfg().is_none());
        assert_eq!(code.count_opcodes(), 2);
    }
}
