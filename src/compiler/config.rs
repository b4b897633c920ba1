//! Configuration for the inlining engine and the shrinker.
//!
//! All options are plain public fields with documented defaults. Presets cover the common
//! setups; the `with_*` methods adjust single options on top of a preset.

/// When a relaxed constructor inlining may drop `final` from the written fields instead of
/// emitting a constructor fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UnfinalizePerfMode {
    /// Never unfinalize; always fence.
    #[default]
    Off,
    /// Unfinalize unless the caller is known to be cold.
    NotCold,
    /// Unfinalize when the caller may be hot.
    MaybeHot,
    /// Unfinalize only when the caller is hot.
    Hot,
}

/// Which shrinker steps run after inlining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShrinkerConfig {
    /// Fold branches whose outcome is decided by constants (default: true).
    pub run_const_prop: bool,
    /// Forward register copies to their uses (default: true).
    pub run_copy_prop: bool,
    /// Reuse earlier results of identical pure computations (default: true).
    pub run_cse: bool,
    /// Remove instructions whose results are never read (default: true).
    pub run_local_dce: bool,
    /// Merge blocks with identical contents and successors (default: true).
    pub run_dedup_blocks: bool,
    /// Hoist trailing constant moves out of branch arms and drop the arm (default: true).
    pub run_reduce_gotos: bool,
    /// Maximum number of rounds before the shrinker stops looking for a fixpoint
    /// (default: 4).
    pub max_rounds: usize,
}

impl Default for ShrinkerConfig {
    fn default() -> Self {
        Self {
            run_const_prop: true,
            run_copy_prop: true,
            run_cse: true,
            run_local_dce: true,
            run_dedup_blocks: true,
            run_reduce_gotos: true,
            max_rounds: 4,
        }
    }
}

impl ShrinkerConfig {
    /// A configuration with every step turned off.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            run_const_prop: false,
            run_copy_prop: false,
            run_cse: false,
            run_local_dce: false,
            run_dedup_blocks: false,
            run_reduce_gotos: false,
            max_rounds: 4,
        }
    }

    /// Returns true if any step is enabled.
    #[must_use]
    pub fn any_enabled(&self) -> bool {
        self.run_const_prop
            || self.run_copy_prop
            || self.run_cse
            || self.run_local_dce
            || self.run_dedup_blocks
            || self.run_reduce_gotos
    }
}

/// Constants of the inlining cost model.
///
/// Costs are in estimated code units. The defaults are a starting point tuned for typical
/// application code; every field may be overridden.
#[derive(Debug, Clone, PartialEq)]
pub struct InlinerCostConfig {
    /// Cost of an invoke instruction (default: 3.7).
    pub cost_invoke: f32,
    /// Cost of a `move-result*` (default: 3.0).
    pub cost_move_result: f32,
    /// Fixed cost of keeping a method around (default: 16.0).
    pub cost_method: f32,
    /// Discount applied per unused argument unit (default: 1.0).
    pub unused_args_discount: f32,
    /// Arity above which each argument costs an extra unit (default: 3).
    pub reg_threshold_1: usize,
    /// Arity above which each argument costs another extra unit (default: 5).
    pub reg_threshold_2: usize,
    /// Extra cost of a `throw`, which needs a handler on inlining (default: 4).
    pub cost_move_exception: usize,
    /// Cross-dex penalty per method reference (default: 0.0).
    pub cross_dex_penalty_coe1: f32,
    /// Cross-dex penalty per other reference (default: 1.0).
    pub cross_dex_penalty_coe2: f32,
    /// Constant cross-dex penalty once any reference is added (default: 0.0).
    pub cross_dex_penalty_const: f32,
    /// Weight of an unused argument known to be zero (default: 1.0).
    pub unused_arg_zero_multiplier: f32,
    /// Weight of an unused argument known to be a nonzero constant (default: 1.0).
    pub unused_arg_non_zero_constant_multiplier: f32,
    /// Weight of an unused argument known to be nonzero (default: 1.0).
    pub unused_arg_nez_multiplier: f32,
    /// Weight of an unused argument known to lie in an interval (default: 1.0).
    pub unused_arg_interval_multiplier: f32,
    /// Weight of an unused singleton object argument (default: 1.5).
    pub unused_arg_singleton_object_multiplier: f32,
    /// Weight of an unused boxed object argument (default: 1.0).
    pub unused_arg_object_with_immutable_attr_multiplier: f32,
    /// Weight of an unused string argument (default: 1.0).
    pub unused_arg_string_multiplier: f32,
    /// Weight of an unused class-object argument (default: 1.0).
    pub unused_arg_class_object_multiplier: f32,
    /// Weight of an unused freshly allocated object argument (default: 1.0).
    pub unused_arg_new_object_multiplier: f32,
    /// Weight of an unused argument with no known value (default: 1.0).
    pub unused_arg_not_top_multiplier: f32,
    /// How strongly inlined-code shrinkage raises the profile discount (default: 1.0).
    pub profile_guided_shrink_bias: f32,
    /// How strongly the hot fraction of inlined blocks raises the profile discount
    /// (default: 0.5).
    pub profile_guided_hot_block_bias: f32,
}

impl Default for InlinerCostConfig {
    fn default() -> Self {
        Self {
            cost_invoke: 3.7,
            cost_move_result: 3.0,
            cost_method: 16.0,
            unused_args_discount: 1.0,
            reg_threshold_1: 3,
            reg_threshold_2: 5,
            cost_move_exception: 4,
            cross_dex_penalty_coe1: 0.0,
            cross_dex_penalty_coe2: 1.0,
            cross_dex_penalty_const: 0.0,
            unused_arg_zero_multiplier: 1.0,
            unused_arg_non_zero_constant_multiplier: 1.0,
            unused_arg_nez_multiplier: 1.0,
            unused_arg_interval_multiplier: 1.0,
            unused_arg_singleton_object_multiplier: 1.5,
            unused_arg_object_with_immutable_attr_multiplier: 1.0,
            unused_arg_string_multiplier: 1.0,
            unused_arg_class_object_multiplier: 1.0,
            unused_arg_new_object_multiplier: 1.0,
            unused_arg_not_top_multiplier: 1.0,
            profile_guided_shrink_bias: 1.0,
            profile_guided_hot_block_bias: 0.5,
        }
    }
}

/// Configuration for the inlining engine.
#[derive(Debug, Clone)]
pub struct InlinerConfig {
    /// Allow deleting callees with several callers once all of them inlined it
    /// (default: true).
    pub multiple_callers: bool,

    /// Specialize callees to the constant arguments seen at each call site (default: true).
    pub use_call_site_summaries: bool,

    /// Largest callee cost for which call-site specialization is attempted (default: 135).
    pub max_cost_for_constant_propagation: usize,

    /// Largest specialized body used in place of the full callee (default: 24).
    pub max_reduced_size: usize,

    /// Margin kept below the method size limits, in code units (default: 4096).
    pub instruction_size_buffer: u64,

    /// Method size limit; no code is inlined into a caller that would grow past this
    /// minus [`InlinerConfig::instruction_size_buffer`] (default: 65536).
    pub soft_max_instruction_size: u64,

    /// Check caller size limits before each inlining (default: true).
    pub enforce_method_size_limit: bool,

    /// Shrink a caller between inlinings when it approaches the size limit
    /// (default: false).
    pub intermediate_shrinking: bool,

    /// Also shrink methods into which nothing was inlined (default: true).
    pub shrink_other_methods: bool,

    /// Allow inlining callees that contain `throw` (default: false).
    pub throws_inline: bool,

    /// Cut control flow after calls to methods that never return (default: false).
    pub throw_after_no_return: bool,

    /// Refuse to move throwing code into uncovered synchronized regions (default: true).
    pub respect_sketchy_methods: bool,

    /// Inline through `invoke-super` when the target can be called directly
    /// (default: false).
    pub rewrite_invoke_super: bool,

    /// Give every inlined body fresh registers (default: true).
    pub unique_inlined_registers: bool,

    /// Allow constructors writing final fields to be inlined behind a fence, on platforms
    /// that honor it (default: false).
    pub relaxed_init_inline: bool,

    /// Refuse to inline constructors of `Throwable` subclasses (default: false).
    pub strict_throwable_init_inline: bool,

    /// Inline the hot prefix of large callees into hot callers (default: false).
    pub partial_hot_hot_inline: bool,

    /// Drop `final` from fields written by relaxed constructor inlining instead of fencing
    /// (default: false).
    pub unfinalize_relaxed_init_inline: bool,

    /// Which callers qualify for unfinalizing (default: [`UnfinalizePerfMode::Off`]).
    pub unfinalize_perf_mode: UnfinalizePerfMode,

    /// Single-threaded deterministic execution (default: false).
    pub debug: bool,

    /// Worker threads; `None` uses the hardware concurrency (default: None).
    pub threads: Option<usize>,

    /// Type-name prefixes whose methods are never inlined (default: empty).
    pub blocklist: Vec<String>,

    /// Type-name prefixes whose methods are never inlined into (default: empty).
    pub caller_blocklist: Vec<String>,

    /// Refuse to inline callees that would add method references to the caller's dex
    /// (default: false).
    pub intra_dex: bool,

    /// Code units a cold callee may add to a hot caller (default: 8).
    pub hot_cold_max_growth: usize,

    /// Size bound of the kept side of a partially inlined callee, in code units
    /// (default: 10).
    pub partial_inline_max_code_units: usize,

    /// Shrinker steps (default: all enabled).
    pub shrinker: ShrinkerConfig,

    /// Cost-model constants.
    pub cost: InlinerCostConfig,
}

impl Default for InlinerConfig {
    fn default() -> Self {
        Self {
            multiple_callers: true,
            use_call_site_summaries: true,
            max_cost_for_constant_propagation: 135,
            max_reduced_size: 24,
            instruction_size_buffer: 1 << 12,
            soft_max_instruction_size: 1 << 16,
            enforce_method_size_limit: true,
            intermediate_shrinking: false,
            shrink_other_methods: true,
            throws_inline: false,
            throw_after_no_return: false,
            respect_sketchy_methods: true,
            rewrite_invoke_super: false,
            unique_inlined_registers: true,
            relaxed_init_inline: false,
            strict_throwable_init_inline: false,
            partial_hot_hot_inline: false,
            unfinalize_relaxed_init_inline: false,
            unfinalize_perf_mode: UnfinalizePerfMode::Off,
            debug: false,
            threads: None,
            blocklist: Vec::new(),
            caller_blocklist: Vec::new(),
            intra_dex: false,
            hot_cold_max_growth: 8,
            partial_inline_max_code_units: 10,
            shrinker: ShrinkerConfig::default(),
            cost: InlinerCostConfig::default(),
        }
    }
}

impl InlinerConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A single-threaded configuration whose results do not depend on scheduling.
    #[must_use]
    pub fn debug() -> Self {
        Self {
            debug: true,
            threads: Some(1),
            ..Self::default()
        }
    }

    /// A configuration that inlines as much as the verifier allows.
    ///
    /// Enables inlining of throwing callees, no-return cutting, invoke-super rewriting,
    /// relaxed constructor inlining, partial inlining and intermediate shrinking.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            throws_inline: true,
            throw_after_no_return: true,
            rewrite_invoke_super: true,
            relaxed_init_inline: true,
            partial_hot_hot_inline: true,
            intermediate_shrinking: true,
            ..Self::default()
        }
    }

    /// Sets whether callees with several callers may be deleted.
    #[must_use]
    pub fn with_multiple_callers(mut self, enabled: bool) -> Self {
        self.multiple_callers = enabled;
        self
    }

    /// Sets whether call-site summaries are used.
    #[must_use]
    pub fn with_call_site_summaries(mut self, enabled: bool) -> Self {
        self.use_call_site_summaries = enabled;
        self
    }

    /// Sets whether callees containing `throw` may be inlined.
    #[must_use]
    pub fn with_throws_inline(mut self, enabled: bool) -> Self {
        self.throws_inline = enabled;
        self
    }

    /// Sets whether calls to no-return methods cut control flow.
    #[must_use]
    pub fn with_throw_after_no_return(mut self, enabled: bool) -> Self {
        self.throw_after_no_return = enabled;
        self
    }

    /// Sets whether the synchronized-region gate applies.
    #[must_use]
    pub fn with_respect_sketchy_methods(mut self, enabled: bool) -> Self {
        self.respect_sketchy_methods = enabled;
        self
    }

    /// Sets whether constructors writing final fields may be inlined behind a fence.
    #[must_use]
    pub fn with_relaxed_init_inline(mut self, enabled: bool) -> Self {
        self.relaxed_init_inline = enabled;
        self
    }

    /// Sets the unfinalize mode for relaxed constructor inlining.
    #[must_use]
    pub fn with_unfinalize(mut self, enabled: bool, mode: UnfinalizePerfMode) -> Self {
        self.unfinalize_relaxed_init_inline = enabled;
        self.unfinalize_perf_mode = mode;
        self
    }

    /// Sets whether partial inlining is attempted.
    #[must_use]
    pub fn with_partial_hot_hot_inline(mut self, enabled: bool) -> Self {
        self.partial_hot_hot_inline = enabled;
        self
    }

    /// Sets the soft method size limit.
    #[must_use]
    pub fn with_soft_max_instruction_size(mut self, size: u64) -> Self {
        self.soft_max_instruction_size = size;
        self
    }

    /// Sets the margin kept below the method size limits.
    #[must_use]
    pub fn with_instruction_size_buffer(mut self, buffer: u64) -> Self {
        self.instruction_size_buffer = buffer;
        self
    }

    /// Returns the largest caller size, in code units, that inlining may produce.
    #[must_use]
    pub fn size_limit(&self) -> u64 {
        self.soft_max_instruction_size
            .saturating_sub(self.instruction_size_buffer)
    }

    /// Sets the number of worker threads.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Adds a callee blocklist prefix.
    #[must_use]
    pub fn with_blocklisted(mut self, prefix: impl Into<String>) -> Self {
        self.blocklist.push(prefix.into());
        self
    }

    /// Adds a caller blocklist prefix.
    #[must_use]
    pub fn with_caller_blocklisted(mut self, prefix: impl Into<String>) -> Self {
        self.caller_blocklist.push(prefix.into());
        self
    }

    /// Sets whether inlining must stay within one dex.
    #[must_use]
    pub fn with_intra_dex(mut self, enabled: bool) -> Self {
        self.intra_dex = enabled;
        self
    }

    /// Replaces the shrinker configuration.
    #[must_use]
    pub fn with_shrinker(mut self, shrinker: ShrinkerConfig) -> Self {
        self.shrinker = shrinker;
        self
    }

    /// Replaces the cost-model constants.
    #[must_use]
    pub fn with_cost(mut self, cost: InlinerCostConfig) -> Self {
        self.cost = cost;
        self
    }

    /// Returns the number of worker threads to use.
    #[must_use]
    pub fn effective_threads(&self) -> usize {
        if self.debug {
            return 1;
        }
        self.threads
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(std::num::NonZeroUsize::get)
                    .unwrap_or(1)
            })
            .max(1)
    }

    /// Returns true if `descriptor` matches a callee blocklist prefix.
    #[must_use]
    pub fn is_blocklisted(&self, descriptor: &str) -> bool {
        self.blocklist.iter().any(|p| descriptor.starts_with(p.as_str()))
    }

    /// Returns true if `descriptor` matches a caller blocklist prefix.
    #[must_use]
    pub fn is_caller_blocklisted(&self, descriptor: &str) -> bool {
        self.caller_blocklist
            .iter()
            .any(|p| descriptor.starts_with(p.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = InlinerConfig::default();
        assert!(config.multiple_callers);
        assert!(!config.throws_inline);
        assert!(config.respect_sketchy_methods);
        assert_eq!(config.partial_inline_max_code_units, 10);
        assert_eq!(config.unfinalize_perf_mode, UnfinalizePerfMode::Off);
        assert!(config.shrinker.any_enabled());
    }

    #[test]
    fn test_presets() {
        let debug = InlinerConfig::debug();
        assert!(debug.debug);
        assert_eq!(debug.effective_threads(), 1);

        let aggressive = InlinerConfig::aggressive();
        assert!(aggressive.throws_inline);
        assert!(aggressive.throw_after_no_return);
        assert!(aggressive.relaxed_init_inline);
    }

    #[test]
    fn test_blocklists() {
        let config = InlinerConfig::new()
            .with_blocklisted("Landroid/")
            .with_caller_blocklisted("Lcom/keep/");
        assert!(config.is_blocklisted("Landroid/os/Build;"));
        assert!(!config.is_blocklisted("Lcom/app/Main;"));
        assert!(config.is_caller_blocklisted("Lcom/keep/A;"));
    }

    #[test]
    fn test_shrinker_disabled() {
        assert!(!ShrinkerConfig::disabled().any_enabled());
        let config = InlinerConfig::new().with_shrinker(ShrinkerConfig::disabled());
        assert!(!config.shrinker.any_enabled());
    }
}
