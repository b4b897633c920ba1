//! Dataflow analyses over [`ControlFlowGraph`](crate::cfg::ControlFlowGraph)s.
//!
//! The analyses share one worklist solver (see [`dataflow`]) and are consumed by the
//! inlining engine and the shrinker:
//!
//! - [`Liveness`](dataflow::Liveness) - live registers, for dead-code removal and unused
//!   argument detection
//! - [`ConstantAnalysis`] - edge-sensitive constant propagation over [`ConstantValue`], for
//!   call-site summaries, callee specialization and branch folding
//! - [`MonitorAnalysis`] - monitor nesting, for the synchronized-region gate
//! - [`InitClassesWithSideEffects`] - which class initializations are observable
//! - [`can_inline_init`] - whether a constructor body may be inlined
//!
//! # Usage
//!
//! ```rust
//! use redex::{analysis::{ConstantAnalysis, ConstantValue}, ir::parse_code, model::DexContext};
//!
//! let ctx = DexContext::new();
//! let mut code = parse_code(&ctx, "((const v0 2) (add-int/lit v1 v0 3) (return v1))")?;
//! code.build_cfg()?;
//! let cfg = code.cfg().unwrap();
//! let constants = ConstantAnalysis::run(cfg, Vec::new(), None);
//! assert_eq!(constants.exit_env(cfg.entry()).get(1), ConstantValue::constant(5));
//! # Ok::<(), redex::Error>(())
//! ```

pub mod dataflow;

mod constant;
mod constructor;
mod init_classes;
mod monitor;

pub use constant::{
    ConstantAnalysis, ConstantEnvironment, ConstantPropagation, ConstantValue, ImmutableAttr,
    RESULT_REGISTER,
};
pub use constructor::{
    can_inline_init, InitInline, InitInlineOptions, InitRejection, RELAXED_INIT_MIN_SDK,
};
pub use init_classes::InitClassesWithSideEffects;
pub use monitor::{cannot_inline_sketchy_code, MonitorAnalysis, MonitorCount, MonitorDepth};
