//! The whole-program inlining engine.
//!
//! This module sits on top of the graph layer:
//!
//! - [`crate::cfg`] - editable control-flow graphs and the splice transform
//! - [`crate::analysis`] - constant propagation, liveness, monitor and constructor checks
//! - [`compiler`](self) - candidate discovery, cost model, gates, scheduling, shrinking
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       Inliner Pipeline                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  MultiMethodInliner          Entry point, owns one run           │
//! │    ├─ CallGraph               Candidate calls, recursion pruning │
//! │    ├─ CallSiteSummaries       Top-down constant arguments        │
//! │    └─ PriorityScheduler       One task per method, callees first │
//! │                                                                  │
//! │  Per caller (one task)                                           │
//! │    ├─ gates                   Hard legality checks (Rejection)   │
//! │    ├─ cost                    Size benefit, pervasiveness        │
//! │    ├─ partial                 Hot fast-path bodies               │
//! │    ├─ cfg::inline_cfg         Splice the chosen bodies           │
//! │    └─ Shrinker                Local cleanup, as a continuation   │
//! │                                                                  │
//! │  Post-processing (serial)                                        │
//! │    ├─ VisibilityChanges       Widen members the callers now use  │
//! │    ├─ staticize               Private methods reached elsewhere  │
//! │    └─ unfinalize              Fields written by relaxed inits    │
//! │                                                                  │
//! │  EventLog                    Every decision, source of stats     │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All configuration lives in [`InlinerConfig`]; [`InlinerConfig::debug`] gives a single
//! threaded run whose output does not depend on scheduling.

mod callgraph;
mod config;
mod context;
mod cost;
mod engine;
mod events;
mod gates;
mod partial;
mod pass;
mod passes;
mod profile;
mod scheduler;
mod shrinker;
mod summaries;
mod visibility;

pub use callgraph::CallGraph;
pub use config::{InlinerConfig, InlinerCostConfig, ShrinkerConfig, UnfinalizePerfMode};
pub use context::InlineForSpeed;
pub use cost::{
    block_cost, body_cost, cross_dex_penalty, insn_cost, invoke_cost, is_pervasive, profile_discount,
    reg_penalty, site_benefit, unused_arg_weight, InlinedCost,
};
pub use engine::{InlinerOutput, MultiMethodInliner};
pub use events::{Event, EventBuilder, EventKind, EventLog, EventLogIter, InlinerStats};
pub use gates::{CalleeFacts, Rejection, HARD_MAX_INSTRUCTION_SIZE};
pub use pass::ShrinkPass;
pub use passes::{
    ConstantBranchFoldingPass, CopyPropagationPass, DeadCodeEliminationPass, DedupBlocksPass,
    LocalCsePass, ReduceGotosPass,
};
pub use profile::BaselineProfile;
pub use scheduler::{PriorityScheduler, TaskHandle, TaskSpec};
pub use shrinker::{Shrinker, ShrinkerStats};
pub use summaries::{CallSiteSummaries, CallSiteSummary, ReducedCallee, SummaryInterner};
pub use visibility::{staticize, VisibilityChanges};
