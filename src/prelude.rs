//! # redex Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! of the library. Import it to get quick access to the model, the IR, the control-flow
//! graph and the inliner.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all redex operations
pub use crate::Error;

/// The result type used throughout redex
pub use crate::Result;

// ================================================================================================
// Program Model
// ================================================================================================

/// Interned references
pub use crate::model::{DexFieldRef, DexMethodRef, DexProto, DexString, DexType};

/// Definitions and the context that owns them
pub use crate::model::{DexClass, DexContext, DexField, DexMethod, MethodBuilder};

/// Access and optimizer flags
pub use crate::model::{AccessFlags, MethodFlags};

/// Resolution and store partitioning
pub use crate::model::{
    ApiLevelChecker, ContextResolver, MethodResolver, MethodSearch, StoreInfo, XStoreRefs,
};

// ================================================================================================
// Instructions and Linear Code
// ================================================================================================

/// Instructions, opcodes and method items
pub use crate::ir::{IrCode, IrInstruction, IrOpcode, MethodItem, Reg, SourceBlock};

/// The textual S-expression format
pub use crate::ir::{parse_code, print_items};

// ================================================================================================
// Control-Flow Graph
// ================================================================================================

/// The editable graph and its parts
pub use crate::cfg::{Block, BlockId, ControlFlowGraph, Edge, EdgeId, EdgeKind, InsnPos};

/// Splicing one graph into another
pub use crate::cfg::{inline_cfg, InlineOptions, InlineResult};

// ================================================================================================
// Analyses
// ================================================================================================

/// Constant propagation and liveness
pub use crate::analysis::{dataflow::Liveness, ConstantAnalysis, ConstantValue};

// ================================================================================================
// Inliner
// ================================================================================================

/// Running the inliner
pub use crate::compiler::{InlinerConfig, InlinerOutput, InlinerStats, MultiMethodInliner};

/// Decisions and diagnostics
pub use crate::compiler::{EventKind, EventLog, Rejection};

/// Local cleanup
pub use crate::compiler::{ShrinkPass, Shrinker, ShrinkerConfig};

/// Profiles and scheduling
pub use crate::compiler::{BaselineProfile, PriorityScheduler, TaskSpec};
