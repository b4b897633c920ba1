// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

//! # redex
//!
//! The inter-procedural method optimization core of a Dalvik bytecode optimizer: an editable
//! control-flow-graph IR for method bodies and a priority-driven, bottom-up method inliner
//! operating over it.
//!
//! ## Architecture
//!
//! The crate is organized leaves-first:
//!
//! - [`model`] - Interned references (strings, types, protos, fields, methods), class and
//!   method definitions, access flags, method resolution and store partitioning.
//! - [`ir`] - The instruction vocabulary: opcodes with their semantic predicates,
//!   instructions, method items, linear [`ir::IrCode`] and the textual S-expression format.
//! - [`cfg`] - The editable [`cfg::ControlFlowGraph`]: construction from linear code,
//!   mutation, simplification, linearization with try/catch materialization, and the
//!   splice transform that inlines one callee CFG into a caller CFG.
//! - [`analysis`] - Dataflow analyses over the CFG: liveness, constant propagation over the
//!   [`analysis::ConstantValue`] lattice, monitor counting, constructor safety.
//! - [`compiler`] - The whole-program inlining engine: candidate discovery, recursion
//!   pruning, call-site summaries, cost model, gates, the priority-DAG scheduler,
//!   visibility fix-ups, staticizing and the local shrinker.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use redex::prelude::*;
//!
//! let ctx = DexContext::new();
//! let mut code = parse_code(
//!     &ctx,
//!     "((load-param v0) (if-eqz v0 :t) (const v1 0) (:end) (return v1) (:t) (const v1 1) (goto :end))",
//! )?;
//! code.build_cfg()?;
//! if let Some(cfg) = code.cfg_mut() {
//!     Shrinker::new(ShrinkerConfig::default()).shrink(cfg)?;
//! }
//! code.clear_cfg()?;
//! println!("{}", code);
//! # Ok::<(), redex::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! Fallible operations return [`Result<T>`]. Graph corruption is reported as
//! [`Error::InvalidCfg`] and aborts the enclosing run; expected inlining rejections are not
//! errors and are reported through [`compiler::Rejection`] and the statistics counters.
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// ```rust,no_run
/// use redex::prelude::*;
///
/// let ctx = DexContext::new();
/// let code = parse_code(&ctx, "((const v0 1) (return v0))")?;
/// assert_eq!(code.registers_size(), 1);
/// # Ok::<(), redex::Error>(())
/// ```
pub mod prelude;

/// Generic utilities: bit sets and graph algorithms.
pub mod utils;

/// Interned references and class/method/field definitions.
///
/// All references are created through a [`model::DexContext`], which makes them unique:
/// two references compare equal iff they are the same interned value.
pub mod model;

/// The instruction vocabulary and linear method bodies.
///
/// Contains the opcode set with the semantic predicates every downstream algorithm relies
/// on, the [`ir::IrInstruction`] record, the [`ir::MethodItem`] variants that make up a
/// linear instruction stream, and the S-expression loader and printer.
pub mod ir;

/// The editable control-flow graph.
///
/// See [`cfg::ControlFlowGraph`] for the data model and its invariants.
pub mod cfg;

/// Dataflow analyses over control-flow graphs.
pub mod analysis;

/// The whole-program inlining engine and its supporting passes.
pub mod compiler;

/// `redex` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `redex` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;
