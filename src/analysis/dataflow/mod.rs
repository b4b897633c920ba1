//! Data flow analysis framework over control-flow graphs.
//!
//! This module provides a generic framework for computing properties that
//! propagate along control flow edges. It supports both forward and backward
//! analyses using a worklist-based solver.
//!
//! # Architecture
//!
//! The framework is built around three core abstractions:
//!
//! - **Lattice**: Defines how states from different paths combine
//! - **Analysis**: Specifies transfer functions and boundary conditions
//! - **Solver**: Iteratively computes fixpoints using a worklist algorithm
//!
//! Forward analyses may also refine the state flowing along an individual edge through
//! [`DataFlowAnalysis::transfer_edge`], which is how branch conditions prune paths.
//!
//! # Analyses Provided
//!
//! - [`LiveRegisters`] / [`Liveness`]: Registers read before being overwritten
//! - [`crate::analysis::ConstantPropagation`]: Edge-sensitive constant propagation
//! - [`crate::analysis::MonitorCount`]: Monitor nesting depth
//!
//! # Thread Safety
//!
//! All types in this module are `Send` and `Sync`.

mod framework;
mod lattice;
mod liveness;
mod solver;

pub use framework::{AnalysisResults, DataFlowAnalysis, Direction};
pub use lattice::{JoinSemiLattice, MeetSemiLattice};
pub use liveness::{LiveRegisters, Liveness};
pub use solver::DataFlowSolver;

pub(crate) use liveness::step_backward;
